//! Graph operation errors.
//!
//! # Responsibility
//! - Report programming errors raised by structural edits.
//!
//! # Invariants
//! - Type mismatches and unresolved references are not errors; they surface
//!   as `Lookup::Absent`, `None` or a caller default.

use crate::model::field::{FieldId, FieldKind};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Length-changing edit on a tuple list.
    FixedArity { list: FieldId, len: usize },
    IndexOutOfBounds { index: usize, len: usize },
    /// NaN or an infinity written to a number field.
    NonFiniteNumber,
    /// Operation needs a locally resident field.
    NotResident(FieldId),
    WrongKind {
        id: FieldId,
        expected: FieldKind,
        actual: FieldKind,
    },
}

impl Display for GraphError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FixedArity { list, len } => {
                write!(f, "list {list} has fixed arity {len}; length cannot change")
            }
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for list of length {len}")
            }
            Self::NonFiniteNumber => f.write_str("number fields only hold finite values"),
            Self::NotResident(id) => write!(f, "field {id} is not resident"),
            Self::WrongKind {
                id,
                expected,
                actual,
            } => write!(f, "field {id} is {actual}, expected {expected}"),
        }
    }
}

impl Error for GraphError {}

#[cfg(test)]
mod tests {
    use super::GraphError;
    use crate::model::field::{FieldId, FieldKind};

    #[test]
    fn display_names_the_offending_field() {
        let id = FieldId::generate();
        let message = GraphError::WrongKind {
            id,
            expected: FieldKind::List,
            actual: FieldKind::Text,
        }
        .to_string();
        assert!(message.contains(&id.to_string()));
        assert!(message.contains("expected list"));
    }
}
