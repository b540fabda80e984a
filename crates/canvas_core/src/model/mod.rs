//! Field graph data model.
//!
//! # Responsibility
//! - Define the storable value cells (scalars, lists, documents).
//! - Define the wire record exchanged with the transport.
//!
//! # Invariants
//! - Every value cell is identified by a stable `FieldId`.
//! - Model types hold data only; graph-wide effects (undo, push, observers)
//!   live in `crate::graph`.

pub mod basic;
pub mod document;
pub mod field;
pub mod list;
pub mod record;
