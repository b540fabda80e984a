//! Scalar field variants.
//!
//! # Responsibility
//! - Wrap one value of a fixed type (number, text, URL, boolean).
//! - Define runtime coercion from untyped values for remote appliers.
//!
//! # Invariants
//! - Coercion only succeeds when the raw runtime type matches the static type.

use crate::model::field::{DataField, FieldBody, FieldKind, FieldType};
use serde_json::Value;
use std::fmt::Debug;
use url::Url;

/// Scalar payload types storable in a `BasicField`.
pub trait ScalarData: Clone + PartialEq + Debug + 'static {
    const KIND: FieldKind;

    fn peek(body: &FieldBody) -> Option<&BasicField<Self>>;

    fn peek_mut(body: &mut FieldBody) -> Option<&mut BasicField<Self>>;

    fn wrap(field: BasicField<Self>) -> FieldBody;

    /// Converts an untyped value when its runtime type matches.
    fn coerce(raw: &Value) -> Option<Self>;

    fn to_raw(&self) -> Value;

    /// Whether the value has a wire form.
    fn is_storable(&self) -> bool {
        true
    }
}

/// Single-value cell.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicField<T> {
    data: T,
}

pub type NumberField = BasicField<f64>;
pub type TextField = BasicField<String>;
pub type UrlField = BasicField<Url>;
pub type BooleanField = BasicField<bool>;

impl<T: ScalarData> BasicField<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    /// Swaps in `data` and returns the previous value.
    pub(crate) fn replace(&mut self, data: T) -> T {
        std::mem::replace(&mut self.data, data)
    }
}

impl<T: ScalarData + Default> Default for BasicField<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ScalarData> FieldType for BasicField<T> {
    const KIND: FieldKind = T::KIND;

    fn from_body(body: &FieldBody) -> Option<&Self> {
        T::peek(body)
    }

    fn from_body_mut(body: &mut FieldBody) -> Option<&mut Self> {
        T::peek_mut(body)
    }

    fn into_body(self) -> FieldBody {
        T::wrap(self)
    }
}

impl<T: ScalarData> DataField for BasicField<T> {
    type Data = T;

    fn data(&self) -> T {
        self.data.clone()
    }
}

impl<T: ScalarData> From<BasicField<T>> for FieldBody {
    fn from(value: BasicField<T>) -> Self {
        T::wrap(value)
    }
}

macro_rules! scalar_variant {
    ($variant:ident) => {
        fn peek(body: &FieldBody) -> Option<&BasicField<Self>> {
            match body {
                FieldBody::$variant(field) => Some(field),
                _ => None,
            }
        }

        fn peek_mut(body: &mut FieldBody) -> Option<&mut BasicField<Self>> {
            match body {
                FieldBody::$variant(field) => Some(field),
                _ => None,
            }
        }

        fn wrap(field: BasicField<Self>) -> FieldBody {
            FieldBody::$variant(field)
        }
    };
}

impl ScalarData for f64 {
    const KIND: FieldKind = FieldKind::Number;

    scalar_variant!(Number);

    fn coerce(raw: &Value) -> Option<Self> {
        match raw {
            Value::Number(number) => number.as_f64(),
            _ => None,
        }
    }

    fn to_raw(&self) -> Value {
        serde_json::Number::from_f64(*self).map_or(Value::Null, Value::Number)
    }

    // JSON has no NaN or infinity.
    fn is_storable(&self) -> bool {
        self.is_finite()
    }
}

impl ScalarData for String {
    const KIND: FieldKind = FieldKind::Text;

    scalar_variant!(Text);

    fn coerce(raw: &Value) -> Option<Self> {
        raw.as_str().map(str::to_string)
    }

    fn to_raw(&self) -> Value {
        Value::String(self.clone())
    }
}

impl ScalarData for Url {
    const KIND: FieldKind = FieldKind::Url;

    scalar_variant!(Url);

    // URLs travel as strings; a string that does not parse is a type mismatch.
    fn coerce(raw: &Value) -> Option<Self> {
        raw.as_str().and_then(|text| Url::parse(text).ok())
    }

    fn to_raw(&self) -> Value {
        Value::String(self.as_str().to_string())
    }
}

impl ScalarData for bool {
    const KIND: FieldKind = FieldKind::Boolean;

    scalar_variant!(Boolean);

    fn coerce(raw: &Value) -> Option<Self> {
        raw.as_bool()
    }

    fn to_raw(&self) -> Value {
        Value::Bool(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::{BooleanField, NumberField, ScalarData, TextField};
    use crate::model::field::{FieldKind, FieldType};
    use serde_json::json;
    use url::Url;

    #[test]
    fn number_coercion_accepts_integers_and_floats_only() {
        assert_eq!(f64::coerce(&json!(3)), Some(3.0));
        assert_eq!(f64::coerce(&json!(2.5)), Some(2.5));
        assert_eq!(f64::coerce(&json!("3")), None);
        assert_eq!(f64::coerce(&json!(true)), None);
    }

    #[test]
    fn url_coercion_requires_parseable_string() {
        assert!(Url::coerce(&json!("https://example.org/a")).is_some());
        assert!(Url::coerce(&json!("example")).is_none());
        assert!(Url::coerce(&json!(1)).is_none());
    }

    #[test]
    fn only_finite_numbers_are_storable() {
        assert!(1.5f64.is_storable());
        assert!(!f64::NAN.is_storable());
        assert!(!f64::INFINITY.is_storable());
        assert!("text".to_string().is_storable());
    }

    #[test]
    fn replace_returns_previous_value() {
        let mut field = TextField::new("before".to_string());
        let old = field.replace("after".to_string());
        assert_eq!(old, "before");
        assert_eq!(field.data(), "after");
    }

    #[test]
    fn defaults_and_kinds_follow_payload_type() {
        assert_eq!(*NumberField::default().data(), 0.0);
        assert!(!*BooleanField::default().data());
        assert_eq!(<TextField as FieldType>::KIND, FieldKind::Text);
    }
}
