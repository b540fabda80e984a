//! Field identity, kinds and the typed access contract.
//!
//! # Responsibility
//! - Define the value cell stored in the graph (`Field`) and its variants.
//! - Provide `Lookup<T>`, the three-state read result used by every getter.
//!
//! # Invariants
//! - A `FieldId` is generated once at construction and never reassigned.
//! - Typed downcasts never panic; a kind mismatch yields `None`.

use crate::model::basic::{BooleanField, NumberField, ScalarData, TextField, UrlField};
use crate::model::document::Document;
use crate::model::list::ListField;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Debug, Display, Formatter};
use url::Url;
use uuid::Uuid;

/// Globally unique field identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(Uuid);

impl FieldId {
    /// Creates a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses the hyphenated text form. Returns `None` for malformed input.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value.trim()).ok().map(Self)
    }
}

impl Display for FieldId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for FieldId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FieldId({})", self.0)
    }
}

/// Runtime kind of a stored field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Number,
    Text,
    Url,
    Boolean,
    List,
    Document,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Text => "text",
            Self::Url => "url",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Document => "document",
        }
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of reading a value that may still live on the remote side.
///
/// `Pending` means a request is in flight; it is never conflated with
/// `Absent` (no value anywhere in the chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<T> {
    Resolved(T),
    Pending,
    Absent,
}

impl<T> Lookup<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Returns the resolved value, discarding the pending/absent distinction.
    pub fn resolved(self) -> Option<T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Pending | Self::Absent => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Self::Resolved(value) => Lookup::Resolved(f(value)),
            Self::Pending => Lookup::Pending,
            Self::Absent => Lookup::Absent,
        }
    }
}

/// Variant payload of a field.
#[derive(Debug)]
pub enum FieldBody {
    Number(NumberField),
    Text(TextField),
    Url(UrlField),
    Boolean(BooleanField),
    List(ListField),
    Document(Document),
}

impl FieldBody {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Number(_) => FieldKind::Number,
            Self::Text(_) => FieldKind::Text,
            Self::Url(_) => FieldKind::Url,
            Self::Boolean(_) => FieldKind::Boolean,
            Self::List(_) => FieldKind::List,
            Self::Document(_) => FieldKind::Document,
        }
    }

    /// Builds a body of `kind` from an untyped value.
    ///
    /// Returns `None` when the raw value's runtime type does not match
    /// `kind`. Lists accept an array of field id strings; documents have no
    /// raw form.
    pub fn from_raw(kind: FieldKind, raw: &Value) -> Option<Self> {
        match kind {
            FieldKind::Number => f64::coerce(raw).map(|v| Self::Number(NumberField::new(v))),
            FieldKind::Text => String::coerce(raw).map(|v| Self::Text(TextField::new(v))),
            FieldKind::Url => Url::coerce(raw).map(|v| Self::Url(UrlField::new(v))),
            FieldKind::Boolean => bool::coerce(raw).map(|v| Self::Boolean(BooleanField::new(v))),
            FieldKind::List => {
                element_ids_from_raw(raw).map(|ids| Self::List(ListField::from_elements(ids)))
            }
            FieldKind::Document => None,
        }
    }
}

/// Parses a JSON array of field id strings. Any malformed entry rejects the whole array.
pub fn element_ids_from_raw(raw: &Value) -> Option<Vec<FieldId>> {
    raw.as_array()?
        .iter()
        .map(|item| item.as_str().and_then(FieldId::parse))
        .collect()
}

/// Uniquely identified value cell.
#[derive(Debug)]
pub struct Field {
    id: FieldId,
    body: FieldBody,
}

impl Field {
    /// Wraps `body` under a freshly generated id.
    pub fn new(body: impl Into<FieldBody>) -> Self {
        Self::with_id(FieldId::generate(), body)
    }

    /// Wraps `body` under a caller-provided id (decode paths).
    pub fn with_id(id: FieldId, body: impl Into<FieldBody>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn kind(&self) -> FieldKind {
        self.body.kind()
    }

    pub fn body(&self) -> &FieldBody {
        &self.body
    }

    /// Typed view; `None` on kind mismatch.
    pub fn downcast<F: FieldType>(&self) -> Option<&F> {
        F::from_body(&self.body)
    }

    pub(crate) fn downcast_mut<F: FieldType>(&mut self) -> Option<&mut F> {
        F::from_body_mut(&mut self.body)
    }
}

/// Static type of a field variant, used by typed getters.
pub trait FieldType: Sized + 'static {
    const KIND: FieldKind;

    fn from_body(body: &FieldBody) -> Option<&Self>;

    fn from_body_mut(body: &mut FieldBody) -> Option<&mut Self>;

    fn into_body(self) -> FieldBody;
}

/// Field variant exposing a plain data value.
pub trait DataField: FieldType {
    type Data: Clone;

    fn data(&self) -> Self::Data;
}

impl FieldType for ListField {
    const KIND: FieldKind = FieldKind::List;

    fn from_body(body: &FieldBody) -> Option<&Self> {
        match body {
            FieldBody::List(list) => Some(list),
            _ => None,
        }
    }

    fn from_body_mut(body: &mut FieldBody) -> Option<&mut Self> {
        match body {
            FieldBody::List(list) => Some(list),
            _ => None,
        }
    }

    fn into_body(self) -> FieldBody {
        FieldBody::List(self)
    }
}

impl DataField for ListField {
    type Data = Vec<FieldId>;

    fn data(&self) -> Self::Data {
        self.elements().to_vec()
    }
}

impl FieldType for Document {
    const KIND: FieldKind = FieldKind::Document;

    fn from_body(body: &FieldBody) -> Option<&Self> {
        match body {
            FieldBody::Document(doc) => Some(doc),
            _ => None,
        }
    }

    fn from_body_mut(body: &mut FieldBody) -> Option<&mut Self> {
        match body {
            FieldBody::Document(doc) => Some(doc),
            _ => None,
        }
    }

    fn into_body(self) -> FieldBody {
        FieldBody::Document(self)
    }
}

impl From<ListField> for FieldBody {
    fn from(value: ListField) -> Self {
        Self::List(value)
    }
}

impl From<Document> for FieldBody {
    fn from(value: Document) -> Self {
        Self::Document(value)
    }
}
