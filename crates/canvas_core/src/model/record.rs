//! Serialized field shape exchanged with the transport.
//!
//! # Invariants
//! - Document slots are keyed by key name; ids are re-derived on decode.
//! - A decoded document holds every slot as a proxy, a decoded list starts
//!   with local order equal to server order.

use crate::keys::intern;
use crate::model::basic::{BooleanField, NumberField, ScalarData, TextField, UrlField};
use crate::model::document::Document;
use crate::model::field::{Field, FieldBody, FieldId, FieldKind};
use crate::model::list::ListField;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Wire form of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub id: FieldId,
    #[serde(flatten)]
    pub value: RecordValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordValue {
    Number {
        data: f64,
    },
    Text {
        data: String,
    },
    Url {
        data: Url,
    },
    Boolean {
        data: bool,
    },
    List {
        elements: Vec<FieldId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arity: Option<usize>,
    },
    Document {
        fields: BTreeMap<String, FieldId>,
    },
}

impl RecordValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Number { .. } => FieldKind::Number,
            Self::Text { .. } => FieldKind::Text,
            Self::Url { .. } => FieldKind::Url,
            Self::Boolean { .. } => FieldKind::Boolean,
            Self::List { .. } => FieldKind::List,
            Self::Document { .. } => FieldKind::Document,
        }
    }

    /// Untyped scalar payload, `None` for containers.
    pub fn scalar_raw(&self) -> Option<Value> {
        match self {
            Self::Number { data } => Some(data.to_raw()),
            Self::Text { data } => Some(data.to_raw()),
            Self::Url { data } => Some(data.to_raw()),
            Self::Boolean { data } => Some(data.to_raw()),
            Self::List { .. } | Self::Document { .. } => None,
        }
    }
}

impl FieldRecord {
    /// Snapshot of a resident field. Proxied document slots keep their remote id.
    pub fn from_field(field: &Field) -> Self {
        let value = match field.body() {
            FieldBody::Number(f) => RecordValue::Number { data: *f.data() },
            FieldBody::Text(f) => RecordValue::Text {
                data: f.data().clone(),
            },
            FieldBody::Url(f) => RecordValue::Url {
                data: f.data().clone(),
            },
            FieldBody::Boolean(f) => RecordValue::Boolean { data: *f.data() },
            FieldBody::List(list) => RecordValue::List {
                elements: list.elements().to_vec(),
                arity: list.arity(),
            },
            FieldBody::Document(doc) => RecordValue::Document {
                fields: doc
                    .fields()
                    .chain(doc.proxies())
                    .map(|slot| (slot.key.name().to_string(), slot.field))
                    .collect(),
            },
        };
        Self {
            id: field.id(),
            value,
        }
    }

    pub fn kind(&self) -> FieldKind {
        self.value.kind()
    }

    /// Rebuilds a live field under the record's id.
    pub fn into_field(self) -> Field {
        let body: FieldBody = match self.value {
            RecordValue::Number { data } => NumberField::new(data).into(),
            RecordValue::Text { data } => TextField::new(data).into(),
            RecordValue::Url { data } => UrlField::new(data).into(),
            RecordValue::Boolean { data } => BooleanField::new(data).into(),
            RecordValue::List { elements, arity } => ListField::from_server(elements, arity).into(),
            RecordValue::Document { fields } => {
                let mut doc = Document::new();
                for (name, id) in fields {
                    doc.put_proxy(&intern(&name), id);
                }
                doc.into()
            }
        };
        Field::with_id(self.id, body)
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldRecord, RecordValue};
    use crate::keys::TITLE;
    use crate::model::basic::TextField;
    use crate::model::document::{Document, SlotRef};
    use crate::model::field::{Field, FieldId, FieldKind};
    use serde_json::json;

    #[test]
    fn record_uses_tagged_wire_shape() {
        let field = Field::new(TextField::new("hello".to_string()));
        let record = FieldRecord::from_field(&field);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], field.id().to_string());
        assert_eq!(json["type"], "text");
        assert_eq!(json["data"], "hello");
    }

    #[test]
    fn list_arity_is_omitted_when_unbounded() {
        let record = FieldRecord {
            id: FieldId::generate(),
            value: RecordValue::List {
                elements: vec![],
                arity: None,
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("arity").is_none());
    }

    #[test]
    fn decoded_document_slots_start_as_proxies() {
        let title = FieldId::generate();
        let value = json!({
            "id": FieldId::generate().to_string(),
            "type": "document",
            "fields": { "Title": title.to_string() }
        });

        let record: FieldRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.kind(), FieldKind::Document);

        let field = record.into_field();
        let doc = field.downcast::<Document>().unwrap();
        assert_eq!(doc.slot(&TITLE), Some(SlotRef::Proxy(title)));
    }

    #[test]
    fn decoded_list_shadow_matches_elements() {
        let elements = vec![FieldId::generate(), FieldId::generate()];
        let record = FieldRecord {
            id: FieldId::generate(),
            value: RecordValue::List {
                elements: elements.clone(),
                arity: None,
            },
        };
        let field = record.into_field();
        let list = field.downcast::<crate::model::list::ListField>().unwrap();
        assert_eq!(list.elements(), elements.as_slice());
        assert_eq!(list.shadow(), elements.as_slice());
    }
}
