//! Scalar field reads, writes and copies.

use crate::error::{GraphError, GraphResult};
use crate::graph::{DocGraph, FieldEvent};
use crate::model::basic::{BasicField, ScalarData};
use crate::model::field::{FieldBody, FieldId, FieldKind};
use serde_json::Value;
use url::Url;

impl DocGraph {
    /// Current value of a resident scalar; `None` when absent or of another kind.
    pub fn value<T: ScalarData>(&self, id: FieldId) -> Option<T> {
        self.field_as::<BasicField<T>>(id)
            .map(|field| field.data().clone())
    }

    /// Replaces the value of a resident scalar.
    ///
    /// Writing the current value is a no-op. Otherwise records one undo
    /// event, pushes, and notifies observers.
    ///
    /// # Errors
    /// - `NotResident` when `id` is not resident.
    /// - `WrongKind` when the field does not hold a `T`.
    /// - `NonFiniteNumber` for NaN or an infinity.
    pub fn set_value<T: ScalarData>(&mut self, id: FieldId, value: T) -> GraphResult<()> {
        if !value.is_storable() {
            return Err(GraphError::NonFiniteNumber);
        }
        if *self.require::<BasicField<T>>(id)?.data() == value {
            return Ok(());
        }
        let Some(old) = self.write_value(id, value.clone()) else {
            return Err(GraphError::NotResident(id));
        };
        self.record(
            move |graph| {
                graph.write_value(id, old.clone());
            },
            move |graph| {
                graph.write_value(id, value.clone());
            },
        );
        Ok(())
    }

    fn write_value<T: ScalarData>(&mut self, id: FieldId, value: T) -> Option<T> {
        let old = self.require_mut::<BasicField<T>>(id).ok()?.replace(value);
        self.push(id);
        self.notify(FieldEvent::ValueChanged { field: id });
        Some(old)
    }

    /// Sets an untyped value if its runtime type matches the field's kind.
    ///
    /// Returns `false` without mutating on mismatch, or when `id` is not a
    /// resident scalar.
    pub fn try_coerce_and_set(&mut self, id: FieldId, raw: &Value) -> bool {
        match self.kind(id) {
            Some(FieldKind::Number) => self.coerce_into::<f64>(id, raw),
            Some(FieldKind::Text) => self.coerce_into::<String>(id, raw),
            Some(FieldKind::Url) => self.coerce_into::<Url>(id, raw),
            Some(FieldKind::Boolean) => self.coerce_into::<bool>(id, raw),
            Some(FieldKind::List) | Some(FieldKind::Document) | None => false,
        }
    }

    fn coerce_into<T: ScalarData>(&mut self, id: FieldId, raw: &Value) -> bool {
        match T::coerce(raw) {
            Some(value) => self.set_value(id, value).is_ok(),
            None => false,
        }
    }

    /// Copies a resident field under a fresh id.
    ///
    /// Lists copy the container (same element ids, no scripts); documents copy
    /// the slot map including proxies.
    pub fn copy_field(&mut self, id: FieldId) -> GraphResult<FieldId> {
        let field = self.field(id).ok_or(GraphError::NotResident(id))?;
        let body = match field.body() {
            FieldBody::Number(f) => FieldBody::Number(f.clone()),
            FieldBody::Text(f) => FieldBody::Text(f.clone()),
            FieldBody::Url(f) => FieldBody::Url(f.clone()),
            FieldBody::Boolean(f) => FieldBody::Boolean(f.clone()),
            FieldBody::List(list) => FieldBody::List(list.copy_container()),
            FieldBody::Document(doc) => FieldBody::Document(doc.clone()),
        };
        Ok(self.create(body))
    }
}
