//! Document slot access and prototype delegation.
//!
//! # Responsibility
//! - Resolve keys through a document's own slots, then its prototype chain.
//! - Promote proxied slots once their remote field becomes resident.
//! - Write slots with undo and push.
//!
//! # Invariants
//! - The nearest document in the chain that binds a key wins.
//! - A chain walk visits each document at most once; a cycle ends the walk
//!   as if the chain were exhausted.
//! - At most one promotion waiter exists per (document, key, remote id).

use crate::error::{GraphError, GraphResult};
use crate::graph::{DocGraph, FieldEvent};
use crate::keys::{intern, Key, PROTOTYPE, TITLE};
use crate::model::basic::{BasicField, ScalarData, TextField};
use crate::model::document::{Document, SlotRef};
use crate::model::field::{DataField, FieldBody, FieldId, FieldKind, FieldType, Lookup};
use crate::model::list::ListField;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use url::Url;

const UNTITLED: &str = "<untitled>";

/// Outcome of walking a document chain for one key.
enum Walk {
    Found(FieldId),
    /// Blocked on the fetch of this remote id.
    Waiting(FieldId),
    Missing,
}

impl Walk {
    fn into_lookup(self) -> Lookup<FieldId> {
        match self {
            Self::Found(id) => Lookup::Resolved(id),
            Self::Waiting(_) => Lookup::Pending,
            Self::Missing => Lookup::Absent,
        }
    }
}

type SlotCallback = Box<dyn FnOnce(&mut DocGraph, FieldId)>;

impl DocGraph {
    /// Reads `key` from `doc`, falling back along the prototype chain unless
    /// `ignore_prototype` is set.
    ///
    /// Hitting a proxy starts (or joins) its fetch and yields `Pending`.
    pub fn get(&mut self, doc: FieldId, key: &Key, ignore_prototype: bool) -> Lookup<FieldId> {
        self.walk(doc, key, ignore_prototype).into_lookup()
    }

    /// Like `get`, but delivers the field to `callback` once available.
    ///
    /// `callback` runs at most once, and never when the key is absent from
    /// the whole chain or a link on the way turns out to be missing.
    pub fn get_async(
        &mut self,
        doc: FieldId,
        key: &Key,
        ignore_prototype: bool,
        callback: impl FnOnce(&mut DocGraph, FieldId) + 'static,
    ) {
        self.get_async_boxed(doc, key.clone(), ignore_prototype, Box::new(callback));
    }

    fn get_async_boxed(
        &mut self,
        doc: FieldId,
        key: Key,
        ignore_prototype: bool,
        callback: SlotCallback,
    ) {
        match self.walk(doc, &key, ignore_prototype) {
            Walk::Found(id) => callback(self, id),
            Walk::Missing => {}
            Walk::Waiting(remote) => self.resolve_with(remote, move |graph, resolved| {
                if resolved.is_some() {
                    graph.get_async_boxed(doc, key, ignore_prototype, callback);
                }
            }),
        }
    }

    /// Typed read; a kind mismatch reads as `Absent`.
    pub fn get_t<F: FieldType>(
        &mut self,
        doc: FieldId,
        key: &Key,
        ignore_prototype: bool,
    ) -> Lookup<&F> {
        match self.get(doc, key, ignore_prototype) {
            Lookup::Resolved(id) => match self.field_as::<F>(id) {
                Some(field) => Lookup::Resolved(field),
                None => Lookup::Absent,
            },
            Lookup::Pending => Lookup::Pending,
            Lookup::Absent => Lookup::Absent,
        }
    }

    /// Plain data behind `key`, or `default` when pending, absent or of another kind.
    pub fn get_data<F: DataField>(&mut self, doc: FieldId, key: &Key, default: F::Data) -> F::Data {
        self.get_t::<F>(doc, key, false)
            .map(|field| field.data())
            .resolved()
            .unwrap_or(default)
    }

    pub fn get_number(&mut self, doc: FieldId, key: &Key, default: f64) -> f64 {
        self.get_data::<BasicField<f64>>(doc, key, default)
    }

    pub fn get_text(&mut self, doc: FieldId, key: &Key, default: &str) -> String {
        self.get_data::<TextField>(doc, key, default.to_string())
    }

    pub fn get_bool(&mut self, doc: FieldId, key: &Key, default: bool) -> bool {
        self.get_data::<BasicField<bool>>(doc, key, default)
    }

    pub fn get_url(&mut self, doc: FieldId, key: &Key) -> Option<Url> {
        self.get_t::<BasicField<Url>>(doc, key, false)
            .map(|field| field.data().clone())
            .resolved()
    }

    pub fn get_list(&mut self, doc: FieldId, key: &Key) -> Option<Vec<FieldId>> {
        self.get_t::<ListField>(doc, key, false)
            .map(|list| list.elements().to_vec())
            .resolved()
    }

    pub fn title(&mut self, doc: FieldId) -> String {
        self.get_text(doc, &TITLE, UNTITLED)
    }

    /// Binds `key` to `value` (`None` deletes the slot).
    ///
    /// With `set_on_prototype`, the write goes to `doc`'s prototype, waiting
    /// for it when it is still being fetched. A document without a
    /// prototype takes the write itself.
    ///
    /// # Errors
    /// - `NotResident` / `WrongKind` when the target is not a resident document.
    pub fn set(
        &mut self,
        doc: FieldId,
        key: &Key,
        value: Option<FieldId>,
        set_on_prototype: bool,
    ) -> GraphResult<()> {
        if !set_on_prototype {
            return self.set_own(doc, key, value);
        }
        self.require::<Document>(doc)?;
        match self.walk(doc, &PROTOTYPE, true) {
            Walk::Found(proto) => self.set_own(proto, key, value),
            Walk::Missing => self.set_own(doc, key, value),
            Walk::Waiting(remote) => {
                let key = key.clone();
                self.resolve_with(remote, move |graph, resolved| {
                    if resolved.is_none() {
                        return;
                    }
                    if let Err(err) = graph.set(doc, &key, value, true) {
                        warn!("event=set_on_prototype module=graph status=error doc={doc} error={err}");
                    }
                });
                Ok(())
            }
        }
    }

    fn set_own(&mut self, doc: FieldId, key: &Key, value: Option<FieldId>) -> GraphResult<()> {
        let old = self.require::<Document>(doc)?.slot(key).map(SlotRef::id);
        if old == value {
            return Ok(());
        }
        self.write_slot(doc, key, value);
        let undo_key = key.clone();
        let redo_key = key.clone();
        self.record(
            move |graph| graph.write_slot(doc, &undo_key, old),
            move |graph| graph.write_slot(doc, &redo_key, value),
        );
        Ok(())
    }

    fn write_slot(&mut self, doc: FieldId, key: &Key, value: Option<FieldId>) {
        let resident = value.is_some_and(|id| self.gateway.is_resolved(id));
        let Some(document) = self.document_mut(doc) else {
            return;
        };
        match value {
            Some(id) if resident => document.put_resident(key, id),
            Some(id) => document.put_proxy(key, id),
            None => {
                document.remove(key);
            }
        }
        self.push(doc);
        self.notify(FieldEvent::SlotChanged {
            document: doc,
            key: key.clone(),
        });
    }

    /// Returns the field behind `key` if it holds an `F`, otherwise stores a
    /// fresh default `F` there and returns it.
    ///
    /// A pending value is returned as `Pending`; nothing is created over it.
    pub fn get_or_create<F: FieldType + Default>(
        &mut self,
        doc: FieldId,
        key: &Key,
        ignore_prototype: bool,
    ) -> GraphResult<Lookup<FieldId>> {
        match self.get(doc, key, ignore_prototype) {
            Lookup::Resolved(id) if self.field_as::<F>(id).is_some() => Ok(Lookup::Resolved(id)),
            Lookup::Pending => Ok(Lookup::Pending),
            Lookup::Resolved(_) | Lookup::Absent => {
                self.require::<Document>(doc)?;
                let id = self.create(F::default().into_body());
                self.set_own(doc, key, Some(id))?;
                Ok(Lookup::Resolved(id))
            }
        }
    }

    /// Writes `value` into `doc`'s own field for `key`.
    ///
    /// Updates the field in place when it already holds a `T`. Otherwise a
    /// new field is created when the slot is empty, or when
    /// `replace_wrong_type` is set. Returns the id now holding the value, or
    /// `None` when the slot was left alone.
    pub fn set_data<T: ScalarData>(
        &mut self,
        doc: FieldId,
        key: &Key,
        value: T,
        replace_wrong_type: bool,
    ) -> GraphResult<Option<FieldId>> {
        self.require::<Document>(doc)?;
        if !value.is_storable() {
            return Err(GraphError::NonFiniteNumber);
        }
        match self.walk(doc, key, true) {
            Walk::Found(id) if self.field_as::<BasicField<T>>(id).is_some() => {
                self.set_value(id, value)?;
                Ok(Some(id))
            }
            Walk::Found(_) | Walk::Waiting(_) if !replace_wrong_type => Ok(None),
            _ => {
                let id = self.create(BasicField::new(value));
                self.set_own(doc, key, Some(id))?;
                Ok(Some(id))
            }
        }
    }

    pub fn set_text(
        &mut self,
        doc: FieldId,
        key: &Key,
        value: impl Into<String>,
    ) -> GraphResult<FieldId> {
        let id = self.set_data(doc, key, value.into(), true)?;
        id.ok_or(GraphError::NotResident(doc))
    }

    pub fn set_number(&mut self, doc: FieldId, key: &Key, value: f64) -> GraphResult<FieldId> {
        let id = self.set_data(doc, key, value, true)?;
        id.ok_or(GraphError::NotResident(doc))
    }

    pub fn set_bool(&mut self, doc: FieldId, key: &Key, value: bool) -> GraphResult<FieldId> {
        let id = self.set_data(doc, key, value, true)?;
        id.ok_or(GraphError::NotResident(doc))
    }

    /// Untyped write: coerces into the own field when one is resident,
    /// otherwise creates a field of `kind` from `raw`.
    ///
    /// Returns `false` when `raw` does not match the target kind.
    pub fn set_val(
        &mut self,
        doc: FieldId,
        key: &Key,
        raw: &Value,
        kind: FieldKind,
    ) -> GraphResult<bool> {
        self.require::<Document>(doc)?;
        match self.walk(doc, key, true) {
            Walk::Found(id) => Ok(self.try_coerce_and_set(id, raw)),
            Walk::Waiting(_) => Ok(false),
            Walk::Missing => match FieldBody::from_raw(kind, raw) {
                Some(body) => {
                    let id = self.create(body);
                    self.set_own(doc, key, Some(id))?;
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    /// The document's own prototype link.
    pub fn prototype(&mut self, doc: FieldId) -> Lookup<FieldId> {
        self.get(doc, &PROTOTYPE, true)
    }

    /// New empty document delegating to `proto`. Construction records no undo.
    pub fn make_delegate(&mut self, proto: FieldId) -> FieldId {
        let mut document = Document::new();
        if self.gateway.is_resolved(proto) {
            document.put_resident(&PROTOTYPE, proto);
        } else {
            document.put_proxy(&PROTOTYPE, proto);
        }
        self.create(document)
    }

    /// New empty document sharing `doc`'s prototype, i.e. a sibling delegate.
    ///
    /// A document without a prototype gets a delegate of itself instead.
    pub fn create_alias(&mut self, doc: FieldId) -> GraphResult<FieldId> {
        let link = self.require::<Document>(doc)?.slot(&PROTOTYPE);
        let mut document = Document::new();
        match link {
            Some(SlotRef::Resident(proto)) => document.put_resident(&PROTOTYPE, proto),
            Some(SlotRef::Proxy(remote)) => document.put_proxy(&PROTOTYPE, remote),
            None => return Ok(self.make_delegate(doc)),
        }
        Ok(self.create(document))
    }

    /// Documents from `doc` to the chain root, stopping at the first link
    /// that is not resident yet.
    pub fn all_prototypes(&mut self, doc: FieldId) -> Vec<FieldId> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = doc;
        while self.document(current).is_some() && visited.insert(current) {
            chain.push(current);
            match self.walk(current, &PROTOTYPE, true) {
                Walk::Found(next) => current = next,
                Walk::Waiting(_) | Walk::Missing => break,
            }
        }
        chain
    }

    fn walk(&mut self, doc: FieldId, key: &Key, ignore_prototype: bool) -> Walk {
        let mut visited = HashSet::new();
        let mut current = doc;
        loop {
            if !visited.insert(current) {
                warn!(
                    "event=prototype_cycle module=graph status=warn doc={} at={} depth={}",
                    doc,
                    current,
                    visited.len()
                );
                return Walk::Missing;
            }
            let Some(slot) = self.document(current).map(|document| document.slot(key)) else {
                return Walk::Missing;
            };
            match slot {
                Some(SlotRef::Resident(id)) => return Walk::Found(id),
                Some(SlotRef::Proxy(remote)) => return self.resolve_proxy(current, key, remote),
                None => {}
            }
            if ignore_prototype || *key == *PROTOTYPE {
                return Walk::Missing;
            }
            match self.walk(current, &PROTOTYPE, true) {
                Walk::Found(proto) => current = proto,
                waiting @ Walk::Waiting(_) => return waiting,
                Walk::Missing => return Walk::Missing,
            }
        }
    }

    fn resolve_proxy(&mut self, doc: FieldId, key: &Key, remote: FieldId) -> Walk {
        match self.gateway.request(remote) {
            Lookup::Resolved(id) => {
                self.promote(doc, key, id);
                Walk::Found(id)
            }
            Lookup::Absent => Walk::Missing,
            Lookup::Pending => {
                let key_id = key.id();
                if self.promotions.insert((doc, key_id, remote)) {
                    let key = key.clone();
                    let waiter = Box::new(move |graph: &mut DocGraph, resolved: Option<FieldId>| {
                        graph.promotions.remove(&(doc, key_id, remote));
                        if let Some(id) = resolved {
                            graph.promote(doc, &key, id);
                        }
                    });
                    if self.gateway.subscribe(remote, waiter).is_err() {
                        self.promotions.remove(&(doc, key_id, remote));
                    }
                }
                Walk::Waiting(remote)
            }
        }
    }

    fn promote(&mut self, doc: FieldId, key: &Key, id: FieldId) {
        let Some(document) = self.document_mut(doc) else {
            return;
        };
        if !document.promote(key, id) {
            debug!("event=proxy_promoted module=graph status=skipped reason=slot_replaced doc={doc}");
            return;
        }
        info!("event=proxy_promoted module=graph status=ok doc={doc} key={key} id={id}");
        self.notify(FieldEvent::Promoted {
            document: doc,
            key: key.clone(),
            field: id,
        });
    }

    /// Replaces the slot map with server state. Unchanged bindings keep
    /// their resident field.
    pub(crate) fn replace_slots(&mut self, doc: FieldId, fields: BTreeMap<String, FieldId>) {
        let incoming: Vec<(Key, FieldId)> = fields
            .into_iter()
            .map(|(name, id)| (intern(&name), id))
            .collect();
        let Some(document) = self.document(doc) else {
            return;
        };
        let stale: Vec<Key> = document
            .keys()
            .into_iter()
            .filter(|key| !incoming.iter().any(|(incoming_key, _)| incoming_key == key))
            .collect();
        let changed: Vec<(Key, FieldId)> = incoming
            .into_iter()
            .filter(|(key, id)| document.slot(key).map(SlotRef::id) != Some(*id))
            .collect();

        for key in stale {
            self.write_slot(doc, &key, None);
        }
        for (key, id) in changed {
            self.write_slot(doc, &key, Some(id));
        }
    }
}
