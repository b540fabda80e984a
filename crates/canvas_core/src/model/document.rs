//! Document slot storage.
//!
//! # Responsibility
//! - Bind keys to resident field ids or to unresolved remote ids (proxies).
//!
//! # Invariants
//! - A key lives in at most one of `fields` and `proxies`.
//! - A resident slot always points at a field the gateway holds as resolved.

use crate::keys::{Key, KeyId};
use crate::model::field::FieldId;
use std::collections::HashMap;

/// One key binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub key: Key,
    pub field: FieldId,
}

/// Where a key's value currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRef {
    Resident(FieldId),
    Proxy(FieldId),
}

impl SlotRef {
    pub fn id(self) -> FieldId {
        match self {
            Self::Resident(id) | Self::Proxy(id) => id,
        }
    }
}

/// Named-slot container, optionally delegating to a prototype through the
/// `Prototype` key.
#[derive(Debug, Clone, Default)]
pub struct Document {
    fields: HashMap<KeyId, Slot>,
    proxies: HashMap<KeyId, Slot>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, key: &Key) -> Option<SlotRef> {
        if let Some(slot) = self.fields.get(&key.id()) {
            return Some(SlotRef::Resident(slot.field));
        }
        self.proxies
            .get(&key.id())
            .map(|slot| SlotRef::Proxy(slot.field))
    }

    pub fn resident(&self, key: &Key) -> Option<FieldId> {
        self.fields.get(&key.id()).map(|slot| slot.field)
    }

    pub fn proxy(&self, key: &Key) -> Option<FieldId> {
        self.proxies.get(&key.id()).map(|slot| slot.field)
    }

    pub fn has(&self, key: &Key) -> bool {
        self.slot(key).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = &Slot> {
        self.fields.values()
    }

    pub fn proxies(&self) -> impl Iterator<Item = &Slot> {
        self.proxies.values()
    }

    /// Every bound key, resident and proxied, sorted by name.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .fields
            .values()
            .chain(self.proxies.values())
            .map(|slot| slot.key.clone())
            .collect();
        keys.sort_by(|a, b| a.name().cmp(b.name()));
        keys
    }

    pub fn len(&self) -> usize {
        self.fields.len() + self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.proxies.is_empty()
    }

    pub(crate) fn put_resident(&mut self, key: &Key, field: FieldId) {
        self.proxies.remove(&key.id());
        self.fields.insert(
            key.id(),
            Slot {
                key: key.clone(),
                field,
            },
        );
    }

    pub(crate) fn put_proxy(&mut self, key: &Key, field: FieldId) {
        self.fields.remove(&key.id());
        self.proxies.insert(
            key.id(),
            Slot {
                key: key.clone(),
                field,
            },
        );
    }

    pub(crate) fn remove(&mut self, key: &Key) -> Option<SlotRef> {
        if let Some(slot) = self.fields.remove(&key.id()) {
            return Some(SlotRef::Resident(slot.field));
        }
        self.proxies
            .remove(&key.id())
            .map(|slot| SlotRef::Proxy(slot.field))
    }

    /// Moves `key` from proxies to fields if it still proxies `remote`.
    ///
    /// Returns `false` when a local write replaced the proxy meanwhile.
    pub(crate) fn promote(&mut self, key: &Key, remote: FieldId) -> bool {
        match self.proxies.get(&key.id()) {
            Some(slot) if slot.field == remote => {
                self.put_resident(key, remote);
                true
            }
            _ => false,
        }
    }
}
