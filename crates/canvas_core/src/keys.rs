//! Interned field keys.
//!
//! # Responsibility
//! - Map key names to stable identities shared by every document.
//! - Provide the well-known key set used across core.
//!
//! # Invariants
//! - A key id is a pure function of its name (UUID v5 over a fixed namespace),
//!   so keys interned in different processes agree on identity.
//! - The registry never forgets a key for the process lifetime.

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Namespace for name-derived key ids. Changing it re-keys every document.
const KEY_NAMESPACE: Uuid = Uuid::from_u128(0x8f0e_51c2_7d3a_4b16_9c55_0a6e_d2b4_7f31);

static REGISTRY: Lazy<Mutex<HashMap<String, Key>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Stable identity of a key slot.
pub type KeyId = Uuid;

/// Interned named slot identifier.
///
/// Equality and hashing use the derived id only.
#[derive(Clone, Debug)]
pub struct Key {
    id: KeyId,
    name: Arc<str>,
}

impl Key {
    /// Interns `name`; see [`intern`].
    pub fn intern(name: &str) -> Self {
        intern(name)
    }

    pub fn id(&self) -> KeyId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(intern(&name))
    }
}

/// Returns the process-wide key for `name`, creating it on first use.
///
/// Never fails: the id is derived from the name, the registry only
/// deduplicates the name allocation.
pub fn intern(name: &str) -> Key {
    let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(key) = registry.get(name) {
        return key.clone();
    }

    let key = Key {
        id: derive_key_id(name),
        name: Arc::from(name),
    };
    registry.insert(name.to_string(), key.clone());
    key
}

/// Number of distinct key names interned so far.
pub fn registered_count() -> usize {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .len()
}

fn derive_key_id(name: &str) -> KeyId {
    Uuid::new_v5(&KEY_NAMESPACE, name.as_bytes())
}

/// Delegation link consulted by prototype-chain lookups.
pub static PROTOTYPE: Lazy<Key> = Lazy::new(|| intern("Prototype"));
pub static TITLE: Lazy<Key> = Lazy::new(|| intern("Title"));
pub static DATA: Lazy<Key> = Lazy::new(|| intern("Data"));
pub static LAYOUT: Lazy<Key> = Lazy::new(|| intern("Layout"));
pub static X: Lazy<Key> = Lazy::new(|| intern("X"));
pub static Y: Lazy<Key> = Lazy::new(|| intern("Y"));
pub static WIDTH: Lazy<Key> = Lazy::new(|| intern("Width"));
pub static HEIGHT: Lazy<Key> = Lazy::new(|| intern("Height"));
pub static PAN_X: Lazy<Key> = Lazy::new(|| intern("PanX"));
pub static PAN_Y: Lazy<Key> = Lazy::new(|| intern("PanY"));
pub static SCALE: Lazy<Key> = Lazy::new(|| intern("Scale"));

#[cfg(test)]
mod tests {
    use super::{intern, registered_count, Key, PROTOTYPE};

    #[test]
    fn same_name_yields_same_identity() {
        let first = intern("Caption");
        let second = Key::intern("Caption");

        assert_eq!(first, second);
        assert_eq!(first.id(), second.id());
        assert_eq!(second.name(), "Caption");
    }

    #[test]
    fn distinct_names_yield_distinct_ids() {
        assert_ne!(intern("Caption").id(), intern("caption").id());
    }

    #[test]
    fn id_is_derived_from_name_only() {
        let id = intern("Derived").id();
        assert_eq!(id, super::derive_key_id("Derived"));
        assert_eq!(id.get_version_num(), 5);
    }

    #[test]
    fn registry_deduplicates_names() {
        intern("RegistryProbe");
        let before = registered_count();
        intern("RegistryProbe");
        assert_eq!(registered_count(), before);
    }

    #[test]
    fn well_known_keys_are_interned() {
        assert_eq!(*PROTOTYPE, intern("Prototype"));
    }

    #[test]
    fn key_serializes_as_its_name() {
        let json = serde_json::to_string(&intern("Width")).unwrap();
        assert_eq!(json, "\"Width\"");

        let decoded: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, intern("Width"));
    }
}
