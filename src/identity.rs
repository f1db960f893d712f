//! Display name to identity lookup
//!
//! Names are mutable, so the store is keyed by UUID. Administrative
//! commands accept either a known name or a UUID and resolve it here.

use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::permissions::PermissionStore;

/// Resolves a player argument to a stable identity
pub trait IdentityResolver: Send + Sync {
    fn lookup(&self, name_or_id: &str) -> Option<Uuid>;
}

/// Looks up last-known names recorded in the store, falling back to
/// parsing the argument as a UUID
pub struct StoreDirectory {
    store: Arc<RwLock<PermissionStore>>,
}

impl StoreDirectory {
    pub fn new(store: Arc<RwLock<PermissionStore>>) -> Self {
        Self { store }
    }
}

impl IdentityResolver for StoreDirectory {
    fn lookup(&self, name_or_id: &str) -> Option<Uuid> {
        if let Some(id) = self.store.read().identity_by_name(name_or_id) {
            return Some(id);
        }
        Uuid::parse_str(name_or_id).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_then_uuid() {
        let store = Arc::new(RwLock::new(PermissionStore::new()));
        let alice = Uuid::new_v4();
        store.write().remember_name(alice, "Alice");

        let directory = StoreDirectory::new(store);
        assert_eq!(directory.lookup("alice"), Some(alice));

        let other = Uuid::new_v4();
        assert_eq!(directory.lookup(&other.to_string()), Some(other));
        assert_eq!(directory.lookup("nobody"), None);
    }
}
