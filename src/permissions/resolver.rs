//! User permission resolution
//!
//! Composes defaults, group closures and user overrides into the final
//! set attached to a session.

use tracing::{debug, warn};
use uuid::Uuid;

use super::inheritance::ClosureCache;
use super::{PermissionError, PermissionSet, PermissionStore, User};

/// The default layer on its own. Also the fail-closed fallback.
pub fn resolve_defaults(store: &PermissionStore) -> PermissionSet {
    PermissionSet::from_stored(store.default_permissions())
}

/// Resolve the effective permissions of an identity.
///
/// An identity with no record resolves to the defaults. A cycle in any
/// of the user's groups fails the whole resolution rather than dropping
/// that group.
pub fn resolve(identity: &Uuid, store: &PermissionStore) -> Result<PermissionSet, PermissionError> {
    match store.user(identity) {
        Some(user) => resolve_user(user, store),
        None => Ok(resolve_defaults(store)),
    }
}

/// Resolve a user record against the store
pub fn resolve_user(user: &User, store: &PermissionStore) -> Result<PermissionSet, PermissionError> {
    let mut set = resolve_defaults(store);
    let mut closures = ClosureCache::new(store);

    for group in &user.groups {
        if !store.has_group(group) {
            warn!("Skipping membership in missing group {}", group);
            continue;
        }
        let closure = closures.closure(group)?;
        set.overlay(&closure);
    }

    set.overlay(&PermissionSet::from_stored(&user.permissions));

    debug!(
        "Resolved {} nodes for {}",
        set.len(),
        user.name.as_deref().unwrap_or("unnamed user")
    );
    Ok(set)
}
