//! Session attachments
//!
//! Binds a resolved permission set to a connected session, one
//! attachment per identity. Attaching again replaces the old attachment;
//! reloading swaps contents without detaching.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{resolve, resolve_defaults, PermissionSet, PermissionStore};

/// Host-side permission surface of a connected session.
///
/// Callbacks run without the manager's map lock held, so they may inspect
/// the manager (`handle`, `is_attached`, ...). They must not attach, reload
/// or detach the identity they are being called for.
pub trait Session: Send + Sync {
    /// Grant or deny a node on the session
    fn set_permission(&self, node: &str, granted: bool);

    /// Remove a node previously set by this engine
    fn unset_permission(&self, node: &str);

    /// Called once after a batch of changes (e.g. to resend command lists)
    fn permissions_changed(&self) {}
}

/// Snapshot of a live attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentHandle {
    /// Unique attachment ID, new on every attach
    pub id: Uuid,
    /// Identity the attachment belongs to
    pub identity: Uuid,
    /// Permissions currently applied
    pub permissions: PermissionSet,
    /// True when resolution failed and only defaults were applied
    pub fail_closed: bool,
    /// When the attachment was created
    pub attached_at: String,
}

struct Attachment {
    handle: AttachmentHandle,
    session: Arc<dyn Session>,
    /// What the session currently holds; also serializes callbacks
    applied: Arc<Mutex<PermissionSet>>,
}

/// Session work taken out of the map, run after the map lock is released
struct Pending {
    identity: Uuid,
    session: Arc<dyn Session>,
    applied: Arc<Mutex<PermissionSet>>,
}

impl Pending {
    fn of(attachment: &Attachment) -> Self {
        Self {
            identity: attachment.handle.identity,
            session: attachment.session.clone(),
            applied: attachment.applied.clone(),
        }
    }
}

/// Outcome of [`AttachmentManager::reload_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub reloaded: usize,
    pub fail_closed: usize,
}

/// Owns the identity → attachment map.
///
/// The map lock is never held while calling into a [`Session`], so
/// session callbacks may query the manager.
#[derive(Default)]
pub struct AttachmentManager {
    attachments: Mutex<HashMap<Uuid, Attachment>>,
}

impl std::fmt::Debug for AttachmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentManager")
            .field("attached", &self.len())
            .finish()
    }
}

/// Resolve for an identity, falling back to defaults on a broken hierarchy
fn resolve_or_defaults(identity: &Uuid, store: &PermissionStore) -> (PermissionSet, bool) {
    match resolve(identity, store) {
        Ok(set) => (set, false),
        Err(e) => {
            error!(
                "Permission resolution failed for {}: {}; applying defaults only",
                identity, e
            );
            (resolve_defaults(store), true)
        }
    }
}

impl AttachmentManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared instance
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Resolve and attach permissions for an identity.
    ///
    /// Any existing attachment for the identity is detached first.
    pub fn attach(
        &self,
        identity: Uuid,
        session: Arc<dyn Session>,
        store: &PermissionStore,
    ) -> AttachmentHandle {
        let (permissions, fail_closed) = resolve_or_defaults(&identity, store);
        let handle = AttachmentHandle {
            id: Uuid::new_v4(),
            identity,
            permissions,
            fail_closed,
            attached_at: chrono::Utc::now().to_rfc3339(),
        };

        let (fresh, replaced) = {
            let mut attachments = self.attachments.lock();
            // Re-attaching the same session keeps one record of what it holds
            let reused = attachments
                .get(&identity)
                .filter(|old| Arc::ptr_eq(&old.session, &session))
                .map(|old| old.applied.clone());
            let attachment = Attachment {
                handle: handle.clone(),
                session,
                applied: reused.clone().unwrap_or_default(),
            };
            let fresh = Pending::of(&attachment);
            let old = attachments.insert(identity, attachment);
            let replaced = old.and_then(|old| {
                debug!("Replacing attachment {} for {}", old.handle.id, identity);
                reused.is_none().then(|| Pending::of(&old))
            });
            (fresh, replaced)
        };

        if let Some(old) = replaced {
            self.sync(old);
        }
        self.sync(fresh);

        info!(
            "Attached {} permissions to {}",
            handle.permissions.len(),
            identity
        );
        handle
    }

    /// Remove an identity's attachment.
    ///
    /// Returns false (and does nothing) if none exists.
    pub fn detach(&self, identity: &Uuid) -> bool {
        let removed = self.attachments.lock().remove(identity).map(|a| Pending::of(&a));
        let Some(old) = removed else {
            debug!("No attachment to detach for {}", identity);
            return false;
        };
        self.sync(old);
        info!("Detached permissions from {}", identity);
        true
    }

    /// Detach every attachment (shutdown)
    pub fn detach_all(&self) -> usize {
        let drained: Vec<Pending> = self
            .attachments
            .lock()
            .drain()
            .map(|(_, a)| Pending::of(&a))
            .collect();
        let count = drained.len();
        for old in drained {
            self.sync(old);
        }
        info!("Detached {} attachments", count);
        count
    }

    /// Re-resolve one attached identity and swap its permissions in place.
    ///
    /// Returns None if the identity is not attached.
    pub fn reload(&self, identity: &Uuid, store: &PermissionStore) -> Option<AttachmentHandle> {
        let (permissions, fail_closed) = resolve_or_defaults(identity, store);
        let (handle, pending) = self.replace_contents(identity, permissions, fail_closed)?;
        self.sync(pending);
        Some(handle)
    }

    /// Re-resolve every attached identity
    pub fn reload_all(&self, store: &PermissionStore) -> ReloadSummary {
        let mut summary = ReloadSummary::default();

        for identity in self.attached() {
            // One identity's failure only degrades that identity
            let (permissions, fail_closed) = resolve_or_defaults(&identity, store);
            let Some((_, pending)) = self.replace_contents(&identity, permissions, fail_closed)
            else {
                // Disconnected while we were resolving
                continue;
            };
            self.sync(pending);
            summary.reloaded += 1;
            if fail_closed {
                summary.fail_closed += 1;
            }
        }

        info!(
            "Reloaded {} attachments ({} fail-closed)",
            summary.reloaded, summary.fail_closed
        );
        summary
    }

    /// Current attachment for an identity
    pub fn handle(&self, identity: &Uuid) -> Option<AttachmentHandle> {
        self.attachments
            .lock()
            .get(identity)
            .map(|a| a.handle.clone())
    }

    pub fn is_attached(&self, identity: &Uuid) -> bool {
        self.attachments.lock().contains_key(identity)
    }

    /// Attached identities, sorted
    pub fn attached(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.attachments.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.attachments.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a fully resolved set on a live attachment
    fn replace_contents(
        &self,
        identity: &Uuid,
        permissions: PermissionSet,
        fail_closed: bool,
    ) -> Option<(AttachmentHandle, Pending)> {
        let mut attachments = self.attachments.lock();
        let attachment = attachments.get_mut(identity)?;
        debug!(
            "Reloaded {} for {} ({} nodes)",
            attachment.handle.id,
            identity,
            permissions.len()
        );
        attachment.handle.permissions = permissions;
        attachment.handle.fail_closed = fail_closed;
        Some((attachment.handle.clone(), Pending::of(attachment)))
    }

    /// The set a session should hold: the live attachment's contents while
    /// the session still backs it, nothing once replaced or detached
    fn desired(&self, pending: &Pending) -> PermissionSet {
        self.attachments
            .lock()
            .get(&pending.identity)
            .filter(|a| Arc::ptr_eq(&a.applied, &pending.applied))
            .map(|a| a.handle.permissions.clone())
            .unwrap_or_default()
    }

    /// Bring a session in line with its desired set.
    ///
    /// New values are written first so nodes kept across the swap are never
    /// missing; stale nodes are unset afterwards. Concurrent syncs of one
    /// session queue on its `applied` lock and each reads the latest desired
    /// set, so the session converges on the most recent state.
    fn sync(&self, pending: Pending) {
        let mut applied = pending.applied.lock();
        let desired = self.desired(&pending);
        let session = pending.session.as_ref();

        for (node, granted) in desired.iter() {
            if applied.get(node) != Some(granted) {
                session.set_permission(node, granted);
            }
        }
        for (node, _) in applied.iter() {
            if !desired.contains(node) {
                session.unset_permission(node);
            }
        }
        session.permissions_changed();
        *applied = desired;
    }
}
