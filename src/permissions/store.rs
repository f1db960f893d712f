//! In-memory permission configuration
//!
//! Holds default permissions, groups and users with typed accessors.
//! The store never persists itself; callers save it through
//! [`crate::db::Database`] after a successful edit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::inheritance;
use super::{PermissionError, PermissionNode};

/// A named bundle of permissions with optional parents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Raw node strings in insertion order (may include `-` denials)
    pub permissions: Vec<String>,
    /// Parent group names in precedence order
    pub parents: Vec<String>,
    /// Display prefix shown next to member names
    pub prefix: Option<String>,
}

/// Per-user memberships and overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Last-known display name, refreshed on connect
    pub name: Option<String>,
    /// Group memberships in precedence order (later wins)
    pub groups: Vec<String>,
    /// Personal overrides, highest precedence
    pub permissions: Vec<String>,
}

/// Listing entry for a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub prefix: Option<String>,
    pub permissions: usize,
    pub members: usize,
}

/// Authoritative permission configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStore {
    defaults: Vec<String>,
    groups: BTreeMap<String, Group>,
    users: BTreeMap<Uuid, User>,
}

fn validate_group_name(name: &str) -> Result<(), PermissionError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(PermissionError::InvalidGroupName(name.to_string()));
    }
    Ok(())
}

fn group_subject(name: &str) -> String {
    format!("group {}", name)
}

fn user_subject(identity: &Uuid) -> String {
    format!("user {}", identity)
}

/// Push `item` unless an identical entry exists
fn push_unique(list: &mut Vec<String>, item: &str, subject: String, what: &str) -> Result<(), PermissionError> {
    if list.iter().any(|existing| existing == item) {
        return Err(PermissionError::AlreadyPresent {
            subject,
            item: format!("{} {}", what, item),
        });
    }
    list.push(item.to_string());
    Ok(())
}

/// Remove every entry equal to `item`
fn remove_all(list: &mut Vec<String>, item: &str, subject: String, what: &str) -> Result<(), PermissionError> {
    let before = list.len();
    list.retain(|existing| existing != item);
    if list.len() == before {
        return Err(PermissionError::NotPresent {
            subject,
            item: format!("{} {}", what, item),
        });
    }
    Ok(())
}

impl PermissionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a store from loaded parts
    pub fn from_parts(
        defaults: Vec<String>,
        groups: BTreeMap<String, Group>,
        users: BTreeMap<Uuid, User>,
    ) -> Self {
        Self {
            defaults,
            groups,
            users,
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Get a group by name
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// Get a user's record, if one exists
    pub fn user(&self, identity: &Uuid) -> Option<&User> {
        self.users.get(identity)
    }

    /// Get a user's record, or an empty one (no groups, no overrides)
    pub fn user_or_default(&self, identity: &Uuid) -> User {
        self.users.get(identity).cloned().unwrap_or_default()
    }

    /// Global default permissions, raw
    pub fn default_permissions(&self) -> &[String] {
        &self.defaults
    }

    /// All groups, lexicographic by name
    pub fn groups(&self) -> impl Iterator<Item = (&str, &Group)> {
        self.groups.iter().map(|(name, group)| (name.as_str(), group))
    }

    /// All users, ordered by identity
    pub fn users(&self) -> impl Iterator<Item = (&Uuid, &User)> {
        self.users.iter()
    }

    /// Summaries of every group, lexicographic by name
    pub fn list_groups(&self) -> Vec<GroupSummary> {
        self.groups
            .iter()
            .map(|(name, group)| GroupSummary {
                name: name.clone(),
                prefix: group.prefix.clone(),
                permissions: group.permissions.len(),
                members: self.list_users_in_group(name).len(),
            })
            .collect()
    }

    /// Identities whose membership list contains `name`, ordered by identity
    pub fn list_users_in_group(&self, name: &str) -> Vec<Uuid> {
        self.users
            .iter()
            .filter(|(_, user)| user.groups.iter().any(|g| g == name))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Groups listing `name` as a direct parent, lexicographic
    pub fn children_of(&self, name: &str) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, group)| group.parents.iter().any(|p| p == name))
            .map(|(child, _)| child.clone())
            .collect()
    }

    /// Display prefix of the user's first group
    pub fn user_prefix(&self, identity: &Uuid) -> Option<&str> {
        let first = self.users.get(identity)?.groups.first()?;
        self.groups.get(first)?.prefix.as_deref()
    }

    /// Find an identity by last-known name (case-insensitive)
    pub fn identity_by_name(&self, name: &str) -> Option<Uuid> {
        self.users
            .iter()
            .find(|(_, user)| {
                user.name
                    .as_deref()
                    .is_some_and(|known| known.eq_ignore_ascii_case(name))
            })
            .map(|(id, _)| *id)
    }

    // ------------------------------------------------------------------
    // Group edits
    // ------------------------------------------------------------------

    fn group_mut(&mut self, name: &str) -> Result<&mut Group, PermissionError> {
        self.groups
            .get_mut(name)
            .ok_or_else(|| PermissionError::GroupNotFound(name.to_string()))
    }

    /// Create an empty group
    pub fn create_group(&mut self, name: &str) -> Result<(), PermissionError> {
        validate_group_name(name)?;
        if self.groups.contains_key(name) {
            return Err(PermissionError::GroupExists(name.to_string()));
        }
        self.groups.insert(name.to_string(), Group::default());
        debug!("Created group {}", name);
        Ok(())
    }

    /// Delete a group and every reference to it
    pub fn delete_group(&mut self, name: &str) -> Result<(), PermissionError> {
        if self.groups.remove(name).is_none() {
            return Err(PermissionError::GroupNotFound(name.to_string()));
        }
        for group in self.groups.values_mut() {
            group.parents.retain(|p| p != name);
        }
        for user in self.users.values_mut() {
            user.groups.retain(|g| g != name);
        }
        debug!("Deleted group {}", name);
        Ok(())
    }

    /// Replace a group's permission list wholesale
    pub fn set_group_permissions(
        &mut self,
        name: &str,
        permissions: Vec<PermissionNode>,
    ) -> Result<(), PermissionError> {
        let group = self.group_mut(name)?;
        group.permissions = permissions.iter().map(ToString::to_string).collect();
        Ok(())
    }

    pub fn add_group_permission(&mut self, name: &str, node: &PermissionNode) -> Result<(), PermissionError> {
        let group = self.group_mut(name)?;
        push_unique(&mut group.permissions, &node.to_string(), group_subject(name), "permission")
    }

    pub fn remove_group_permission(&mut self, name: &str, node: &PermissionNode) -> Result<(), PermissionError> {
        let group = self.group_mut(name)?;
        remove_all(&mut group.permissions, &node.to_string(), group_subject(name), "permission")
    }

    /// Add `parent` to the end of a group's parent list.
    ///
    /// Rejected without any change if either group is missing, the edge is
    /// already present, or it would close a cycle.
    pub fn add_group_parent(&mut self, name: &str, parent: &str) -> Result<(), PermissionError> {
        if !self.groups.contains_key(name) {
            return Err(PermissionError::GroupNotFound(name.to_string()));
        }
        if !self.groups.contains_key(parent) {
            return Err(PermissionError::GroupNotFound(parent.to_string()));
        }
        if name == parent {
            return Err(PermissionError::SelfParent(name.to_string()));
        }
        if self.groups[name].parents.iter().any(|p| p == parent) {
            return Err(PermissionError::AlreadyPresent {
                subject: group_subject(name),
                item: format!("parent {}", parent),
            });
        }
        inheritance::check_new_parent(self, name, parent)?;

        let group = self.group_mut(name)?;
        group.parents.push(parent.to_string());
        Ok(())
    }

    pub fn remove_group_parent(&mut self, name: &str, parent: &str) -> Result<(), PermissionError> {
        let group = self.group_mut(name)?;
        remove_all(&mut group.parents, parent, group_subject(name), "parent")
    }

    /// Set or clear a group's display prefix
    pub fn set_group_prefix(&mut self, name: &str, prefix: Option<String>) -> Result<(), PermissionError> {
        let group = self.group_mut(name)?;
        group.prefix = prefix;
        Ok(())
    }

    // ------------------------------------------------------------------
    // User edits
    // ------------------------------------------------------------------

    /// Record a user's current display name.
    ///
    /// A name belongs to one identity at a time: any other record still
    /// carrying it (case-insensitively) forgets it.
    pub fn remember_name(&mut self, identity: Uuid, name: &str) {
        for (other, user) in self.users.iter_mut() {
            if *other != identity
                && user
                    .name
                    .as_deref()
                    .is_some_and(|known| known.eq_ignore_ascii_case(name))
            {
                debug!("Name {} moved from {} to {}", name, other, identity);
                user.name = None;
            }
        }
        let user = self.users.entry(identity).or_default();
        if user.name.as_deref() != Some(name) {
            user.name = Some(name.to_string());
        }
    }

    pub fn add_user_group(&mut self, identity: Uuid, group: &str) -> Result<(), PermissionError> {
        if !self.groups.contains_key(group) {
            return Err(PermissionError::GroupNotFound(group.to_string()));
        }
        let user = self.users.entry(identity).or_default();
        push_unique(&mut user.groups, group, user_subject(&identity), "group")
    }

    pub fn remove_user_group(&mut self, identity: Uuid, group: &str) -> Result<(), PermissionError> {
        let user = self.existing_user_mut(identity, "group", group)?;
        remove_all(&mut user.groups, group, user_subject(&identity), "group")
    }

    pub fn add_user_permission(&mut self, identity: Uuid, node: &PermissionNode) -> Result<(), PermissionError> {
        let user = self.users.entry(identity).or_default();
        push_unique(&mut user.permissions, &node.to_string(), user_subject(&identity), "permission")
    }

    pub fn remove_user_permission(&mut self, identity: Uuid, node: &PermissionNode) -> Result<(), PermissionError> {
        let raw = node.to_string();
        let user = self.existing_user_mut(identity, "permission", &raw)?;
        remove_all(&mut user.permissions, &raw, user_subject(&identity), "permission")
    }

    /// A user without a record has nothing to remove
    fn existing_user_mut(&mut self, identity: Uuid, what: &str, item: &str) -> Result<&mut User, PermissionError> {
        self.users.get_mut(&identity).ok_or_else(|| PermissionError::NotPresent {
            subject: user_subject(&identity),
            item: format!("{} {}", what, item),
        })
    }

    // ------------------------------------------------------------------
    // Defaults
    // ------------------------------------------------------------------

    pub fn add_default_permission(&mut self, node: &PermissionNode) -> Result<(), PermissionError> {
        push_unique(&mut self.defaults, &node.to_string(), "defaults".to_string(), "permission")
    }

    pub fn remove_default_permission(&mut self, node: &PermissionNode) -> Result<(), PermissionError> {
        remove_all(&mut self.defaults, &node.to_string(), "defaults".to_string(), "permission")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(raw: &str) -> PermissionNode {
        PermissionNode::parse(raw).unwrap()
    }

    fn store_with(groups: &[&str]) -> PermissionStore {
        let mut store = PermissionStore::new();
        for name in groups {
            store.create_group(name).unwrap();
        }
        store
    }

    #[test]
    fn test_unknown_user_behaves_as_empty() {
        let store = PermissionStore::new();
        let user = store.user_or_default(&Uuid::new_v4());
        assert!(user.groups.is_empty());
        assert!(user.permissions.is_empty());
        assert!(user.name.is_none());
    }

    #[test]
    fn test_create_group_rejects_duplicates_and_bad_names() {
        let mut store = store_with(&["default"]);
        assert_eq!(
            store.create_group("default"),
            Err(PermissionError::GroupExists("default".into()))
        );
        assert!(matches!(
            store.create_group("has space"),
            Err(PermissionError::InvalidGroupName(_))
        ));
        assert!(matches!(store.create_group(""), Err(PermissionError::InvalidGroupName(_))));
    }

    #[test]
    fn test_group_permission_add_remove() {
        let mut store = store_with(&["mod"]);
        store.add_group_permission("mod", &node("core.mute")).unwrap();

        let err = store.add_group_permission("mod", &node("core.mute")).unwrap_err();
        assert!(err.is_noop());
        assert_eq!(store.group("mod").unwrap().permissions, vec!["core.mute"]);

        store.remove_group_permission("mod", &node("core.mute")).unwrap();
        let err = store.remove_group_permission("mod", &node("core.mute")).unwrap_err();
        assert!(matches!(err, PermissionError::NotPresent { .. }));
        assert!(store.group("mod").unwrap().permissions.is_empty());
    }

    #[test]
    fn test_negative_and_positive_nodes_are_distinct_entries() {
        let mut store = store_with(&["mod"]);
        store.add_group_permission("mod", &node("core.fly")).unwrap();
        store.add_group_permission("mod", &node("-core.fly")).unwrap();
        assert_eq!(store.group("mod").unwrap().permissions.len(), 2);

        // Removing the denial leaves the grant alone
        store.remove_group_permission("mod", &node("-core.fly")).unwrap();
        assert_eq!(store.group("mod").unwrap().permissions, vec!["core.fly"]);
    }

    #[test]
    fn test_set_group_permissions_keeps_duplicates() {
        let mut store = store_with(&["mod"]);
        store
            .set_group_permissions("mod", vec![node("a"), node("a"), node("-b")])
            .unwrap();
        assert_eq!(store.group("mod").unwrap().permissions, vec!["a", "a", "-b"]);

        assert_eq!(
            store.set_group_permissions("ghost", vec![]),
            Err(PermissionError::GroupNotFound("ghost".into()))
        );
    }

    #[test]
    fn test_remove_group_permission_on_missing_group() {
        let mut store = PermissionStore::new();
        assert_eq!(
            store.remove_group_permission("ghost", &node("a")),
            Err(PermissionError::GroupNotFound("ghost".into()))
        );
    }

    #[test]
    fn test_add_parent_requires_both_groups() {
        let mut store = store_with(&["admin"]);
        assert_eq!(
            store.add_group_parent("admin", "ghost"),
            Err(PermissionError::GroupNotFound("ghost".into()))
        );
        assert_eq!(
            store.add_group_parent("ghost", "admin"),
            Err(PermissionError::GroupNotFound("ghost".into()))
        );
        assert!(store.group("admin").unwrap().parents.is_empty());
    }

    #[test]
    fn test_add_parent_rejects_self_and_duplicates() {
        let mut store = store_with(&["admin", "default"]);
        assert_eq!(
            store.add_group_parent("admin", "admin"),
            Err(PermissionError::SelfParent("admin".into()))
        );

        store.add_group_parent("admin", "default").unwrap();
        let err = store.add_group_parent("admin", "default").unwrap_err();
        assert!(matches!(err, PermissionError::AlreadyPresent { .. }));
        assert_eq!(store.group("admin").unwrap().parents, vec!["default"]);
    }

    #[test]
    fn test_reverse_parent_is_cycle_and_store_unchanged() {
        let mut store = store_with(&["a", "b"]);
        store.add_group_parent("a", "b").unwrap();
        let snapshot = store.clone();

        let err = store.add_group_parent("b", "a").unwrap_err();
        assert!(matches!(err, PermissionError::CycleDetected { .. }));
        assert!(store.group("b").unwrap().parents.is_empty());
        assert_eq!(store, snapshot);
    }

    #[test]
    fn test_transitive_cycle_rejected() {
        let mut store = store_with(&["a", "b", "c"]);
        store.add_group_parent("a", "b").unwrap();
        store.add_group_parent("b", "c").unwrap();

        let err = store.add_group_parent("c", "a").unwrap_err();
        match err {
            PermissionError::CycleDetected { path, .. } => {
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle, got {:?}", other),
        }
        assert!(store.group("c").unwrap().parents.is_empty());
    }

    #[test]
    fn test_remove_parent() {
        let mut store = store_with(&["admin", "default"]);
        store.add_group_parent("admin", "default").unwrap();
        store.remove_group_parent("admin", "default").unwrap();
        assert!(store.remove_group_parent("admin", "default").unwrap_err().is_noop());
    }

    #[test]
    fn test_delete_group_scrubs_references() {
        let mut store = store_with(&["default", "mod", "admin"]);
        store.add_group_parent("mod", "default").unwrap();
        store.add_group_parent("admin", "default").unwrap();
        let alice = Uuid::new_v4();
        store.add_user_group(alice, "default").unwrap();
        store.add_user_group(alice, "mod").unwrap();

        store.delete_group("default").unwrap();

        assert!(store.group("default").is_none());
        assert!(store.group("mod").unwrap().parents.is_empty());
        assert!(store.group("admin").unwrap().parents.is_empty());
        assert_eq!(store.user(&alice).unwrap().groups, vec!["mod"]);
        assert_eq!(
            store.delete_group("default"),
            Err(PermissionError::GroupNotFound("default".into()))
        );
    }

    #[test]
    fn test_user_group_membership() {
        let mut store = store_with(&["vip"]);
        let bob = Uuid::new_v4();

        assert_eq!(
            store.add_user_group(bob, "ghost"),
            Err(PermissionError::GroupNotFound("ghost".into()))
        );
        store.add_user_group(bob, "vip").unwrap();
        assert!(store.add_user_group(bob, "vip").unwrap_err().is_noop());

        store.remove_user_group(bob, "vip").unwrap();
        assert!(store.remove_user_group(bob, "vip").unwrap_err().is_noop());

        // Removing from a user with no record is a reported no-op
        let nobody = Uuid::new_v4();
        assert!(store.remove_user_group(nobody, "vip").unwrap_err().is_noop());
        assert!(store.user(&nobody).is_none());
    }

    #[test]
    fn test_user_permissions() {
        let mut store = PermissionStore::new();
        let bob = Uuid::new_v4();
        store.add_user_permission(bob, &node("-core.fly")).unwrap();
        assert!(store.add_user_permission(bob, &node("-core.fly")).unwrap_err().is_noop());
        assert_eq!(store.user(&bob).unwrap().permissions, vec!["-core.fly"]);

        store.remove_user_permission(bob, &node("-core.fly")).unwrap();
        assert!(store.remove_user_permission(bob, &node("-core.fly")).unwrap_err().is_noop());
    }

    #[test]
    fn test_default_permissions() {
        let mut store = PermissionStore::new();
        store.add_default_permission(&node("core.spawn")).unwrap();
        assert!(store.add_default_permission(&node("core.spawn")).unwrap_err().is_noop());
        assert_eq!(store.default_permissions(), ["core.spawn".to_string()]);

        store.remove_default_permission(&node("core.spawn")).unwrap();
        assert!(store.default_permissions().is_empty());
    }

    #[test]
    fn test_listings_are_lexicographic() {
        let mut store = store_with(&["zeta", "alpha", "mod"]);
        store.add_group_parent("zeta", "alpha").unwrap();
        store.add_group_parent("mod", "alpha").unwrap();
        store.add_group_permission("alpha", &node("a")).unwrap();

        let mut ids = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        for id in &ids {
            store.add_user_group(*id, "alpha").unwrap();
        }
        ids.sort();

        let names: Vec<_> = store.list_groups().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["alpha", "mod", "zeta"]);
        assert_eq!(store.list_users_in_group("alpha"), ids);
        assert_eq!(store.children_of("alpha"), vec!["mod", "zeta"]);

        let alpha = &store.list_groups()[0];
        assert_eq!(alpha.permissions, 1);
        assert_eq!(alpha.members, 3);
    }

    #[test]
    fn test_user_prefix_uses_first_group() {
        let mut store = store_with(&["admin", "vip"]);
        store.set_group_prefix("admin", Some("[Admin]".into())).unwrap();
        store.set_group_prefix("vip", Some("[VIP]".into())).unwrap();
        let carol = Uuid::new_v4();
        assert_eq!(store.user_prefix(&carol), None);

        store.add_user_group(carol, "vip").unwrap();
        store.add_user_group(carol, "admin").unwrap();
        assert_eq!(store.user_prefix(&carol), Some("[VIP]"));

        store.set_group_prefix("vip", None).unwrap();
        assert_eq!(store.user_prefix(&carol), None);
    }

    #[test]
    fn test_identity_by_name() {
        let mut store = PermissionStore::new();
        let dave = Uuid::new_v4();
        store.remember_name(dave, "Dave");
        assert_eq!(store.identity_by_name("dave"), Some(dave));
        assert_eq!(store.identity_by_name("erin"), None);

        store.remember_name(dave, "David");
        assert_eq!(store.identity_by_name("dave"), None);
        assert_eq!(store.identity_by_name("DAVID"), Some(dave));
    }

    #[test]
    fn test_name_moves_to_newest_identity() {
        let mut store = PermissionStore::new();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        store.create_group("vip").unwrap();
        store.add_user_group(old, "vip").unwrap();
        store.remember_name(old, "Alice");

        store.remember_name(new, "alice");
        assert_eq!(store.identity_by_name("Alice"), Some(new));
        assert_eq!(store.user(&old).unwrap().name, None);
        // The old record keeps its memberships
        assert_eq!(store.user(&old).unwrap().groups, vec!["vip"]);
    }
}
