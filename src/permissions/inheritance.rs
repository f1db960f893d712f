//! Group inheritance: closure resolution and cycle detection
//!
//! Both operations run on the same [`Walker`], a depth-first traversal
//! over the parent graph that tracks the current path (to detect cycles)
//! separately from groups already fully resolved (to reuse diamonds).

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use super::{PermissionError, PermissionSet, PermissionStore};

/// Depth-first walker over the parent graph
struct Walker<'a> {
    store: &'a PermissionStore,
    /// Proposed (child, parent) edge overlaid on the stored graph
    extra_edge: Option<(&'a str, &'a str)>,
    /// Groups on the current DFS path, root first
    path: Vec<String>,
    /// Closures of groups already fully resolved
    resolved: HashMap<String, PermissionSet>,
}

impl<'a> Walker<'a> {
    fn new(store: &'a PermissionStore) -> Self {
        Self {
            store,
            extra_edge: None,
            path: Vec::new(),
            resolved: HashMap::new(),
        }
    }

    fn with_extra_edge(store: &'a PermissionStore, child: &'a str, parent: &'a str) -> Self {
        Self {
            extra_edge: Some((child, parent)),
            ..Self::new(store)
        }
    }

    /// Parents of `group` in precedence order, including the overlaid edge
    fn parents_of(&self, group: &str) -> Vec<&'a str> {
        let mut parents: Vec<&'a str> = self
            .store
            .group(group)
            .map(|g| g.parents.iter().map(String::as_str).collect())
            .unwrap_or_default();
        if let Some((child, parent)) = self.extra_edge {
            if child == group {
                parents.push(parent);
            }
        }
        parents
    }

    /// Closure of `group`: its own nodes first, then parents in listed
    /// order, each only filling nodes not already decided
    fn closure(&mut self, group: &str) -> Result<PermissionSet, PermissionError> {
        if let Some(done) = self.resolved.get(group) {
            return Ok(done.clone());
        }
        if self.path.iter().any(|g| g == group) {
            let mut path = self.path.clone();
            path.push(group.to_string());
            return Err(PermissionError::CycleDetected {
                group: group.to_string(),
                path,
            });
        }

        let mut set = match self.store.group(group) {
            Some(record) => PermissionSet::from_stored(&record.permissions),
            None => {
                warn!("Group {} is referenced but does not exist", group);
                PermissionSet::new()
            }
        };

        self.path.push(group.to_string());
        for parent in self.parents_of(group) {
            let inherited = self.closure(parent)?;
            set.fill_from(&inherited);
        }
        self.path.pop();

        self.resolved.insert(group.to_string(), set.clone());
        Ok(set)
    }
}

/// Resolution context reused across one user's group memberships
pub(crate) struct ClosureCache<'a> {
    walker: Walker<'a>,
}

impl<'a> ClosureCache<'a> {
    pub(crate) fn new(store: &'a PermissionStore) -> Self {
        Self {
            walker: Walker::new(store),
        }
    }

    pub(crate) fn closure(&mut self, group: &str) -> Result<PermissionSet, PermissionError> {
        self.walker.closure(group)
    }
}

/// Flatten a group and its ancestors into one signed permission set.
///
/// Fails with `CycleDetected` if the stored graph loops back onto the
/// current path, and with `GroupNotFound` if `group` does not exist.
pub fn resolve_group_closure(
    group: &str,
    store: &PermissionStore,
) -> Result<PermissionSet, PermissionError> {
    if !store.has_group(group) {
        return Err(PermissionError::GroupNotFound(group.to_string()));
    }
    let set = Walker::new(store).closure(group)?;
    debug!("Resolved closure of {} ({} nodes)", group, set.len());
    Ok(set)
}

/// Check that adding `parent` to `group` keeps the graph acyclic
pub(crate) fn check_new_parent(
    store: &PermissionStore,
    group: &str,
    parent: &str,
) -> Result<(), PermissionError> {
    if group == parent {
        return Err(PermissionError::SelfParent(group.to_string()));
    }
    Walker::with_extra_edge(store, group, parent)
        .closure(group)
        .map(|_| ())
}

/// Whether adding `parent` as a parent of `group` would create a cycle,
/// directly or through any chain of ancestors
pub fn would_create_cycle(group: &str, parent: &str, store: &PermissionStore) -> bool {
    matches!(
        check_new_parent(store, group, parent),
        Err(PermissionError::CycleDetected { .. } | PermissionError::SelfParent(_))
    )
}

/// Every ancestor of `group` in depth-first order, each listed once.
///
/// Stops descending at groups already seen, so it terminates on cyclic data.
pub fn ancestors(group: &str, store: &PermissionStore) -> Vec<String> {
    fn visit(group: &str, store: &PermissionStore, seen: &mut HashSet<String>, out: &mut Vec<String>) {
        let Some(record) = store.group(group) else {
            return;
        };
        for parent in &record.parents {
            if seen.insert(parent.clone()) {
                out.push(parent.clone());
                visit(parent, store, seen, out);
            }
        }
    }

    let mut seen = HashSet::from([group.to_string()]);
    let mut out = Vec::new();
    visit(group, store, &mut seen, &mut out);
    out
}
