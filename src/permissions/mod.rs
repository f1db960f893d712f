//! Permission groups, inheritance and session attachments
//!
//! Layering for a user (later layers overwrite same-node entries):
//! 1. Global default permissions
//! 2. Closure of each group the user belongs to, in listed order
//! 3. The user's own overrides
//!
//! Within a group closure the group's own nodes beat anything inherited,
//! and among parents the first-listed parent wins.
//!
//! A node prefixed with `-` denies; the sign is stripped when the node is
//! stored in a resolved [`PermissionSet`].

pub mod attachment;
pub mod inheritance;
pub mod node;
pub mod resolver;
pub mod store;

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

pub use attachment::{AttachmentHandle, AttachmentManager, ReloadSummary, Session};
pub use inheritance::{ancestors, resolve_group_closure, would_create_cycle};
pub use node::PermissionNode;
pub use resolver::{resolve, resolve_defaults, resolve_user};
pub use store::{Group, GroupSummary, PermissionStore, User};

/// Broad classes of permission errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Group, user or node absent
    NotFound,
    /// Parent graph would contain (or contains) a cycle
    CycleDetected,
    /// Edit would add something already present
    DuplicateNoop,
    /// Malformed input or a reference to something that cannot exist
    InvalidConfiguration,
}

/// Errors returned by store edits and resolution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("group {0} does not exist")]
    GroupNotFound(String),

    #[error("group {0} already exists")]
    GroupExists(String),

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("{subject} already has {item}")]
    AlreadyPresent { subject: String, item: String },

    #[error("{subject} does not have {item}")]
    NotPresent { subject: String, item: String },

    #[error("circular inheritance at group {group} ({})", .path.join(" -> "))]
    CycleDetected { group: String, path: Vec<String> },

    #[error("group {0} cannot be its own parent")]
    SelfParent(String),

    #[error("invalid permission node '{0}'")]
    InvalidNode(String),

    #[error("invalid group name '{0}'")]
    InvalidGroupName(String),
}

impl PermissionError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PermissionError::GroupNotFound(_)
            | PermissionError::UserNotFound(_)
            | PermissionError::NotPresent { .. } => ErrorKind::NotFound,
            PermissionError::CycleDetected { .. } | PermissionError::SelfParent(_) => {
                ErrorKind::CycleDetected
            }
            PermissionError::AlreadyPresent { .. } | PermissionError::GroupExists(_) => {
                ErrorKind::DuplicateNoop
            }
            PermissionError::InvalidNode(_) | PermissionError::InvalidGroupName(_) => {
                ErrorKind::InvalidConfiguration
            }
        }
    }

    /// True for "already present" / "not present" outcomes, which leave
    /// state untouched and only need reporting back to the operator
    pub fn is_noop(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::DuplicateNoop)
    }
}

/// A resolved, de-duplicated set of signed permissions.
///
/// Keys are node names with the sign stripped; iteration is lexicographic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet {
    nodes: BTreeMap<String, bool>,
}

impl PermissionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a stored list, later entries overriding earlier ones
    pub fn from_stored<S: AsRef<str>>(raw: &[S]) -> Self {
        let mut set = Self::new();
        for entry in raw {
            set.apply(&PermissionNode::from_stored(entry.as_ref()));
        }
        set
    }

    /// Apply a node, replacing any earlier value for the same name
    pub fn apply(&mut self, node: &PermissionNode) {
        self.nodes.insert(node.name().to_string(), node.granted());
    }

    /// Overwrite entries with every entry of `other` (higher precedence layer)
    pub fn overlay(&mut self, other: &PermissionSet) {
        for (name, granted) in &other.nodes {
            self.nodes.insert(name.clone(), *granted);
        }
    }

    /// Add entries of `other` that are not already present (lower precedence)
    pub fn fill_from(&mut self, other: &PermissionSet) {
        for (name, granted) in &other.nodes {
            self.nodes.entry(name.clone()).or_insert(*granted);
        }
    }

    /// Value for a node name, if present
    pub fn get(&self, name: &str) -> Option<bool> {
        self.nodes.get(name).copied()
    }

    /// True only if the node is present and granted
    pub fn is_granted(&self, name: &str) -> bool {
        self.get(name).unwrap_or(false)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate (name, granted) pairs in lexicographic order
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.nodes.iter().map(|(name, granted)| (name.as_str(), *granted))
    }

    /// Render back into signed node strings (`-` for denials)
    pub fn to_nodes(&self) -> Vec<String> {
        self.iter()
            .map(|(name, granted)| {
                if granted {
                    name.to_string()
                } else {
                    format!("{}{}", node::DENY_PREFIX, name)
                }
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a PermissionSet {
    type Item = (&'a String, &'a bool);
    type IntoIter = btree_map::Iter<'a, String, bool>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
