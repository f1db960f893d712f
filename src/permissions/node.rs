//! Permission node parsing
//!
//! A node is a dotted identifier such as `core.kit.save`. A leading `-`
//! turns it into a denial. Wildcard segments (`core.*`) are accepted but
//! carried as opaque text: matching them is the host runtime's job.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use super::PermissionError;

/// Prefix marking a negative (deny) node
pub const DENY_PREFIX: char = '-';

/// Optional sign, then `*` or dot-separated segments. Segments start with
/// `[A-Za-z0-9_]`; only the last one may be `*`.
static NODE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(\*|[A-Za-z0-9_][A-Za-z0-9_-]*(\.[A-Za-z0-9_][A-Za-z0-9_-]*)*(\.\*)?)$").unwrap()
});

/// A signed permission node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionNode {
    name: String,
    granted: bool,
}

impl PermissionNode {
    /// Parse and validate a raw node string (`core.fly` or `-core.fly`)
    pub fn parse(raw: &str) -> Result<Self, PermissionError> {
        if !NODE_REGEX.is_match(raw) {
            return Err(PermissionError::InvalidNode(raw.to_string()));
        }
        Ok(Self::from_stored(raw))
    }

    /// Interpret a stored node string without validating it.
    ///
    /// Stored lists were validated when they were edited; hand-edited data
    /// is taken as-is so that a bad entry cannot block resolution.
    pub fn from_stored(raw: &str) -> Self {
        match raw.strip_prefix(DENY_PREFIX) {
            Some(name) => Self {
                name: name.to_string(),
                granted: false,
            },
            None => Self {
                name: raw.to_string(),
                granted: true,
            },
        }
    }

    /// Node name with the sign stripped
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this node grants (true) or denies (false)
    pub fn granted(&self) -> bool {
        self.granted
    }

    /// Whether the name ends in a wildcard segment
    pub fn is_wildcard(&self) -> bool {
        self.name == "*" || self.name.ends_with(".*")
    }
}

impl fmt::Display for PermissionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.granted {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}", DENY_PREFIX, self.name)
        }
    }
}

impl FromStr for PermissionNode {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positive() {
        let node = PermissionNode::parse("core.kit.save").unwrap();
        assert_eq!(node.name(), "core.kit.save");
        assert!(node.granted());
        assert_eq!(node.to_string(), "core.kit.save");
    }

    #[test]
    fn test_parse_negative() {
        let node = PermissionNode::parse("-core.fly").unwrap();
        assert_eq!(node.name(), "core.fly");
        assert!(!node.granted());
        assert_eq!(node.to_string(), "-core.fly");
    }

    #[test]
    fn test_wildcards_are_opaque() {
        let node = PermissionNode::parse("core.*").unwrap();
        assert!(node.is_wildcard());
        assert_eq!(node.name(), "core.*");

        assert!(PermissionNode::parse("*").unwrap().is_wildcard());
        assert!(PermissionNode::parse("-*").is_ok());
        assert!(!PermissionNode::parse("core.fly").unwrap().is_wildcard());
        assert!(PermissionNode::parse("core.kit.*").is_ok());
        assert!(PermissionNode::parse("core.no-fly").is_ok());
    }

    #[test]
    fn test_wildcard_only_as_last_segment() {
        for raw in ["core.*.fly", "*.core", "core.**", "core.-fly", "--core.fly", "core.*-x"] {
            assert!(
                matches!(PermissionNode::parse(raw), Err(PermissionError::InvalidNode(_))),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_invalid_nodes() {
        for raw in ["", "-", "core fly", " core.fly", "core..fly", "core.", ".core", "core.fly "] {
            assert!(
                matches!(PermissionNode::parse(raw), Err(PermissionError::InvalidNode(_))),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_from_stored_skips_validation() {
        let node = PermissionNode::from_stored("-weird node");
        assert_eq!(node.name(), "weird node");
        assert!(!node.granted());
    }
}
