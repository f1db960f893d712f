//! Administrative commands
//!
//! Command words are parsed once into an [`AdminCommand`]; execution
//! lives on [`crate::Engine`]. Sub-command words are matched
//! case-insensitively through per-topic lookup tables.

mod execute;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::permissions::{PermissionError, PermissionNode};

/// Keyword that clears a group prefix
pub const CLEAR_PREFIX: &str = "none";

/// Actions on a single user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Info,
    Effective,
    AddPermission(PermissionNode),
    RemovePermission(PermissionNode),
    AddGroup(String),
    RemoveGroup(String),
}

/// Actions on a single group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAction {
    Info,
    Family,
    Create,
    Delete,
    Prefix(Option<String>),
    AddPermission(PermissionNode),
    RemovePermission(PermissionNode),
    AddParent(String),
    RemoveParent(String),
    AddMember(String),
    RemoveMember(String),
}

/// Actions on the global default permissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultAction {
    Info,
    Add(PermissionNode),
    Remove(PermissionNode),
}

/// The closed set of administrative operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    User { player: String, action: UserAction },
    Group { group: String, action: GroupAction },
    ListGroups,
    Reload,
    Default(DefaultAction),
}

/// Which usage text to show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageTopic {
    Main,
    User,
    Group,
    Default,
}

impl UsageTopic {
    /// Usage lines for this topic
    pub fn lines(&self) -> &'static [&'static str] {
        match self {
            UsageTopic::Main => &[
                "Permission Commands:",
                "user <player> <info|effective|add|remove|addgroup|removegroup> [permission|group]",
                "group <group> <info|family|create|delete|prefix|add|remove|addparent|removeparent|addmember|removemember> [argument]",
                "listgroups",
                "reload",
                "default <info|add|remove> [permission]",
            ],
            UsageTopic::User => &[
                "User Commands:",
                "user <player> info",
                "user <player> effective",
                "user <player> add <permission>",
                "user <player> remove <permission>",
                "user <player> addgroup <group>",
                "user <player> removegroup <group>",
            ],
            UsageTopic::Group => &[
                "Group Commands:",
                "group <group> info",
                "group <group> family",
                "group <group> create",
                "group <group> delete",
                "group <group> prefix <prefix|none>",
                "group <group> add <permission>",
                "group <group> remove <permission>",
                "group <group> addparent <parent>",
                "group <group> removeparent <parent>",
                "group <group> addmember <player>",
                "group <group> removemember <player>",
            ],
            UsageTopic::Default => &[
                "Default Commands:",
                "default info",
                "default add <permission>",
                "default remove <permission>",
            ],
        }
    }
}

impl fmt::Display for UsageTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lines().join("\n"))
    }
}

/// Why a command could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{0}")]
    Usage(UsageTopic),

    #[error(transparent)]
    Invalid(#[from] PermissionError),
}

type UserActionParser = fn(&str) -> Result<UserAction, PermissionError>;
type GroupActionParser = fn(&str) -> Result<GroupAction, PermissionError>;
type DefaultActionParser = fn(&str) -> Result<DefaultAction, PermissionError>;

/// User sub-commands that take an argument
const USER_ACTIONS: &[(&str, UserActionParser)] = &[
    ("add", |arg| Ok(UserAction::AddPermission(PermissionNode::parse(arg)?))),
    ("remove", |arg| Ok(UserAction::RemovePermission(PermissionNode::parse(arg)?))),
    ("addgroup", |arg| Ok(UserAction::AddGroup(arg.to_string()))),
    ("removegroup", |arg| Ok(UserAction::RemoveGroup(arg.to_string()))),
];

/// Group sub-commands that take an argument
const GROUP_ACTIONS: &[(&str, GroupActionParser)] = &[
    ("prefix", |arg| Ok(GroupAction::Prefix(parse_prefix(arg)))),
    ("add", |arg| Ok(GroupAction::AddPermission(PermissionNode::parse(arg)?))),
    ("remove", |arg| Ok(GroupAction::RemovePermission(PermissionNode::parse(arg)?))),
    ("addparent", |arg| Ok(GroupAction::AddParent(arg.to_string()))),
    ("removeparent", |arg| Ok(GroupAction::RemoveParent(arg.to_string()))),
    ("addmember", |arg| Ok(GroupAction::AddMember(arg.to_string()))),
    ("removemember", |arg| Ok(GroupAction::RemoveMember(arg.to_string()))),
];

/// Default sub-commands that take an argument
const DEFAULT_ACTIONS: &[(&str, DefaultActionParser)] = &[
    ("add", |arg| Ok(DefaultAction::Add(PermissionNode::parse(arg)?))),
    ("remove", |arg| Ok(DefaultAction::Remove(PermissionNode::parse(arg)?))),
];

fn parse_prefix(arg: &str) -> Option<String> {
    if arg.eq_ignore_ascii_case(CLEAR_PREFIX) {
        None
    } else {
        Some(arg.to_string())
    }
}

/// Find `word` in a table and run its parser on the joined arguments
fn dispatch<T>(
    table: &[(&str, fn(&str) -> Result<T, PermissionError>)],
    word: &str,
    args: &[&str],
    topic: UsageTopic,
) -> Result<T, ParseError> {
    let parser = table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(word))
        .map(|(_, parser)| *parser)
        .ok_or(ParseError::Usage(topic))?;
    if args.is_empty() {
        return Err(ParseError::Usage(topic));
    }
    Ok(parser(&args.join(" "))?)
}

impl AdminCommand {
    /// Parse command words, e.g. `["group", "admin", "addparent", "mod"]`
    pub fn parse<S: AsRef<str>>(words: &[S]) -> Result<Self, ParseError> {
        let words: Vec<&str> = words.iter().map(AsRef::as_ref).collect();
        let Some((head, rest)) = words.split_first() else {
            return Err(ParseError::Usage(UsageTopic::Main));
        };

        match head.to_lowercase().as_str() {
            "user" => Self::parse_user(rest),
            "group" => Self::parse_group(rest),
            "listgroups" => Ok(AdminCommand::ListGroups),
            "reload" => Ok(AdminCommand::Reload),
            "default" => Self::parse_default(rest),
            _ => Err(ParseError::Usage(UsageTopic::Main)),
        }
    }

    fn parse_user(args: &[&str]) -> Result<Self, ParseError> {
        let Some((player, rest)) = args.split_first() else {
            return Err(ParseError::Usage(UsageTopic::User));
        };
        let action = match rest.split_first() {
            None => UserAction::Info,
            Some((word, [])) if word.eq_ignore_ascii_case("info") => UserAction::Info,
            Some((word, [])) if word.eq_ignore_ascii_case("effective") => UserAction::Effective,
            Some((word, args)) => dispatch(USER_ACTIONS, word, args, UsageTopic::User)?,
        };
        Ok(AdminCommand::User {
            player: player.to_string(),
            action,
        })
    }

    fn parse_group(args: &[&str]) -> Result<Self, ParseError> {
        let Some((group, rest)) = args.split_first() else {
            return Err(ParseError::Usage(UsageTopic::Group));
        };
        let action = match rest.split_first() {
            None => GroupAction::Info,
            Some((word, [])) => match word.to_lowercase().as_str() {
                "info" => GroupAction::Info,
                "family" => GroupAction::Family,
                "create" => GroupAction::Create,
                "delete" => GroupAction::Delete,
                _ => return Err(ParseError::Usage(UsageTopic::Group)),
            },
            Some((word, args)) => dispatch(GROUP_ACTIONS, word, args, UsageTopic::Group)?,
        };
        Ok(AdminCommand::Group {
            group: group.to_string(),
            action,
        })
    }

    fn parse_default(args: &[&str]) -> Result<Self, ParseError> {
        let action = match args.split_first() {
            Some((word, [])) if word.eq_ignore_ascii_case("info") => DefaultAction::Info,
            Some((word, rest)) => dispatch(DEFAULT_ACTIONS, word, rest, UsageTopic::Default)?,
            None => return Err(ParseError::Usage(UsageTopic::Default)),
        };
        Ok(AdminCommand::Default(action))
    }

    /// Whether the command edits the store
    pub fn is_mutation(&self) -> bool {
        match self {
            AdminCommand::User { action, .. } => {
                !matches!(action, UserAction::Info | UserAction::Effective)
            }
            AdminCommand::Group { action, .. } => {
                !matches!(action, GroupAction::Info | GroupAction::Family)
            }
            AdminCommand::Default(action) => !matches!(action, DefaultAction::Info),
            AdminCommand::ListGroups | AdminCommand::Reload => false,
        }
    }
}

/// Result of executing a command, ready to render
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandOutput {
    /// Whether the command did what was asked
    pub success: bool,
    /// Whether the store changed
    pub changed: bool,
    /// Human-readable lines for the operator
    pub lines: Vec<String>,
    /// Structured payload for inspection commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CommandOutput {
    pub(crate) fn info(lines: Vec<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            changed: false,
            lines,
            data: Some(data),
        }
    }

    pub(crate) fn changed(line: String) -> Self {
        Self {
            success: true,
            changed: true,
            lines: vec![line],
            data: None,
        }
    }

    pub(crate) fn rejected(err: &PermissionError) -> Self {
        Self {
            success: false,
            changed: false,
            lines: vec![capitalize(&err.to_string())],
            data: None,
        }
    }

    pub(crate) fn message(line: String) -> Self {
        Self {
            success: true,
            changed: false,
            lines: vec![line],
            data: None,
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
