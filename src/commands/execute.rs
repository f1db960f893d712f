//! Command execution against an [`Engine`]

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AdminCommand, CommandOutput, DefaultAction, GroupAction, UserAction};
use crate::permissions::{
    ancestors, resolve_defaults, resolve_group_closure, PermissionError, PermissionSet,
    PermissionStore,
};
use crate::Engine;

/// Which attachments to refresh after an edit
enum ReloadScope {
    Identity(Uuid),
    All,
}

fn display_user(store: &PermissionStore, identity: &Uuid) -> String {
    match store.user(identity).and_then(|u| u.name.as_deref()) {
        Some(name) => name.to_string(),
        None => identity.to_string(),
    }
}

fn list_or(lines: &mut Vec<String>, heading: &str, items: &[String], empty: &str) {
    if items.is_empty() {
        lines.push(empty.to_string());
    } else {
        lines.push(heading.to_string());
        lines.extend(items.iter().map(|item| format!("- {}", item)));
    }
}

fn render_set(set: &PermissionSet) -> Vec<String> {
    set.iter()
        .map(|(node, granted)| {
            let state = if granted { "granted" } else { "denied" };
            format!("{} ({})", node, state)
        })
        .collect()
}

impl Engine {
    /// Execute an administrative command.
    ///
    /// Rejected edits come back as unsuccessful output; only storage
    /// failures are errors.
    pub async fn execute(&self, command: AdminCommand) -> Result<CommandOutput> {
        match command {
            AdminCommand::User { player, action } => {
                let Some(identity) = self.lookup(&player) else {
                    return Ok(CommandOutput::rejected(&PermissionError::UserNotFound(player)));
                };
                self.execute_user(identity, action).await
            }
            AdminCommand::Group { group, action } => self.execute_group(group, action).await,
            AdminCommand::ListGroups => Ok(self.list_groups()),
            AdminCommand::Reload => {
                let summary = self.reload_all();
                self.save().await?;
                Ok(CommandOutput::message(format!(
                    "Permissions reloaded successfully ({} sessions, {} fail-closed).",
                    summary.reloaded, summary.fail_closed
                )))
            }
            AdminCommand::Default(action) => self.execute_default(action).await,
        }
    }

    /// Apply an edit, then persist and refresh the affected sessions
    async fn apply_edit(
        &self,
        scope: ReloadScope,
        done: String,
        edit: impl FnOnce(&mut PermissionStore) -> Result<(), PermissionError>,
    ) -> Result<CommandOutput> {
        let outcome = self.edit(edit);
        if let Err(err) = outcome {
            if err.is_noop() {
                info!("Edit had no effect: {}", err);
            } else {
                warn!("Edit rejected: {}", err);
            }
            return Ok(CommandOutput::rejected(&err));
        }

        if self.config().save_on_edit {
            self.save().await?;
        }
        match scope {
            ReloadScope::Identity(identity) => {
                self.reload(&identity);
            }
            ReloadScope::All => {
                self.reload_all();
            }
        }
        info!("{}", done);
        Ok(CommandOutput::changed(done))
    }

    async fn execute_user(&self, identity: Uuid, action: UserAction) -> Result<CommandOutput> {
        let scope = ReloadScope::Identity(identity);
        match action {
            UserAction::Info => Ok(self.user_info(&identity)),
            UserAction::Effective => Ok(self.user_effective(&identity)),
            UserAction::AddPermission(node) => {
                let done = format!("Added permission {} to {}.", node, self.display(&identity));
                self.apply_edit(scope, done, |s| s.add_user_permission(identity, &node))
                    .await
            }
            UserAction::RemovePermission(node) => {
                let done = format!("Removed permission {} from {}.", node, self.display(&identity));
                self.apply_edit(scope, done, |s| s.remove_user_permission(identity, &node))
                    .await
            }
            UserAction::AddGroup(group) => {
                let done = format!("Added {} to group {}.", self.display(&identity), group);
                self.apply_edit(scope, done, |s| s.add_user_group(identity, &group))
                    .await
            }
            UserAction::RemoveGroup(group) => {
                let done = format!("Removed {} from group {}.", self.display(&identity), group);
                self.apply_edit(scope, done, |s| s.remove_user_group(identity, &group))
                    .await
            }
        }
    }

    async fn execute_group(&self, group: String, action: GroupAction) -> Result<CommandOutput> {
        let scope = ReloadScope::All;
        match action {
            GroupAction::Info => Ok(self.group_info(&group)),
            GroupAction::Family => Ok(self.group_family(&group)),
            GroupAction::Create => {
                let done = format!("Created group {}.", group);
                self.apply_edit(scope, done, |s| s.create_group(&group)).await
            }
            GroupAction::Delete => {
                let done = format!("Deleted group {}.", group);
                self.apply_edit(scope, done, |s| s.delete_group(&group)).await
            }
            GroupAction::Prefix(prefix) => {
                let done = match &prefix {
                    Some(p) => format!("Set prefix of group {} to {}.", group, p),
                    None => format!("Cleared prefix of group {}.", group),
                };
                self.apply_edit(scope, done, |s| s.set_group_prefix(&group, prefix))
                    .await
            }
            GroupAction::AddPermission(node) => {
                let done = format!("Added permission {} to group {}.", node, group);
                self.apply_edit(scope, done, |s| s.add_group_permission(&group, &node))
                    .await
            }
            GroupAction::RemovePermission(node) => {
                let done = format!("Removed permission {} from group {}.", node, group);
                self.apply_edit(scope, done, |s| s.remove_group_permission(&group, &node))
                    .await
            }
            GroupAction::AddParent(parent) => {
                let done = format!("Added parent {} to group {}.", parent, group);
                self.apply_edit(scope, done, |s| s.add_group_parent(&group, &parent))
                    .await
            }
            GroupAction::RemoveParent(parent) => {
                let done = format!("Removed parent {} from group {}.", parent, group);
                self.apply_edit(scope, done, |s| s.remove_group_parent(&group, &parent))
                    .await
            }
            GroupAction::AddMember(player) => {
                let Some(identity) = self.lookup(&player) else {
                    return Ok(CommandOutput::rejected(&PermissionError::UserNotFound(player)));
                };
                let done = format!("Added {} to group {}.", self.display(&identity), group);
                self.apply_edit(scope, done, |s| s.add_user_group(identity, &group))
                    .await
            }
            GroupAction::RemoveMember(player) => {
                let Some(identity) = self.lookup(&player) else {
                    return Ok(CommandOutput::rejected(&PermissionError::UserNotFound(player)));
                };
                let done = format!("Removed {} from group {}.", self.display(&identity), group);
                self.apply_edit(scope, done, |s| s.remove_user_group(identity, &group))
                    .await
            }
        }
    }

    async fn execute_default(&self, action: DefaultAction) -> Result<CommandOutput> {
        match action {
            DefaultAction::Info => Ok(self.default_info()),
            DefaultAction::Add(node) => {
                let done = format!("Added default permission {}.", node);
                self.apply_edit(ReloadScope::All, done, |s| s.add_default_permission(&node))
                    .await
            }
            DefaultAction::Remove(node) => {
                let done = format!("Removed default permission {}.", node);
                self.apply_edit(ReloadScope::All, done, |s| s.remove_default_permission(&node))
                    .await
            }
        }
    }

    fn display(&self, identity: &Uuid) -> String {
        display_user(&self.store(), identity)
    }

    fn user_info(&self, identity: &Uuid) -> CommandOutput {
        let store = self.store();
        let user = store.user_or_default(identity);
        let name = display_user(&store, identity);

        let mut lines = vec![format!("Permissions for {} ({}):", name, identity)];
        list_or(&mut lines, "Default permissions:", store.default_permissions(), "No default permissions set.");
        list_or(&mut lines, "User permissions:", &user.permissions, "No user-specific permissions.");
        list_or(&mut lines, "Groups:", &user.groups, "Not a member of any group.");
        let prefix = store.user_prefix(identity);
        if let Some(prefix) = prefix {
            lines.push(format!("Prefix: {}", prefix));
        }

        let data = json!({
            "identity": identity,
            "name": user.name,
            "defaults": store.default_permissions(),
            "permissions": user.permissions,
            "groups": user.groups,
            "prefix": prefix,
        });
        CommandOutput::info(lines, data)
    }

    fn user_effective(&self, identity: &Uuid) -> CommandOutput {
        let store = self.store();
        match crate::permissions::resolve(identity, &store) {
            Ok(set) => {
                let mut lines = vec![format!(
                    "Effective permissions for {}:",
                    display_user(&store, identity)
                )];
                if set.is_empty() {
                    lines.push("No permissions.".to_string());
                } else {
                    lines.extend(render_set(&set).into_iter().map(|l| format!("- {}", l)));
                }
                CommandOutput::info(lines, json!(set))
            }
            Err(err) => CommandOutput::rejected(&err),
        }
    }

    fn group_info(&self, name: &str) -> CommandOutput {
        let store = self.store();
        let Some(group) = store.group(name) else {
            return CommandOutput::rejected(&PermissionError::GroupNotFound(name.to_string()));
        };

        let members: Vec<String> = store
            .list_users_in_group(name)
            .iter()
            .map(|id| display_user(&store, id))
            .collect();

        let mut lines = vec![format!("Group: {}", name)];
        lines.push(format!("Prefix: {}", group.prefix.as_deref().unwrap_or("(none)")));
        list_or(&mut lines, "Permissions:", &group.permissions, "No permissions.");
        list_or(&mut lines, "Parents:", &group.parents, "No parents.");

        let effective = match resolve_group_closure(name, &store) {
            Ok(set) => {
                lines.push(format!("Effective permissions ({}):", set.len()));
                lines.extend(render_set(&set).into_iter().map(|l| format!("- {}", l)));
                Some(set)
            }
            Err(err) => {
                lines.push(format!("Cannot resolve inheritance: {}", err));
                None
            }
        };
        list_or(&mut lines, "Members:", &members, "No members.");

        let data = json!({
            "name": name,
            "prefix": group.prefix,
            "permissions": group.permissions,
            "parents": group.parents,
            "effective": effective,
            "members": members,
        });
        CommandOutput::info(lines, data)
    }

    fn group_family(&self, name: &str) -> CommandOutput {
        let store = self.store();
        let Some(group) = store.group(name) else {
            return CommandOutput::rejected(&PermissionError::GroupNotFound(name.to_string()));
        };
        let children = store.children_of(name);
        let all_ancestors = ancestors(name, &store);

        let mut lines = vec![format!("Family of group {}:", name)];
        list_or(&mut lines, "Parents:", &group.parents, "No parents.");
        list_or(&mut lines, "Ancestors:", &all_ancestors, "No ancestors.");
        list_or(&mut lines, "Children:", &children, "No children.");

        let data = json!({
            "name": name,
            "parents": group.parents,
            "ancestors": all_ancestors,
            "children": children,
        });
        CommandOutput::info(lines, data)
    }

    fn list_groups(&self) -> CommandOutput {
        let summaries = self.store().list_groups();
        let mut lines = vec!["Groups:".to_string()];
        if summaries.is_empty() {
            lines = vec!["No groups defined.".to_string()];
        }
        for summary in &summaries {
            let prefix = summary
                .prefix
                .as_deref()
                .map(|p| format!(" {}", p))
                .unwrap_or_default();
            lines.push(format!(
                "- {}{} ({} permissions, {} members)",
                summary.name, prefix, summary.permissions, summary.members
            ));
        }
        CommandOutput::info(lines, json!(summaries))
    }

    fn default_info(&self) -> CommandOutput {
        let store = self.store();
        let mut lines = Vec::new();
        list_or(&mut lines, "Default permissions:", store.default_permissions(), "No default permissions set.");
        let resolved = resolve_defaults(&store);
        CommandOutput::info(
            lines,
            json!({
                "stored": store.default_permissions(),
                "resolved": resolved,
            }),
        )
    }
}
