//! Database initialization module
//!
//! Provides one-time database setup for the permd_init tool.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;
use uuid::Uuid;

use crate::db::Database;
use crate::permissions::{PermissionNode, PermissionStore};

/// Group every new database starts with
pub const DEFAULT_GROUP: &str = "default";

/// Administrative group, inheriting from [`DEFAULT_GROUP`]
pub const ADMIN_GROUP: &str = "admin";

const ADMIN_PREFIX: &str = "[Admin]";

/// Build the seed store written by [`init_database`]
pub fn seed_store(admin: Option<Uuid>, default_perms: &[String]) -> Result<PermissionStore> {
    let mut store = PermissionStore::new();
    for raw in default_perms {
        let node = PermissionNode::parse(raw)?;
        store.add_default_permission(&node)?;
    }

    store.create_group(DEFAULT_GROUP)?;
    store.create_group(ADMIN_GROUP)?;
    store.add_group_parent(ADMIN_GROUP, DEFAULT_GROUP)?;
    store.add_group_permission(ADMIN_GROUP, &PermissionNode::parse("*")?)?;
    store.set_group_prefix(ADMIN_GROUP, Some(ADMIN_PREFIX.to_string()))?;

    if let Some(admin) = admin {
        store.add_user_group(admin, ADMIN_GROUP)?;
    }
    Ok(store)
}

/// Initialize a new permission database
///
/// # Arguments
/// * `path` - Path to the SQLite database file (must not exist)
/// * `admin` - Identity to place in the admin group, if any
/// * `default_perms` - Nodes every identity receives
///
/// # Errors
/// * Database file already exists
/// * A default node is malformed
/// * Database creation fails
pub async fn init_database(
    path: &Path,
    admin: Option<Uuid>,
    default_perms: &[String],
) -> Result<PermissionStore> {
    // Fail if database already exists
    if path.exists() {
        bail!(
            "Database file already exists: {}. Remove it first or use a different path.",
            path.display()
        );
    }

    // Validate before touching the filesystem
    let store = seed_store(admin, default_perms)?;

    info!("Creating new database at {}", path.display());
    let path_str = path
        .to_str()
        .with_context(|| format!("Database path is not valid UTF-8: {}", path.display()))?;
    let db = Database::new(Some(path_str)).await?;
    db.save(&store).await?;

    info!(
        "Seeded groups '{}' and '{}' with {} default permissions",
        DEFAULT_GROUP,
        ADMIN_GROUP,
        store.default_permissions().len()
    );
    if let Some(admin) = admin {
        info!("Added {} to group '{}'", admin, ADMIN_GROUP);
    }

    info!("Database initialization complete");
    Ok(store)
}
