//! Database module - SQLite persistence for the permission store
//!
//! The store is loaded once at startup and written back wholesale on
//! explicit saves. List order is kept in `position` columns.

#[cfg(test)]
pub mod test_utils;

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;
use uuid::Uuid;

use crate::permissions::{Group, PermissionStore, User};

/// Database handle wrapping SQLite connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    /// If path is None, uses in-memory database (for testing)
    pub async fn new(path: Option<&str>) -> Result<Self> {
        let conn_str = match path {
            Some(p) => format!("sqlite:{}?mode=rwc", p),
            None => "sqlite::memory:".to_string(),
        };

        let options = SqliteConnectOptions::from_str(&conn_str)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        // Every in-memory connection is its own database, so keep exactly one
        let pool_options = match path {
            Some(_) => SqlitePoolOptions::new().max_connections(10),
            None => SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        };
        let pool = pool_options.connect_with(options).await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS groups (
                name TEXT PRIMARY KEY,
                prefix TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_permissions (
                group_name TEXT NOT NULL REFERENCES groups(name) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                node TEXT NOT NULL,
                PRIMARY KEY (group_name, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Parent names are not foreign keys: hand-edited data may dangle
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_parents (
                group_name TEXT NOT NULL REFERENCES groups(name) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                parent TEXT NOT NULL,
                PRIMARY KEY (group_name, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_groups (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                group_name TEXT NOT NULL,
                PRIMARY KEY (user_id, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_permissions (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                node TEXT NOT NULL,
                PRIMARY KEY (user_id, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS default_permissions (
                position INTEGER PRIMARY KEY,
                node TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_groups_group ON user_groups(group_name)")
            .execute(&self.pool)
            .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check if database is healthy
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Reconstruct the permission store
    pub async fn load(&self) -> Result<PermissionStore> {
        let defaults: Vec<(String,)> =
            sqlx::query_as("SELECT node FROM default_permissions ORDER BY position")
                .fetch_all(&self.pool)
                .await?;

        let mut groups: BTreeMap<String, Group> = BTreeMap::new();
        let rows: Vec<(String, Option<String>)> = sqlx::query_as("SELECT name, prefix FROM groups")
            .fetch_all(&self.pool)
            .await?;
        for (name, prefix) in rows {
            groups.insert(
                name,
                Group {
                    prefix,
                    ..Group::default()
                },
            );
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT group_name, node FROM group_permissions ORDER BY group_name, position",
        )
        .fetch_all(&self.pool)
        .await?;
        for (name, node) in rows {
            if let Some(group) = groups.get_mut(&name) {
                group.permissions.push(node);
            }
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT group_name, parent FROM group_parents ORDER BY group_name, position",
        )
        .fetch_all(&self.pool)
        .await?;
        for (name, parent) in rows {
            if let Some(group) = groups.get_mut(&name) {
                group.parents.push(parent);
            }
        }

        let mut users: BTreeMap<Uuid, User> = BTreeMap::new();
        let rows: Vec<(String, Option<String>)> = sqlx::query_as("SELECT id, name FROM users")
            .fetch_all(&self.pool)
            .await?;
        for (id, name) in rows {
            let id = parse_identity(&id)?;
            users.insert(
                id,
                User {
                    name,
                    ..User::default()
                },
            );
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT user_id, group_name FROM user_groups ORDER BY user_id, position",
        )
        .fetch_all(&self.pool)
        .await?;
        for (id, group) in rows {
            if let Some(user) = users.get_mut(&parse_identity(&id)?) {
                user.groups.push(group);
            }
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT user_id, node FROM user_permissions ORDER BY user_id, position",
        )
        .fetch_all(&self.pool)
        .await?;
        for (id, node) in rows {
            if let Some(user) = users.get_mut(&parse_identity(&id)?) {
                user.permissions.push(node);
            }
        }

        info!(
            "Loaded {} groups, {} users, {} default permissions",
            groups.len(),
            users.len(),
            defaults.len()
        );

        Ok(PermissionStore::from_parts(
            defaults.into_iter().map(|(node,)| node).collect(),
            groups,
            users,
        ))
    }

    /// Replace the persisted store with `store` in one transaction
    pub async fn save(&self, store: &PermissionStore) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in [
            "user_permissions",
            "user_groups",
            "users",
            "group_parents",
            "group_permissions",
            "groups",
            "default_permissions",
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }

        for (position, node) in store.default_permissions().iter().enumerate() {
            sqlx::query("INSERT INTO default_permissions (position, node) VALUES (?, ?)")
                .bind(position as i64)
                .bind(node)
                .execute(&mut *tx)
                .await?;
        }

        for (name, group) in store.groups() {
            sqlx::query("INSERT INTO groups (name, prefix) VALUES (?, ?)")
                .bind(name)
                .bind(&group.prefix)
                .execute(&mut *tx)
                .await?;
            for (position, node) in group.permissions.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO group_permissions (group_name, position, node) VALUES (?, ?, ?)",
                )
                .bind(name)
                .bind(position as i64)
                .bind(node)
                .execute(&mut *tx)
                .await?;
            }
            for (position, parent) in group.parents.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO group_parents (group_name, position, parent) VALUES (?, ?, ?)",
                )
                .bind(name)
                .bind(position as i64)
                .bind(parent)
                .execute(&mut *tx)
                .await?;
            }
        }

        for (id, user) in store.users() {
            let id = id.to_string();
            sqlx::query("INSERT INTO users (id, name) VALUES (?, ?)")
                .bind(&id)
                .bind(&user.name)
                .execute(&mut *tx)
                .await?;
            for (position, group) in user.groups.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO user_groups (user_id, position, group_name) VALUES (?, ?, ?)",
                )
                .bind(&id)
                .bind(position as i64)
                .bind(group)
                .execute(&mut *tx)
                .await?;
            }
            for (position, node) in user.permissions.iter().enumerate() {
                sqlx::query("INSERT INTO user_permissions (user_id, position, node) VALUES (?, ?, ?)")
                    .bind(&id)
                    .bind(position as i64)
                    .bind(node)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES ('saved_at', ?)")
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Saved permission store");
        Ok(())
    }

    /// Timestamp of the last successful save
    pub async fn saved_at(&self) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM meta WHERE key = 'saved_at'")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }
}

fn parse_identity(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid user id in database: {}", raw))
}
