//! permd - permission resolution engine for multiplayer game servers
//!
//! Groups carry permission nodes and inherit from parent groups; users
//! belong to groups and carry personal overrides. The [`Engine`] owns the
//! authoritative store, persists it, and keeps connected sessions in sync.

pub mod commands;
pub mod db;
pub mod identity;
pub mod init;
pub mod permissions;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use db::Database;
use identity::{IdentityResolver, StoreDirectory};
use permissions::{
    AttachmentHandle, AttachmentManager, PermissionError, PermissionSet, PermissionStore,
    ReloadSummary, Session,
};

/// Config file read when no explicit path is given
pub const DEFAULT_CONFIG_FILE: &str = "permd.toml";

/// Prefix for environment overrides, e.g. `PERMD_DB_PATH`
pub const ENV_PREFIX: &str = "PERMD_";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file; `None` keeps everything in memory
    pub db_path: Option<String>,
    /// Tracing filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Emit logs as JSON lines
    pub log_json: bool,
    /// Persist after every successful edit
    pub save_on_edit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None, // None = in-memory
            log_filter: "permd=info".to_string(),
            log_json: false,
            save_on_edit: true,
        }
    }
}

impl Config {
    /// Layered sources: defaults, then the TOML file, then `PERMD_*` env vars
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load configuration. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Ok(Self::figment(path).extract()?)
    }
}

/// The permission engine: store, persistence and live attachments
pub struct Engine {
    config: Config,
    db: Arc<Database>,
    store: Arc<RwLock<PermissionStore>>,
    attachments: AttachmentManager,
    identities: Arc<dyn IdentityResolver>,
}

impl Engine {
    /// Open the configured database and load the store from it
    pub async fn open(config: Config) -> Result<Self> {
        let db = Database::new(config.db_path.as_deref()).await?;
        let store = db.load().await?;
        Ok(Self::with_store(config, Arc::new(db), store))
    }

    /// Build an engine around an already-loaded store
    pub fn with_store(config: Config, db: Arc<Database>, store: PermissionStore) -> Self {
        let store = Arc::new(RwLock::new(store));
        let identities = Arc::new(StoreDirectory::new(store.clone()));
        Self {
            config,
            db,
            store,
            attachments: AttachmentManager::new(),
            identities,
        }
    }

    /// Replace the name/UUID lookup used by commands
    pub fn with_identity_resolver(mut self, identities: Arc<dyn IdentityResolver>) -> Self {
        self.identities = identities;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the database handle
    pub fn db(&self) -> Arc<Database> {
        self.db.clone()
    }

    /// Read access to the current store
    pub fn store(&self) -> RwLockReadGuard<'_, PermissionStore> {
        self.store.read()
    }

    pub fn attachments(&self) -> &AttachmentManager {
        &self.attachments
    }

    /// Resolve a command argument to an identity
    pub fn lookup(&self, name_or_id: &str) -> Option<Uuid> {
        self.identities.lookup(name_or_id)
    }

    /// Apply an edit under the write lock. Sessions are not reloaded.
    pub fn edit<T>(&self, f: impl FnOnce(&mut PermissionStore) -> T) -> T {
        f(&mut self.store.write())
    }

    /// Session connected: record its name and attach its permissions
    pub fn connect(&self, identity: Uuid, name: &str, session: Arc<dyn Session>) -> AttachmentHandle {
        self.store.write().remember_name(identity, name);
        let store = self.store.read();
        self.attachments.attach(identity, session, &store)
    }

    /// Session left: drop its attachment
    pub fn disconnect(&self, identity: &Uuid) -> bool {
        self.attachments.detach(identity)
    }

    /// Effective permissions for an identity
    pub fn resolve(&self, identity: &Uuid) -> Result<PermissionSet, PermissionError> {
        permissions::resolve(identity, &self.store.read())
    }

    /// Display prefix for an identity (its first group's prefix)
    pub fn prefix_of(&self, identity: &Uuid) -> Option<String> {
        self.store.read().user_prefix(identity).map(str::to_string)
    }

    /// Re-resolve one attached identity against the current store
    pub fn reload(&self, identity: &Uuid) -> Option<AttachmentHandle> {
        let store = self.store.read();
        self.attachments.reload(identity, &store)
    }

    /// Re-resolve every attached identity against the current store
    pub fn reload_all(&self) -> ReloadSummary {
        let store = self.store.read();
        self.attachments.reload_all(&store)
    }

    /// Write a snapshot of the store to the database
    pub async fn save(&self) -> Result<()> {
        let snapshot = self.store.read().clone();
        self.db.save(&snapshot).await?;
        debug!("Store saved");
        Ok(())
    }

    /// Replace the in-memory store with what is in the database and
    /// refresh every attached session against it
    pub async fn load(&self) -> Result<ReloadSummary> {
        let loaded = self.db.load().await?;
        *self.store.write() = loaded;
        Ok(self.reload_all())
    }

    /// Save and detach every session
    pub async fn shutdown(&self) -> Result<()> {
        self.save().await?;
        let detached = self.attachments.detach_all();
        info!("permd shutdown complete ({} sessions detached)", detached);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionNode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingSession {
        refreshes: AtomicUsize,
    }

    impl Session for CountingSession {
        fn set_permission(&self, _node: &str, _granted: bool) {}
        fn unset_permission(&self, _node: &str) {}
        fn permissions_changed(&self) {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn engine() -> Engine {
        Engine::open(Config::default()).await.unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.db_path, None);
        assert_eq!(config.log_filter, "permd=info");
        assert!(!config.log_json);
        assert!(config.save_on_edit);
    }

    #[test]
    fn test_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("permd.toml");
        std::fs::write(
            &path,
            "db_path = \"perms.db\"\nlog_json = true\nsave_on_edit = false\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.db_path.as_deref(), Some("perms.db"));
        assert!(config.log_json);
        assert!(!config.save_on_edit);
        assert_eq!(config.log_filter, "permd=info");
    }

    #[test]
    fn test_config_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.save_on_edit, Config::default().save_on_edit);
        assert_eq!(config.log_filter, Config::default().log_filter);
    }

    #[tokio::test]
    async fn test_connect_records_name_and_attaches() {
        let engine = engine().await;
        let alice = Uuid::new_v4();
        engine.edit(|s| s.create_group("vip")).unwrap();
        engine
            .edit(|s| s.add_group_permission("vip", &PermissionNode::parse("chat.color").unwrap()))
            .unwrap();
        engine.edit(|s| s.add_user_group(alice, "vip")).unwrap();

        let session = Arc::new(CountingSession::default());
        let handle = engine.connect(alice, "Alice", session.clone());

        assert!(handle.permissions.is_granted("chat.color"));
        assert_eq!(engine.lookup("alice"), Some(alice));
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 1);
        assert!(engine.disconnect(&alice));
        assert!(!engine.disconnect(&alice));
    }

    #[tokio::test]
    async fn test_save_and_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("perms.db");
        let config = Config {
            db_path: Some(path.to_string_lossy().into_owned()),
            ..Config::default()
        };

        {
            let engine = Engine::open(config.clone()).await.unwrap();
            engine.edit(|s| s.create_group("admin")).unwrap();
            engine
                .edit(|s| s.add_default_permission(&PermissionNode::parse("core.spawn").unwrap()))
                .unwrap();
            engine.shutdown().await.unwrap();
        }

        let engine = Engine::open(config).await.unwrap();
        assert!(engine.store().has_group("admin"));
        assert_eq!(engine.store().default_permissions(), ["core.spawn"]);
    }

    #[tokio::test]
    async fn test_load_refreshes_attached_sessions() {
        let engine = engine().await;
        let alice = Uuid::new_v4();
        let session = Arc::new(CountingSession::default());
        engine.connect(alice, "Alice", session.clone());

        let mut replacement = engine.store().clone();
        replacement
            .add_default_permission(&PermissionNode::parse("core.spawn").unwrap())
            .unwrap();
        engine.db().save(&replacement).await.unwrap();

        let summary = engine.load().await.unwrap();
        assert_eq!(summary.reloaded, 1);
        let handle = engine.attachments().handle(&alice).unwrap();
        assert!(handle.permissions.is_granted("core.spawn"));
        assert_eq!(session.refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_prefix_of_first_group() {
        let engine = engine().await;
        let bob = Uuid::new_v4();
        engine.edit(|s| s.create_group("mod")).unwrap();
        engine.edit(|s| s.create_group("vip")).unwrap();
        engine
            .edit(|s| s.set_group_prefix("mod", Some("[Mod]".into())))
            .unwrap();
        engine.edit(|s| s.add_user_group(bob, "mod")).unwrap();
        engine.edit(|s| s.add_user_group(bob, "vip")).unwrap();

        assert_eq!(engine.prefix_of(&bob).as_deref(), Some("[Mod]"));
        assert_eq!(engine.prefix_of(&Uuid::new_v4()), None);
    }
}
