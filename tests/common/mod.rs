//! Common test utilities - recording session and engine helpers

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use permd::commands::{AdminCommand, CommandOutput};
use permd::permissions::Session;
use permd::{Config, Engine};

/// Session that mirrors what the engine applied and counts callbacks
#[derive(Default)]
pub struct RecordingSession {
    live: Mutex<BTreeMap<String, bool>>,
    sets: Mutex<usize>,
    unsets: Mutex<usize>,
    refreshes: Mutex<usize>,
}

impl RecordingSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Nodes currently set on the session
    pub fn live(&self) -> BTreeMap<String, bool> {
        self.live.lock().clone()
    }

    pub fn has(&self, node: &str) -> Option<bool> {
        self.live.lock().get(node).copied()
    }

    pub fn sets(&self) -> usize {
        *self.sets.lock()
    }

    pub fn unsets(&self) -> usize {
        *self.unsets.lock()
    }

    pub fn refreshes(&self) -> usize {
        *self.refreshes.lock()
    }
}

impl Session for RecordingSession {
    fn set_permission(&self, node: &str, granted: bool) {
        self.live.lock().insert(node.to_string(), granted);
        *self.sets.lock() += 1;
    }

    fn unset_permission(&self, node: &str) {
        self.live.lock().remove(node);
        *self.unsets.lock() += 1;
    }

    fn permissions_changed(&self) {
        *self.refreshes.lock() += 1;
    }
}

/// Engine over an in-memory database
pub async fn engine() -> Engine {
    Engine::open(Config::default())
        .await
        .expect("Failed to open engine")
}

/// Parse and execute one command line
pub async fn run(engine: &Engine, line: &str) -> CommandOutput {
    let words: Vec<&str> = line.split_whitespace().collect();
    let command = AdminCommand::parse(&words).expect("Failed to parse command");
    engine.execute(command).await.expect("Command failed")
}
