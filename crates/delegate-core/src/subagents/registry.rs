//! Versioned registry of subagent definitions.
//!
//! Readers clone an `Arc` of the current [`RegistrySnapshot`]; a reload builds
//! a complete new snapshot and swaps it in under the single write lock, then
//! bumps the generation counter. A reader therefore never observes a partially
//! updated set. Generation `0` means nothing has been published yet.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tracing::info;

use super::{SubagentConfig, discover_subagents};

/// Immutable view of the registry at one generation.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    agents: Vec<SubagentConfig>,
}

impl RegistrySnapshot {
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, name: &str) -> Option<&SubagentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn agents(&self) -> &[SubagentConfig] {
        &self.agents
    }
}

/// Subagent registry shared by concurrent orchestrations.
pub struct SubagentRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    generation_tx: watch::Sender<u64>,
}

impl SubagentRegistry {
    /// An empty, not-yet-ready registry.
    pub fn new() -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            generation_tx,
        }
    }

    /// A registry with `agents` published as generation 1.
    pub fn with_agents(agents: Vec<SubagentConfig>) -> Self {
        let registry = Self::new();
        registry.publish(agents);
        registry
    }

    /// Replace the whole definition set, returning the new generation.
    pub fn publish(&self, agents: Vec<SubagentConfig>) -> u64 {
        let generation = {
            let mut current = self
                .current
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let generation = current.generation + 1;
            *current = Arc::new(RegistrySnapshot { generation, agents });
            generation
        };
        self.generation_tx.send_replace(generation);
        info!(generation, "Published subagent registry");
        generation
    }

    /// Rediscover built-in, personal and project definitions and publish them.
    pub fn reload(&self, project_agents_dir: Option<&Path>, personal_agents_dir: Option<&Path>) -> u64 {
        self.publish(discover_subagents(project_agents_dir, personal_agents_dir))
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*current)
    }

    /// Look up a definition by type name.
    pub fn get(&self, name: &str) -> Option<SubagentConfig> {
        self.snapshot().get(name).cloned()
    }

    pub fn generation(&self) -> u64 {
        *self.generation_tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.generation() > 0
    }

    /// Wait until at least one generation has been published.
    pub async fn wait_ready(&self) -> Arc<RegistrySnapshot> {
        let mut rx = self.generation_tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|generation| *generation > 0).await;
        self.snapshot()
    }
}

impl Default for SubagentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
