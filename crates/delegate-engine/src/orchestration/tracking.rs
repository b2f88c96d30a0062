//! External state tracking.
//!
//! Tracker calls are fire-and-forget: the orchestrator logs and drops any
//! [`TrackerError`]. Implementations must tolerate concurrent calls for
//! different correlation ids.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::subprocess::{DiscoveredIdentity, ToolCallRecord, UsageStats};

/// Errors from a state tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("State tracker unavailable: {0}")]
    Unavailable(String),
}

/// Records identities, tool calls and final stats per correlation id.
pub trait StateTracker: Send + Sync {
    fn register_identity(
        &self,
        correlation_id: &str,
        identity: &DiscoveredIdentity,
    ) -> Result<(), TrackerError>;

    fn record_tool_call(&self, correlation_id: &str, call: &ToolCallRecord)
    -> Result<(), TrackerError>;

    fn record_stats(&self, correlation_id: &str, stats: &UsageStats) -> Result<(), TrackerError>;
}

/// Tracker that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStateTracker;

impl StateTracker for NoopStateTracker {
    fn register_identity(&self, _: &str, _: &DiscoveredIdentity) -> Result<(), TrackerError> {
        Ok(())
    }

    fn record_tool_call(&self, _: &str, _: &ToolCallRecord) -> Result<(), TrackerError> {
        Ok(())
    }

    fn record_stats(&self, _: &str, _: &UsageStats) -> Result<(), TrackerError> {
        Ok(())
    }
}

/// Everything tracked for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedInvocation {
    pub identity: DiscoveredIdentity,
    pub tool_calls: Vec<ToolCallRecord>,
    pub stats: Option<UsageStats>,
}

/// In-process tracker keyed by correlation id.
#[derive(Debug, Default)]
pub struct InMemoryStateTracker {
    entries: Mutex<HashMap<String, TrackedInvocation>>,
}

impl InMemoryStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, correlation_id: &str) -> Option<TrackedInvocation> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(correlation_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, correlation_id: &str, f: impl FnOnce(&mut TrackedInvocation)) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f(entries.entry(correlation_id.to_string()).or_default());
    }
}

impl StateTracker for InMemoryStateTracker {
    fn register_identity(
        &self,
        correlation_id: &str,
        identity: &DiscoveredIdentity,
    ) -> Result<(), TrackerError> {
        self.update(correlation_id, |entry| entry.identity = identity.clone());
        Ok(())
    }

    fn record_tool_call(
        &self,
        correlation_id: &str,
        call: &ToolCallRecord,
    ) -> Result<(), TrackerError> {
        self.update(correlation_id, |entry| entry.tool_calls.push(call.clone()));
        Ok(())
    }

    fn record_stats(&self, correlation_id: &str, stats: &UsageStats) -> Result<(), TrackerError> {
        self.update(correlation_id, |entry| entry.stats = Some(*stats));
        Ok(())
    }
}
