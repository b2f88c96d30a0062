//! Best-effort progress notifications.

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::Serialize;
use tracing::warn;

use super::classifier::FailureKind;

/// Errors an observer may report. They are logged and otherwise ignored.
#[derive(Debug, thiserror::Error)]
#[error("Progress observer failed: {0}")]
pub struct ObserverError(pub String);

/// Events surfaced while a subagent runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Model chosen for the invocation. `display_only` when attaching to an
    /// identity that keeps its own model.
    ModelSelected {
        model: String,
        chain: Vec<String>,
        display_only: bool,
    },
    IdentityDiscovered {
        agent_id: Option<String>,
        conversation_id: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        args: String,
    },
    /// Another attempt on the same model.
    Retry {
        attempt: u32,
        kind: FailureKind,
        resume: bool,
        reason: String,
    },
    /// Switching to another model with a fresh identity.
    Fallback {
        attempt: u32,
        kind: FailureKind,
        from_model: Option<String>,
        to_model: String,
        reason: String,
    },
    Backoff {
        attempt: u32,
        delay_ms: u64,
    },
}

/// Receives progress for one invocation.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, correlation_id: &str, event: &ProgressEvent) -> Result<(), ObserverError>;
}

impl<F> ProgressObserver for F
where
    F: Fn(&str, &ProgressEvent) + Send + Sync,
{
    fn on_event(&self, correlation_id: &str, event: &ProgressEvent) -> Result<(), ObserverError> {
        self(correlation_id, event);
        Ok(())
    }
}

/// Deliver `event`, swallowing observer errors and panics.
pub fn notify(observer: Option<&dyn ProgressObserver>, correlation_id: &str, event: &ProgressEvent) {
    let Some(observer) = observer else {
        return;
    };
    match catch_unwind(AssertUnwindSafe(|| observer.on_event(correlation_id, event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(correlation_id, error = %e, "Progress observer returned an error"),
        Err(_) => warn!(correlation_id, "Progress observer panicked"),
    }
}
