//! The attempt-executor seam.
//!
//! An [`AttemptExecutor`] runs exactly one child for one attempt. The real
//! implementation is [`super::ProcessExecutor`]; orchestration tests plug in
//! scripted executors instead.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Everything needed to launch one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Environment overrides layered over the parent's environment.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited on its own; `None` when killed by a signal.
    Exited { code: Option<i32> },
    /// Terminated because the caller cancelled.
    Interrupted,
}

impl ProcessExit {
    pub const fn code(self) -> Option<i32> {
        match self {
            Self::Exited { code } => code,
            Self::Interrupted => None,
        }
    }
}

/// Result of awaiting one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub exit: ProcessExit,
    /// Everything the child wrote to stderr.
    pub stderr: String,
}

/// OS-level failures to start a child. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to capture child {0}")]
    MissingPipe(&'static str),
}

/// Runs one attempt, feeding stdout lines to `on_line` in emission order.
///
/// Implementations must return [`ProcessExit::Interrupted`] promptly once
/// `cancel` fires, and must release every handle attached to the child on
/// every return path.
#[async_trait]
pub trait AttemptExecutor: Send + Sync {
    async fn run_attempt(
        &self,
        spec: &LaunchSpec,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ExitReport, SpawnError>;
}
