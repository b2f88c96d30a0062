//! Subagent orchestration: retry policy, failure classification, progress
//! reporting and the [`Orchestrator`] facade.

pub mod classifier;
pub mod manager;
pub mod permissions;
pub mod progress;
pub mod retry;
pub mod tracking;

pub use classifier::{FailureClassifier, FailureKind, PhraseClassifier};
pub use manager::{INTERRUPTED_MESSAGE, Orchestrator, ParentContext, SpawnRequest, SubagentResult};
pub use permissions::{PermissionSnapshot, PermissionSource, StaticPermissions};
pub use progress::{ObserverError, ProgressEvent, ProgressObserver};
pub use retry::{BackoffOutcome, RetryContext, RetryCoordinator, RetryDecision, RetryPolicy};
pub use tracking::{
    InMemoryStateTracker, NoopStateTracker, StateTracker, TrackedInvocation, TrackerError,
};
