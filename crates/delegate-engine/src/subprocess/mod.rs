//! Subagent child execution: argument construction, supervision, and
//! stream-json processing.

pub mod args;
pub mod bridge;
pub mod executor;
pub mod manager;

pub use args::{ArgsInput, LaunchIdentity, RoutingTags, build_args, build_env};
pub use bridge::{
    AttemptFailure, AttemptOutcome, AttemptReport, AttemptSuccess, DiscoveredIdentity,
    ExecutionState, StreamEventProcessor, StreamUpdate, ToolCallRecord, UsageStats,
};
pub use executor::{AttemptExecutor, ExitReport, LaunchSpec, ProcessExit, SpawnError};
pub use manager::ProcessExecutor;
