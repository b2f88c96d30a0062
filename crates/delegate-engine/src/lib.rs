//! `delegate` Engine Library
//!
//! Runs subagents as supervised child processes:
//! - model selector resolution with an optional remote resolver
//! - child process supervision with cooperative cancellation
//! - stream-json event processing into identities, tool calls and results
//! - failure classification, bounded retries and model fallback

pub mod context;
pub mod orchestration;
pub mod resolver;
pub mod subprocess;

pub use context::EngineContext;
pub use orchestration::{Orchestrator, ParentContext, SpawnRequest, SubagentResult};
