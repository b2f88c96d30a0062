//! `delegate` Core Library
//!
//! Shared functionality for the subagent engine:
//! - NDJSON parsing for the child's stream-json event protocol
//! - Subagent definitions, discovery and the versioned registry
//! - Model selector tokens
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod models;
pub mod ndjson;
pub mod subagents;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{ModelResolution, ModelSelector};
pub use subagents::{SubagentConfig, SubagentRegistry};
