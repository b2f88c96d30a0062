//! Configuration resolution for delegate.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config_dir>/delegate/settings.json`)
//! 3. Project config (`.delegate/settings.json`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! File layers are deep-merged as JSON, so a partial file only overrides the
//! keys it names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::subagents::PermissionMode;

/// Complete delegate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub permissions: PermissionSettings,
}

/// How children are launched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    /// Executable spawned for each attempt.
    pub child_bin: PathBuf,
    /// Process-wide default model, the last local fallback.
    pub default_model: String,
    /// Turn cap passed to children when the subagent type sets none.
    pub max_turns: Option<u32>,
    /// Seconds to wait after SIGTERM before SIGKILL.
    pub terminate_timeout_secs: u64,
    /// Base URL of the model-resolution service.
    pub resolver_url: Option<String>,
    pub resolver_timeout_secs: u64,
    /// Parent environment variables forwarded to children when set.
    pub forward_env: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            child_bin: PathBuf::from("delegate-agent"),
            default_model: "anthropic/claude-sonnet-4".to_string(),
            max_turns: None,
            terminate_timeout_secs: 5,
            resolver_url: None,
            resolver_timeout_secs: 10,
            forward_env: vec![
                "DELEGATE_API_KEY".to_string(),
                "DELEGATE_BASE_URL".to_string(),
            ],
        }
    }
}

/// Same-model retry budget and backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    /// Extra attempts on the same model after rate-limit/transport failures.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            max_jitter_ms: 250,
        }
    }
}

/// Parent permission state inherited by children.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PermissionSettings {
    pub mode: Option<PermissionMode>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
}

/// Load configuration with hierarchical resolution from the real environment.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let global = global_config_path();
    let mut config = load_config_from(global.as_deref(), project_dir)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Load defaults overlaid with the given global file and project directory.
pub fn load_config_from(global_path: Option<&Path>, project_dir: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(path) = global_path.filter(|p| p.exists()) {
        merge_values(&mut merged, load_config_file(path)?);
    }
    if let Some(dir) = project_dir {
        let path = project_config_path(dir);
        if path.exists() {
            merge_values(&mut merged, load_config_file(&path)?);
        }
    }

    serde_json::from_value(merged).map_err(|e| Error::Config(format!("Invalid settings: {e}")))
}

/// Global settings file: `<config_dir>/delegate/settings.json`.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("delegate").join("settings.json"))
}

/// Project settings file: `<project>/.delegate/settings.json`.
pub fn project_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".delegate").join("settings.json")
}

/// Personal subagent definitions: `<config_dir>/delegate/agents`.
pub fn personal_agents_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("delegate").join("agents"))
}

/// Project subagent definitions: `<project>/.delegate/agents`.
pub fn project_agents_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(".delegate").join("agents")
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Recursively overlay `overlay` onto `base`; non-object values replace.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_values(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `DELEGATE_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("DELEGATE_CHILD_BIN") {
        config.engine.child_bin = PathBuf::from(val);
    }
    if let Some(val) = lookup("DELEGATE_DEFAULT_MODEL") {
        config.engine.default_model = val;
    }
    if let Some(n) = lookup("DELEGATE_MAX_TURNS").and_then(|v| v.parse().ok()) {
        config.engine.max_turns = Some(n);
    }
    if let Some(val) = lookup("DELEGATE_RESOLVER_URL") {
        config.engine.resolver_url = Some(val).filter(|v| !v.is_empty());
    }
    if let Some(n) = lookup("DELEGATE_MAX_RETRIES").and_then(|v| v.parse().ok()) {
        config.retry.max_retries = n;
    }
    if let Some(mode) = lookup("DELEGATE_PERMISSION_MODE").and_then(|v| v.parse().ok()) {
        config.permissions.mode = Some(mode);
    }
}
