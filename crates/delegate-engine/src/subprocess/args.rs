//! Child argument vector and environment construction.
//!
//! The output is a pure function of the inputs so identical requests produce
//! identical command lines.

use delegate_core::config::EngineSettings;
use delegate_core::subagents::{MemoryBlockPolicy, PermissionMode, SubagentConfig};

use crate::orchestration::permissions::PermissionSnapshot;

/// Fixed streaming-output flag pair.
pub const OUTPUT_FORMAT: [&str; 2] = ["--output-format", "stream-json"];

pub const ENV_ROLE: &str = "DELEGATE_ROLE";
pub const ENV_SUBAGENT_TYPE: &str = "DELEGATE_SUBAGENT_TYPE";
pub const ENV_CORRELATION_ID: &str = "DELEGATE_CORRELATION_ID";
pub const ENV_PARENT_AGENT_ID: &str = "DELEGATE_PARENT_AGENT_ID";

/// Which identity an attempt runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchIdentity {
    /// Create a new identity for the subagent type on `model`.
    New { model: String },
    /// Continue an existing conversation.
    Conversation(String),
    /// Open a new conversation on an existing agent.
    Agent(String),
}

impl LaunchIdentity {
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::New { .. })
    }
}

/// Inputs of [`build_args`].
#[derive(Debug, Clone, Copy)]
pub struct ArgsInput<'a> {
    pub identity: &'a LaunchIdentity,
    pub prompt: &'a str,
    pub subagent: &'a SubagentConfig,
    pub permissions: &'a PermissionSnapshot,
    /// Engine-wide turn cap used when the subagent sets none.
    pub default_max_turns: Option<u32>,
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: impl Into<String>) {
    args.push(flag.to_string());
    args.push(value.into());
}

/// Build the child's argument vector.
pub fn build_args(input: &ArgsInput<'_>) -> Vec<String> {
    let subagent = input.subagent;
    let mut args = Vec::new();

    match input.identity {
        LaunchIdentity::New { model } => {
            args.push("--new-agent".to_string());
            push_flag(&mut args, "--system", &subagent.name);
            push_flag(&mut args, "--model", model);
        }
        LaunchIdentity::Conversation(id) => push_flag(&mut args, "--conversation", id),
        LaunchIdentity::Agent(id) => {
            push_flag(&mut args, "--agent", id);
            args.push("--new".to_string());
        }
    }

    push_flag(&mut args, "-p", input.prompt);
    args.extend(OUTPUT_FORMAT.map(String::from));

    if let Some(mode) = permission_mode(subagent, input.permissions) {
        push_flag(&mut args, "--permission-mode", mode.as_str());
    }

    let allowed = union_patterns(
        &input.permissions.allowed_tools,
        subagent.allowed_tools.explicit().unwrap_or_default(),
    );
    if !allowed.is_empty() {
        push_flag(&mut args, "--allowedTools", allowed.join(","));
    }
    if !input.permissions.disallowed_tools.is_empty() {
        push_flag(
            &mut args,
            "--disallowedTools",
            input.permissions.disallowed_tools.join(","),
        );
    }

    if input.identity.is_new() {
        match &subagent.memory_blocks {
            MemoryBlockPolicy::All => {}
            MemoryBlockPolicy::None => push_flag(&mut args, "--init-blocks", "none"),
            MemoryBlockPolicy::Only(blocks) => {
                push_flag(&mut args, "--init-blocks", blocks.join(","));
            }
        }
    }

    if let Some(tools) = subagent.allowed_tools.explicit() {
        push_flag(&mut args, "--tools", tools.join(","));
    }
    if let Some(turns) = subagent.max_turns.or(input.default_max_turns) {
        push_flag(&mut args, "--max-turns", turns.to_string());
    }
    if !subagent.skills.is_empty() {
        push_flag(&mut args, "--skills", subagent.skills.join(","));
    }
    args
}

/// The subagent's own mode, else the parent's.
const fn permission_mode(
    subagent: &SubagentConfig,
    parent: &PermissionSnapshot,
) -> Option<PermissionMode> {
    match subagent.permission_mode {
        Some(mode) => Some(mode),
        None => parent.mode,
    }
}

/// Order-preserving union without duplicates.
fn union_patterns(inherited: &[String], own: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(inherited.len() + own.len());
    for pattern in inherited.iter().chain(own) {
        if !out.contains(pattern) {
            out.push(pattern.clone());
        }
    }
    out
}

/// Per-attempt routing tags.
#[derive(Debug, Clone, Copy)]
pub struct RoutingTags<'a> {
    pub subagent_type: &'a str,
    pub correlation_id: &'a str,
    pub parent_agent_id: Option<&'a str>,
}

/// Environment overrides: forwarded credentials plus routing tags.
///
/// `lookup` reads the parent environment; only variables that are set are
/// forwarded.
pub fn build_env(
    engine: &EngineSettings,
    tags: &RoutingTags<'_>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = engine
        .forward_env
        .iter()
        .filter_map(|key| lookup(key).map(|value| (key.clone(), value)))
        .collect();
    env.push((ENV_ROLE.to_string(), "subagent".to_string()));
    env.push((ENV_SUBAGENT_TYPE.to_string(), tags.subagent_type.to_string()));
    env.push((ENV_CORRELATION_ID.to_string(), tags.correlation_id.to_string()));
    if let Some(parent) = tags.parent_agent_id {
        env.push((ENV_PARENT_AGENT_ID.to_string(), parent.to_string()));
    }
    env
}
