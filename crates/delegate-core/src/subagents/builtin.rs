//! Built-in subagent types.

use super::{MemoryBlockPolicy, PermissionMode, SubagentConfig, SubagentSource, ToolPolicy};

const READ_ONLY_TOOLS: &[&str] = &["Glob", "Grep", "Read", "LS"];

fn read_only_tools() -> ToolPolicy {
    ToolPolicy::Only(READ_ONLY_TOOLS.iter().map(|t| (*t).to_string()).collect())
}

/// Returns the subagent types that ship with the engine.
pub fn builtin_subagents() -> Vec<SubagentConfig> {
    vec![
        SubagentConfig {
            name: "general-purpose".to_string(),
            description: "Multi-step research and implementation tasks with full tool access"
                .to_string(),
            recommended_model: "inherit".to_string(),
            model_selectors: vec!["inherit".to_string()],
            allowed_tools: ToolPolicy::All,
            memory_blocks: MemoryBlockPolicy::All,
            permission_mode: None,
            skills: Vec::new(),
            max_turns: None,
            source: SubagentSource::Builtin,
        },
        SubagentConfig {
            name: "explore".to_string(),
            description: "Fast read-only codebase search".to_string(),
            recommended_model: "group:fast".to_string(),
            model_selectors: vec!["group:fast".to_string(), "any".to_string()],
            allowed_tools: read_only_tools(),
            memory_blocks: MemoryBlockPolicy::None,
            permission_mode: None,
            skills: Vec::new(),
            max_turns: Some(40),
            source: SubagentSource::Builtin,
        },
        SubagentConfig {
            name: "plan".to_string(),
            description: "Designs an implementation plan without editing files".to_string(),
            recommended_model: "group:standard".to_string(),
            model_selectors: vec!["group:standard".to_string(), "inherit".to_string()],
            allowed_tools: read_only_tools(),
            memory_blocks: MemoryBlockPolicy::All,
            permission_mode: Some(PermissionMode::Plan),
            skills: Vec::new(),
            max_turns: None,
            source: SubagentSource::Builtin,
        },
    ]
}
