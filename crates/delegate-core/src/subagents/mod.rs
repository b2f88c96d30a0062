//! Subagent definitions.
//!
//! A [`SubagentConfig`] is immutable once loaded. Definitions come from the
//! built-in set and from markdown files with YAML frontmatter; the
//! [`SubagentRegistry`] publishes them as versioned snapshots.

pub mod builtin;
pub mod discovery;
pub mod registry;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use builtin::builtin_subagents;
pub use discovery::{discover_subagents, load_subagent_from_md, parse_frontmatter};
pub use registry::{RegistrySnapshot, SubagentRegistry};

/// Which tools a subagent may use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolPolicy {
    #[default]
    All,
    Only(Vec<String>),
}

impl ToolPolicy {
    /// Explicit tool names, or `None` for the unrestricted policy.
    pub fn explicit(&self) -> Option<&[String]> {
        match self {
            Self::All => None,
            Self::Only(tools) => Some(tools),
        }
    }
}

/// Which memory blocks a newly created subagent identity starts with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MemoryBlockPolicy {
    #[default]
    All,
    None,
    Only(Vec<String>),
}

/// Permission mode passed to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    Plan,
    BypassPermissions,
}

impl PermissionMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "acceptEdits" | "accept-edits" => Ok(Self::AcceptEdits),
            "plan" => Ok(Self::Plan),
            "bypassPermissions" | "bypass-permissions" => Ok(Self::BypassPermissions),
            other => Err(crate::Error::Config(format!(
                "unknown permission mode: {other}"
            ))),
        }
    }
}

/// Where a subagent definition came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubagentSource {
    Builtin,
    Project(PathBuf),
    Personal(PathBuf),
}

/// Immutable definition of one subagent type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubagentConfig {
    /// Type name, also passed to the child as its system-prompt selector.
    pub name: String,
    pub description: String,
    /// Model recommended for this type; used when `model_selectors` is empty.
    pub recommended_model: String,
    /// Ordered selector tokens (`group:<name>`, `inherit`, `any`, or a handle).
    pub model_selectors: Vec<String>,
    pub allowed_tools: ToolPolicy,
    pub memory_blocks: MemoryBlockPolicy,
    pub permission_mode: Option<PermissionMode>,
    pub skills: Vec<String>,
    pub max_turns: Option<u32>,
    pub source: SubagentSource,
}

impl SubagentConfig {
    /// The selector list to resolve, falling back to the recommended model.
    pub fn selectors(&self) -> Vec<String> {
        if self.model_selectors.is_empty() {
            vec![self.recommended_model.clone()]
        } else {
            self.model_selectors.clone()
        }
    }

    /// Short label for the capability tier this type targets.
    pub fn tier_label(&self) -> String {
        self.selectors()
            .into_iter()
            .next()
            .unwrap_or_else(|| "any".to_string())
    }
}
