//! Read-only view of the parent's permission state.

use delegate_core::config::PermissionSettings;
use delegate_core::subagents::PermissionMode;

/// Permission mode and tool patterns inherited by children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSnapshot {
    pub mode: Option<PermissionMode>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
}

/// Source of the parent's current permission state.
pub trait PermissionSource: Send + Sync {
    fn snapshot(&self) -> PermissionSnapshot;
}

/// Permissions fixed at construction, typically from settings.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions(PermissionSnapshot);

impl StaticPermissions {
    pub const fn new(snapshot: PermissionSnapshot) -> Self {
        Self(snapshot)
    }
}

impl From<&PermissionSettings> for StaticPermissions {
    fn from(settings: &PermissionSettings) -> Self {
        Self(PermissionSnapshot {
            mode: settings.mode,
            allowed_tools: settings.allowed_tools.clone(),
            disallowed_tools: settings.disallowed_tools.clone(),
        })
    }
}

impl PermissionSource for StaticPermissions {
    fn snapshot(&self) -> PermissionSnapshot {
        self.0.clone()
    }
}
