//! Model selector tokens and resolved model chains.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between provider and model in a concrete handle
/// (e.g. `anthropic/claude-sonnet-4`).
pub const PROVIDER_SEPARATOR: char = '/';

const GROUP_PREFIX: &str = "group:";

/// One entry of a subagent's ordered model-selector list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelSelector {
    /// Abstract tier resolved by the model-resolution collaborator.
    Group(String),
    /// Use the parent agent's model.
    Inherit,
    /// System default.
    Any,
    /// A provider-qualified handle used as-is.
    Concrete(String),
}

impl ModelSelector {
    /// Classify a raw selector token.
    ///
    /// Bare tokens that are neither keywords nor provider-qualified are
    /// treated as group names.
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        if let Some(name) = token.strip_prefix(GROUP_PREFIX) {
            return Self::Group(name.to_string());
        }
        match token {
            "inherit" => Self::Inherit,
            "any" => Self::Any,
            t if t.contains(PROVIDER_SEPARATOR) => Self::Concrete(t.to_string()),
            t => Self::Group(t.to_string()),
        }
    }

    /// Whether a raw token names a concrete model handle.
    pub fn is_concrete(token: &str) -> bool {
        matches!(Self::parse(token), Self::Concrete(_))
    }

    /// The concrete handle, if this selector is one.
    pub fn as_concrete(&self) -> Option<&str> {
        match self {
            Self::Concrete(handle) => Some(handle),
            _ => None,
        }
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(name) => write!(f, "{GROUP_PREFIX}{name}"),
            Self::Inherit => f.write_str("inherit"),
            Self::Any => f.write_str("any"),
            Self::Concrete(handle) => f.write_str(handle),
        }
    }
}

/// A concrete model to try first plus the ordered fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResolution {
    pub resolved_handle: String,
    pub expansion_chain: Vec<String>,
}

impl ModelResolution {
    /// A resolution with a single-element chain.
    pub fn single(handle: impl Into<String>) -> Self {
        let handle = handle.into();
        Self {
            expansion_chain: vec![handle.clone()],
            resolved_handle: handle,
        }
    }

    /// Enforce that the chain is non-empty and starts with `resolved_handle`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.expansion_chain.first() != Some(&self.resolved_handle) {
            self.expansion_chain.retain(|h| h != &self.resolved_handle);
            self.expansion_chain.insert(0, self.resolved_handle.clone());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_selector_kinds() {
        assert_eq!(
            ModelSelector::parse("group:fast"),
            ModelSelector::Group("fast".into())
        );
        assert_eq!(ModelSelector::parse("inherit"), ModelSelector::Inherit);
        assert_eq!(ModelSelector::parse(" any "), ModelSelector::Any);
        assert_eq!(
            ModelSelector::parse("openai/gpt-5"),
            ModelSelector::Concrete("openai/gpt-5".into())
        );
        assert_eq!(
            ModelSelector::parse("standard"),
            ModelSelector::Group("standard".into())
        );
    }

    #[test]
    fn display_round_trips_tokens() {
        for token in ["group:fast", "inherit", "any", "anthropic/claude-haiku-4"] {
            assert_eq!(ModelSelector::parse(token).to_string(), token);
        }
    }

    #[test]
    fn normalized_prepends_resolved_handle() {
        let resolution = ModelResolution {
            resolved_handle: "a/x".into(),
            expansion_chain: vec!["b/y".into(), "a/x".into()],
        }
        .normalized();
        assert_eq!(resolution.expansion_chain, vec!["a/x", "b/y"]);

        let empty = ModelResolution {
            resolved_handle: "a/x".into(),
            expansion_chain: vec![],
        }
        .normalized();
        assert_eq!(empty.expansion_chain, vec!["a/x"]);
    }

    #[test]
    fn resolution_uses_camel_case_on_the_wire() {
        let json = serde_json::to_value(ModelResolution::single("a/x")).unwrap_or_default();
        assert_eq!(json["resolvedHandle"], "a/x");
        assert_eq!(json["expansionChain"][0], "a/x");
    }
}
