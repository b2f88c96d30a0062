//! Discovery of custom subagents from `agents/*.md` files.
//!
//! Each file carries YAML frontmatter:
//!
//! ```text
//! ---
//! name: reviewer
//! description: Reviews diffs for correctness
//! model: group:fast, inherit
//! tools: [Read, Grep]
//! memoryBlocks: none
//! permissionMode: plan
//! skills: [rust-style]
//! maxTurns: 20
//! ---
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    MemoryBlockPolicy, PermissionMode, SubagentConfig, SubagentSource, ToolPolicy,
    builtin_subagents,
};
use crate::error::{Error, Result};

/// A frontmatter value written either as `a, b` or as a YAML list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_list(self) -> Vec<String> {
        let items = match self {
            Self::One(s) => s.split(',').map(str::to_string).collect(),
            Self::Many(v) => v,
        };
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Raw frontmatter fields of a subagent definition file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentFrontmatter {
    pub name: Option<String>,
    pub description: Option<String>,
    pub model: Option<StringOrList>,
    pub tools: Option<StringOrList>,
    pub memory_blocks: Option<StringOrList>,
    pub permission_mode: Option<String>,
    pub skills: Option<StringOrList>,
    pub max_turns: Option<u32>,
}

/// Split a markdown document into its YAML frontmatter and body.
pub fn parse_frontmatter(content: &str) -> Result<(SubagentFrontmatter, String)> {
    let content = content.trim_start_matches('\u{feff}').trim();
    let Some(rest) = content.strip_prefix("---") else {
        return Err(Error::Config(
            "file must start with YAML frontmatter (---)".to_string(),
        ));
    };
    let end = rest
        .find("\n---")
        .ok_or_else(|| Error::Config("missing closing --- for YAML frontmatter".to_string()))?;

    let yaml = rest[..end].trim();
    let body = rest[end + 4..].trim().to_string();
    let frontmatter = if yaml.is_empty() {
        SubagentFrontmatter::default()
    } else {
        serde_yaml::from_str(yaml)?
    };
    Ok((frontmatter, body))
}

fn tool_policy(value: Option<StringOrList>) -> ToolPolicy {
    let Some(value) = value else {
        return ToolPolicy::All;
    };
    let tools = value.into_list();
    if tools.is_empty() || tools.iter().any(|t| t == "all" || t == "*") {
        ToolPolicy::All
    } else {
        ToolPolicy::Only(tools)
    }
}

fn memory_policy(value: Option<StringOrList>) -> MemoryBlockPolicy {
    let Some(value) = value else {
        return MemoryBlockPolicy::All;
    };
    let blocks = value.into_list();
    match blocks.as_slice() {
        [] => MemoryBlockPolicy::All,
        [one] if one == "all" => MemoryBlockPolicy::All,
        [one] if one == "none" => MemoryBlockPolicy::None,
        _ => MemoryBlockPolicy::Only(blocks),
    }
}

/// Load a subagent definition from a markdown file with YAML frontmatter.
pub fn load_subagent_from_md(path: &Path, source: SubagentSource) -> Result<SubagentConfig> {
    let content = std::fs::read_to_string(path)?;
    let definition_error = |reason: String| Error::Definition {
        path: path.display().to_string(),
        reason,
    };
    let (frontmatter, body) =
        parse_frontmatter(&content).map_err(|e| definition_error(e.to_string()))?;

    let name = match frontmatter.name {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(String::from)
            .ok_or_else(|| definition_error("cannot derive a name".to_string()))?,
    };
    let description = frontmatter.description.unwrap_or_else(|| {
        body.lines()
            .map(|l| l.trim_start_matches('#').trim())
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string()
    });
    let model_selectors = frontmatter
        .model
        .map(StringOrList::into_list)
        .unwrap_or_default();
    let recommended_model = model_selectors
        .first()
        .cloned()
        .unwrap_or_else(|| "inherit".to_string());
    let permission_mode = frontmatter
        .permission_mode
        .as_deref()
        .map(str::parse::<PermissionMode>)
        .transpose()
        .map_err(|e| definition_error(e.to_string()))?;

    Ok(SubagentConfig {
        name,
        description,
        recommended_model,
        model_selectors,
        allowed_tools: tool_policy(frontmatter.tools),
        memory_blocks: memory_policy(frontmatter.memory_blocks),
        permission_mode,
        skills: frontmatter
            .skills
            .map(StringOrList::into_list)
            .unwrap_or_default(),
        max_turns: frontmatter.max_turns,
        source,
    })
}

/// Collects all `.md` files in a directory, sorted by path.
///
/// Returns an empty `Vec` if the directory does not exist or is unreadable.
fn collect_md_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("md"))
        .collect();
    files.sort();
    files
}

fn load_dir(dir: &Path, source: impl Fn(PathBuf) -> SubagentSource) -> Vec<SubagentConfig> {
    collect_md_files(dir)
        .into_iter()
        .filter_map(|path| match load_subagent_from_md(&path, source(path.clone())) {
            Ok(config) => {
                debug!(name = %config.name, path = %path.display(), "Loaded subagent definition");
                Some(config)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed subagent definition");
                None
            }
        })
        .collect()
}

fn upsert(agents: &mut Vec<SubagentConfig>, config: SubagentConfig) {
    if let Some(existing) = agents.iter_mut().find(|a| a.name == config.name) {
        *existing = config;
    } else {
        agents.push(config);
    }
}

/// Built-ins overlaid with personal and then project definitions.
///
/// Project definitions shadow personal ones, which shadow built-ins.
pub fn discover_subagents(
    project_agents_dir: Option<&Path>,
    personal_agents_dir: Option<&Path>,
) -> Vec<SubagentConfig> {
    let mut agents = builtin_subagents();
    if let Some(dir) = personal_agents_dir {
        for config in load_dir(dir, SubagentSource::Personal) {
            upsert(&mut agents, config);
        }
    }
    if let Some(dir) = project_agents_dir {
        for config in load_dir(dir, SubagentSource::Project) {
            upsert(&mut agents, config);
        }
    }
    agents
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REVIEWER: &str = "---\nname: reviewer\ndescription: Reviews diffs\nmodel: group:fast, inherit\ntools: [Read, Grep]\nmemoryBlocks: none\npermissionMode: plan\nskills: rust-style\nmaxTurns: 20\n---\nYou review code.\n";

    #[test]
    fn parse_full_frontmatter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reviewer.md");
        std::fs::write(&path, REVIEWER).unwrap();

        let config = load_subagent_from_md(&path, SubagentSource::Project(path.clone())).unwrap();
        assert_eq!(config.name, "reviewer");
        assert_eq!(config.model_selectors, vec!["group:fast", "inherit"]);
        assert_eq!(config.recommended_model, "group:fast");
        assert_eq!(
            config.allowed_tools,
            ToolPolicy::Only(vec!["Read".into(), "Grep".into()])
        );
        assert_eq!(config.memory_blocks, MemoryBlockPolicy::None);
        assert_eq!(config.permission_mode, Some(PermissionMode::Plan));
        assert_eq!(config.skills, vec!["rust-style"]);
        assert_eq!(config.max_turns, Some(20));
    }

    #[test]
    fn name_and_description_fall_back_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docs-writer.md");
        std::fs::write(&path, "---\ntools: all\n---\n# Writes docs\n").unwrap();

        let config = load_subagent_from_md(&path, SubagentSource::Builtin).unwrap();
        assert_eq!(config.name, "docs-writer");
        assert_eq!(config.description, "Writes docs");
        assert_eq!(config.allowed_tools, ToolPolicy::All);
        assert_eq!(config.selectors(), vec!["inherit"]);
    }

    #[test]
    fn missing_frontmatter_is_rejected() {
        assert!(parse_frontmatter("# just markdown").is_err());
        assert!(parse_frontmatter("---\nname: x\n").is_err());
    }

    #[test]
    fn bad_permission_mode_is_a_definition_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.md");
        std::fs::write(&path, "---\npermissionMode: sometimes\n---\n").unwrap();
        let err = load_subagent_from_md(&path, SubagentSource::Builtin).unwrap_err();
        assert!(matches!(err, Error::Definition { .. }));
    }

    #[test]
    fn project_shadows_personal_and_builtin() {
        let project = TempDir::new().unwrap();
        let personal = TempDir::new().unwrap();
        std::fs::write(
            personal.path().join("explore.md"),
            "---\ndescription: personal explore\n---\n",
        )
        .unwrap();
        std::fs::write(
            personal.path().join("reviewer.md"),
            "---\ndescription: personal reviewer\n---\n",
        )
        .unwrap();
        std::fs::write(
            project.path().join("reviewer.md"),
            "---\ndescription: project reviewer\n---\n",
        )
        .unwrap();
        std::fs::write(project.path().join("broken.md"), "no frontmatter").unwrap();

        let agents = discover_subagents(Some(project.path()), Some(personal.path()));
        let find = |name: &str| agents.iter().find(|a| a.name == name).unwrap();
        assert_eq!(find("explore").description, "personal explore");
        assert_eq!(find("reviewer").description, "project reviewer");
        assert!(matches!(find("reviewer").source, SubagentSource::Project(_)));
        assert!(agents.iter().all(|a| a.name != "broken"));
    }

    #[test]
    fn missing_dirs_yield_builtins() {
        let dir = TempDir::new().unwrap();
        let agents = discover_subagents(Some(&dir.path().join("nope")), None);
        assert_eq!(agents, builtin_subagents());
    }
}
