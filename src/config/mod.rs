pub mod sources;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::graph::DeletePolicy;

pub use sources::{FeedCandidate, resolve_feed_files};

pub const PROJECT_CONFIG_FILE: &str = ".hashgraph.project.yml";
pub const CONFIG_DIR: &str = ".hashgraph";
pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedMode {
    Insert,
    Delete,
}

impl FeedMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub path: String,
    pub mode: FeedMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EffectiveConfig {
    pub sources: Vec<SourceSpec>,
    pub exclude: Vec<String>,
    pub delete_policy: DeletePolicy,
    pub skip_malformed: bool,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    sources: Option<Vec<RawSourceSpec>>,
    #[serde(default)]
    exclude: Option<Vec<String>>,
    #[serde(default)]
    delete_policy: Option<String>,
    #[serde(default)]
    skip_malformed: Option<bool>,
    #[serde(default)]
    log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSourceSpec {
    path: String,
    #[serde(default)]
    mode: Option<String>,
}

impl RawSourceSpec {
    fn into_source(self) -> Result<SourceSpec, ConfigError> {
        let mode = match self.mode.as_deref() {
            None | Some("") => FeedMode::Insert,
            Some(raw) => parse_feed_mode(raw)?,
        };
        Ok(SourceSpec {
            path: self.path,
            mode,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("unknown feed mode `{0}`")]
    InvalidMode(String),
    #[error("unknown delete policy `{0}`")]
    InvalidPolicy(String),
    #[error("invalid glob `{pattern}`: {reason}")]
    InvalidGlob { pattern: String, reason: String },
}

#[derive(Debug, Default)]
struct ConfigLayer {
    sources: Vec<SourceSpec>,
    exclude: Option<Vec<String>>,
    delete_policy: Option<DeletePolicy>,
    skip_malformed: Option<bool>,
    log_level: Option<String>,
}

/// Merges the user config, the nearest project config above `cwd` and the
/// repo config, in that order. Later layers win.
pub fn load_effective_config(
    cwd: &Path,
    repo_config: Option<&Path>,
    user_config: Option<&Path>,
) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::default();

    if let Some(path) = user_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_config_layer(path)?);
    }

    if let Some(path) = find_nearest_project_config(cwd) {
        merge_layer(&mut merged, load_config_layer(&path)?);
    }

    if let Some(path) = repo_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_config_layer(path)?);
    }

    Ok(merged)
}

pub fn find_nearest_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

fn merge_layer(merged: &mut EffectiveConfig, layer: ConfigLayer) {
    merge_sources_dedup(&mut merged.sources, layer.sources);
    if let Some(exclude) = layer.exclude {
        merged.exclude = exclude;
    }
    if let Some(policy) = layer.delete_policy {
        merged.delete_policy = policy;
    }
    if let Some(skip) = layer.skip_malformed {
        merged.skip_malformed = skip;
    }
    if layer.log_level.is_some() {
        merged.log_level = layer.log_level;
    }
}

fn merge_sources_dedup(existing: &mut Vec<SourceSpec>, incoming: Vec<SourceSpec>) {
    let mut indices = existing
        .iter()
        .enumerate()
        .map(|(idx, source)| (source.path.clone(), idx))
        .collect::<HashMap<_, _>>();

    for source in incoming {
        if let Some(idx) = indices.get(&source.path).copied() {
            existing[idx] = source;
        } else {
            indices.insert(source.path.clone(), existing.len());
            existing.push(source);
        }
    }
}

fn load_config_layer(path: &Path) -> Result<ConfigLayer, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_layer(&content)
}

fn parse_config_layer(content: &str) -> Result<ConfigLayer, ConfigError> {
    if content.trim().is_empty() {
        return Ok(ConfigLayer::default());
    }
    let raw: RawConfig = serde_yaml::from_str(content)?;
    let sources = raw
        .sources
        .unwrap_or_default()
        .into_iter()
        .map(RawSourceSpec::into_source)
        .collect::<Result<Vec<_>, _>>()?;
    let delete_policy = raw
        .delete_policy
        .as_deref()
        .map(parse_delete_policy)
        .transpose()?;
    Ok(ConfigLayer {
        sources,
        exclude: raw.exclude,
        delete_policy,
        skip_malformed: raw.skip_malformed,
        log_level: raw.log_level,
    })
}

pub fn load_config_file(path: &Path) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::default();
    merge_layer(&mut merged, load_config_layer(path)?);
    Ok(merged)
}

pub fn default_config_yaml() -> String {
    r#"# Feeds are processed in order. `mode: delete` removes the records a feed
# lists from the graph.
sources:
  - path: ./tweets.txt
    mode: insert
exclude: []
delete_policy: strict
skip_malformed: false
log_level: warn
"#
    .to_string()
}

pub fn expand_tilde(path: &str, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return PathBuf::from(path);
    };
    if path == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(path)
}

pub fn parse_feed_mode(raw: &str) -> Result<FeedMode, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "insert" | "load" => Ok(FeedMode::Insert),
        "delete" | "unload" => Ok(FeedMode::Delete),
        _ => Err(ConfigError::InvalidMode(raw.to_string())),
    }
}

pub fn parse_delete_policy(raw: &str) -> Result<DeletePolicy, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "strict" => Ok(DeletePolicy::Strict),
        "lenient" => Ok(DeletePolicy::Lenient),
        _ => Err(ConfigError::InvalidPolicy(raw.to_string())),
    }
}
