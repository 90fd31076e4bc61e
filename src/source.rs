//! Source definitions and the file-backed source store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Stable source identifier.
pub type SourceId = i64;

/// Per-source normalization policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum CidrMode {
    /// Every entry is kept as a single host (`32`)
    #[default]
    #[serde(rename = "32")]
    Host,
    /// Every entry is widened to its containing /24 (`24`)
    #[serde(rename = "24")]
    Subnet24,
    /// Hosts, collapsed to a /24 when dense enough (`auto`)
    #[serde(rename = "auto")]
    AutoAggregate,
}

impl FromStr for CidrMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "32" | "/32" | "" => Ok(CidrMode::Host),
            "24" | "/24" => Ok(CidrMode::Subnet24),
            "auto" => Ok(CidrMode::AutoAggregate),
            other => Err(format!(
                "Invalid cidr_mode '{}'. Valid values: 32, 24, auto",
                other
            )),
        }
    }
}

impl fmt::Display for CidrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CidrMode::Host => "32",
            CidrMode::Subnet24 => "24",
            CidrMode::AutoAggregate => "auto",
        };
        f.pad(s)
    }
}

/// YAML writes `cidr_mode: 24` as often as `cidr_mode: "24"`; accept both.
impl<'de> Deserialize<'de> for CidrMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u64),
            Str(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Num(n) => n.to_string().parse().map_err(serde::de::Error::custom),
            Repr::Str(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// A feed definition, read-only for the duration of a compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Token separator, with `\n` / `\t` escapes (see [`unescape_delimiter`])
    #[serde(default)]
    pub delimiter: String,
    #[serde(default)]
    pub cidr_mode: CidrMode,
    /// Advisory expiry on the device, not the cache TTL
    #[serde(default)]
    pub timeout_hours: u32,
    #[serde(default)]
    pub comment: String,
}

fn default_true() -> bool {
    true
}

impl Source {
    /// Check a definition before it takes part in a compilation.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::InvalidSource(format!(
                "source {} ({}) has no url",
                self.id, self.name
            )));
        }
        if !self.url.starts_with("https://") && !self.url.starts_with("http://") {
            return Err(ConfigError::InvalidSource(format!(
                "source {} ({}) url must be http(s): {}",
                self.id, self.name, self.url
            )));
        }
        Ok(())
    }

    /// Label attached to entries from this source, if it has one.
    pub fn label(&self) -> Option<&str> {
        [self.comment.trim(), self.name.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
    }

    /// The delimiter with escapes interpreted; newline when unset.
    pub fn effective_delimiter(&self) -> String {
        unescape_delimiter(&self.delimiter)
    }
}

/// Interpret the two-character escapes `\n`, `\r`, `\t` and `\\`.
/// An empty delimiter means newline.
pub fn unescape_delimiter(raw: &str) -> String {
    if raw.is_empty() {
        return "\n".to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Provider of source definitions, re-read on every compilation.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// All valid sources, in configured order.
    async fn load_sources(&self) -> Vec<Source>;
}

/// Sources kept in a YAML file (`sources:` list).
#[derive(Debug, Clone)]
pub struct YamlSourceStore {
    path: PathBuf,
}

impl YamlSourceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SourceProvider for YamlSourceStore {
    async fn load_sources(&self) -> Vec<Source> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read sources file {:?}: {}", self.path, e);
                return Vec::new();
            }
        };
        match parse_sources_yaml(&content) {
            Ok(sources) => sources,
            Err(e) => {
                warn!("Failed to parse sources file {:?}: {:#}", self.path, e);
                Vec::new()
            }
        }
    }
}

/// Fixed in-memory source list (CLI overrides and tests).
pub struct StaticSources(pub Vec<Source>);

#[async_trait]
impl SourceProvider for StaticSources {
    async fn load_sources(&self) -> Vec<Source> {
        self.0.clone()
    }
}

/// Parse a sources document, skipping entries that are malformed or invalid.
///
/// Only a document that is not YAML at all is an error; a single bad entry
/// never takes the other sources down with it.
pub fn parse_sources_yaml(content: &str) -> Result<Vec<Source>> {
    #[derive(Deserialize, Default)]
    struct SourcesFile {
        #[serde(default)]
        sources: Vec<serde_yaml::Value>,
    }

    let file: Option<SourcesFile> =
        serde_yaml::from_str(content).context("Sources file is not valid YAML")?;
    let file = file.unwrap_or_default();

    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(file.sources.len());

    for (idx, value) in file.sources.into_iter().enumerate() {
        let source: Source = match serde_yaml::from_value(value) {
            Ok(s) => s,
            Err(e) => {
                warn!("Skipping source #{}: {}", idx, e);
                continue;
            }
        };
        if let Err(e) = source.validate() {
            warn!("Skipping source #{}: {}", idx, e);
            continue;
        }
        if !seen.insert(source.id) {
            warn!(
                "Skipping source #{}: duplicate id {} ({})",
                idx, source.id, source.name
            );
            continue;
        }
        debug!(
            "Loaded source {} ({}) mode={} active={}",
            source.id, source.name, source.cidr_mode, source.is_active
        );
        sources.push(source);
    }

    Ok(sources)
}

#[cfg(test)]
pub(crate) fn test_source(id: SourceId, name: &str, mode: CidrMode) -> Source {
    Source {
        id,
        name: name.to_string(),
        url: format!("https://feeds.example.com/{}.txt", name),
        is_active: true,
        delimiter: String::new(),
        cidr_mode: mode,
        timeout_hours: 0,
        comment: String::new(),
    }
}
