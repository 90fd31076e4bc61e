//! Configuration management for the blocklist compiler.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::compiler::CompileSettings;
use crate::fetcher::DEFAULT_FETCH_TIMEOUT_SECS;
use crate::renderer::{is_valid_list_name, is_valid_timeout};

/// Environment variables overriding file settings
const ENV_LIST_NAME: &str = "MIKROTIK_LIST_NAME";
const ENV_GLOBAL_COMMENT: &str = "GLOBAL_COMMENT";
const ENV_THRESHOLD: &str = "AGGREGATE_THRESHOLD";
const ENV_FETCH_TIMEOUT: &str = "FETCH_TIMEOUT";
const ENV_CACHE_TTL: &str = "CACHE_TTL";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP service binds to
    pub listen: String,

    /// YAML file holding the source definitions
    pub sources_file: PathBuf,

    /// YAML file holding the whitelist, re-read on every compilation
    pub whitelist_file: PathBuf,

    /// Default RouterOS address-list name
    pub list_name: String,

    /// Comment for entries whose sources carry no label
    pub global_comment: String,

    /// Distinct hosts in one /24 needed to collapse it (`auto` sources)
    pub aggregate_threshold: usize,

    /// Wall-clock budget per feed, retries included
    pub fetch_timeout_secs: u64,

    /// Attempts per feed
    pub fetch_retries: u32,

    /// Feeds fetched at the same time
    pub max_concurrent_fetches: usize,

    /// Lifetime of a compiled output
    pub cache_ttl_secs: u64,

    /// Device-side `timeout=` for multi-source scripts; empty for none
    pub default_timeout: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            sources_file: PathBuf::from("/etc/blocklist-compiler/sources.yaml"),
            whitelist_file: PathBuf::from("/etc/blocklist-compiler/whitelist.yaml"),
            list_name: "blacklist".to_string(),
            global_comment: "compiled-blocklist".to_string(),
            aggregate_threshold: 50,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            fetch_retries: 2,
            max_concurrent_fetches: 8,
            cache_ttl_secs: 300,
            default_timeout: "02:00:00".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, apply environment overrides and
    /// validate. Relative `sources_file`/`whitelist_file` paths resolve
    /// against the config file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration text; an empty document yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Option<Config> = serde_yaml::from_str(content)?;
        Ok(config.unwrap_or_default())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.sources_file, &mut self.whitelist_file] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Apply environment overrides. Unparseable numbers are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_LIST_NAME) {
            self.list_name = v;
        }
        if let Some(v) = lookup(ENV_GLOBAL_COMMENT) {
            self.global_comment = v;
        }
        override_number(&lookup, ENV_THRESHOLD, &mut self.aggregate_threshold);
        override_number(&lookup, ENV_FETCH_TIMEOUT, &mut self.fetch_timeout_secs);
        override_number(&lookup, ENV_CACHE_TTL, &mut self.cache_ttl_secs);
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.aggregate_threshold == 0 {
            anyhow::bail!("aggregate_threshold must be at least 1");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be greater than 0");
        }
        if self.max_concurrent_fetches == 0 {
            anyhow::bail!("max_concurrent_fetches must be greater than 0");
        }
        if !is_valid_list_name(&self.list_name) {
            anyhow::bail!(
                "Invalid list_name '{}'. Use letters, digits, '_', '-' or '.'",
                self.list_name
            );
        }
        if !self.default_timeout.is_empty() && !is_valid_timeout(&self.default_timeout) {
            anyhow::bail!(
                "Invalid default_timeout '{}'. Use a RouterOS duration like '02:00:00' or '1d'",
                self.default_timeout
            );
        }
        Ok(())
    }

    pub fn compile_settings(&self) -> CompileSettings {
        CompileSettings {
            aggregate_threshold: self.aggregate_threshold,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_concurrent_fetches: self.max_concurrent_fetches,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Default config file with comments
    pub fn generate_default_yaml() -> &'static str {
        include_str!("../templates/config.yaml")
    }
}

fn override_number<F, T>(lookup: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(name) {
        match raw.trim().parse() {
            Ok(v) => *target = v,
            Err(_) => warn!("Ignoring {}={:?}: not a number", name, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.list_name, "blacklist");
        assert_eq!(config.global_comment, "compiled-blocklist");
        assert_eq!(config.aggregate_threshold, 50);
        assert_eq!(config.fetch_timeout_secs, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_template_parses() {
        let config = Config::from_yaml(Config::generate_default_yaml()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.aggregate_threshold, 50);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = Config::from_yaml("list_name: bl\naggregate_threshold: 10\n").unwrap();
        assert_eq!(config.list_name, "bl");
        assert_eq!(config.aggregate_threshold, 10);
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_LIST_NAME, "mylist"),
            (ENV_THRESHOLD, "25"),
            (ENV_FETCH_TIMEOUT, "not-a-number"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(config.list_name, "mylist");
        assert_eq!(config.aggregate_threshold, 25);
        assert_eq!(config.fetch_timeout_secs, 20);
    }

    #[test]
    fn test_validation_rejects_zero_threshold() {
        let config = Config {
            aggregate_threshold: 0,
            ..Default::default()
        };
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("aggregate_threshold"));
    }

    #[test]
    fn test_validation_rejects_bad_list_name() {
        let config = Config {
            list_name: "bad name".to_string(),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("list_name"));
    }

    #[test]
    fn test_validation_rejects_bad_timeout() {
        let config = Config {
            default_timeout: "soon".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            default_timeout: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "sources_file: sources.yaml\nwhitelist_file: /srv/whitelist.yaml\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sources_file, dir.path().join("sources.yaml"));
        assert_eq!(config.whitelist_file, PathBuf::from("/srv/whitelist.yaml"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/blocklist-compiler/config.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_compile_settings() {
        let settings = Config::default().compile_settings();
        assert_eq!(settings.fetch_timeout, Duration::from_secs(20));
        assert_eq!(settings.max_concurrent_fetches, 8);
    }
}
