//! CLI command implementations.

pub mod check;
pub mod compile;
pub mod serve;
pub mod sources;

use anyhow::Result;
use std::path::Path;
use tracing::debug;

use crate::config::Config;

/// Load the config file, or the defaults (plus environment overrides) when
/// it does not exist.
pub fn load_config(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        Config::load(config_path)
    } else {
        debug!("No config at {:?}, using defaults", config_path);
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
