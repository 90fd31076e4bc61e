//! Compile command implementation.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use super::load_config;
use crate::cli::CompileOpts;
use crate::service::{BlocklistService, ScriptRequest, ScriptResponse};
use crate::utils::{format_count, parse_id_list};

/// Compile once and print the script to stdout
pub async fn run(opts: CompileOpts, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let service = BlocklistService::from_config(&config)?;
    let response = compile(&service, &opts).await?;

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(response.body.as_bytes())
        .context("Failed to write script")?;

    if !response.failed_sources.is_empty() {
        warn!("Failed sources: {}", response.failed_sources.join(", "));
    }
    info!("{} entries", format_count(response.entry_count));
    Ok(())
}

/// Pick the variant the options ask for and compile it.
pub async fn compile(service: &BlocklistService, opts: &CompileOpts) -> Result<ScriptResponse> {
    let request = ScriptRequest {
        list_name: opts.list.clone(),
        timeout: opts.timeout.clone(),
        whitelist: opts.whitelist.clone(),
    };

    let response = match (&opts.source, &opts.sources) {
        (Some(key), _) => service.compiled_single(key, &request).await?,
        (None, Some(raw)) => {
            let (ids, invalid) = parse_id_list(raw);
            if !invalid.is_empty() {
                anyhow::bail!("Invalid source ids: {}", invalid.join(", "));
            }
            service.compiled_custom(&ids, &request).await?
        }
        (None, None) => service.compiled_all(&request).await?,
    };
    Ok(response)
}
