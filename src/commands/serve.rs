//! Serve command implementation.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::load_config;
use crate::server;
use crate::service::BlocklistService;

/// Run the HTTP service until interrupted
pub async fn run(listen: Option<String>, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let listen = listen.unwrap_or_else(|| config.listen.clone());

    info!(
        "Sources: {:?}, whitelist: {:?}, cache TTL {}s",
        config.sources_file, config.whitelist_file, config.cache_ttl_secs
    );

    let service = Arc::new(BlocklistService::from_config(&config)?);
    server::serve(service, &listen).await
}
