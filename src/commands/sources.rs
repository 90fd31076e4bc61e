//! Sources command implementation.

use anyhow::Result;
use std::path::Path;

use super::load_config;
use crate::source::{Source, SourceProvider, YamlSourceStore};
use crate::utils::truncate;

const URL_WIDTH: usize = 48;

/// Print the configured sources as a table, or as JSON
pub async fn run(json: bool, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let sources = YamlSourceStore::new(&config.sources_file)
        .load_sources()
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    if sources.is_empty() {
        println!("No sources configured in {:?}", config.sources_file);
        return Ok(());
    }

    println!();
    println!(
        "{:>4}  {:<20} {:<6} {:<5} {:>6}  {}",
        "ID", "NAME", "ACTIVE", "CIDR", "TTL(h)", "URL"
    );
    for source in &sources {
        println!("{}", format_row(source));
    }
    println!();
    println!(
        "{} sources, {} active",
        sources.len(),
        sources.iter().filter(|s| s.is_active).count()
    );

    Ok(())
}

fn format_row(source: &Source) -> String {
    format!(
        "{:>4}  {:<20} {:<6} {:<5} {:>6}  {}",
        source.id,
        truncate(&source.name, 20),
        if source.is_active { "yes" } else { "no" },
        source.cidr_mode,
        source.timeout_hours,
        truncate(&source.url, URL_WIDTH)
    )
}
