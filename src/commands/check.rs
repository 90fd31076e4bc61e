//! Check command implementation.

use anyhow::Result;
use std::net::Ipv4Addr;
use std::path::Path;

use super::load_config;
use crate::service::BlocklistService;

/// Run the check command
pub async fn run(ip_str: &str, config_path: &Path) -> Result<()> {
    let addr: Ipv4Addr = ip_str
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid IPv4 address: {}", ip_str))?;

    let config = load_config(config_path)?;
    let service = BlocklistService::from_config(&config)?;

    println!();
    match service.lookup(addr).await? {
        Some(listing) => {
            println!("IP {} is LISTED as {}", addr, listing.entry.net);
            println!("  comment: {}", listing.entry.comment);
            println!("  sources: {}", listing.source_names.join(", "));
        }
        None => println!("IP {} is NOT listed", addr),
    }
    println!();

    Ok(())
}
