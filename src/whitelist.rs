//! Whitelist loading and subtraction.
//!
//! Two provenances are applied together: CIDRs from the YAML whitelist file
//! (re-read for every compilation) and CIDRs supplied with a request.

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::aggregator::NetworkEntry;
use crate::error::ConfigError;
use crate::parser::parse_ipv4_net;

/// Ordered IPv4 CIDRs that must never appear in a compiled list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    nets: Vec<Ipv4Net>,
}

impl Whitelist {
    pub fn new(nets: Vec<Ipv4Net>) -> Self {
        let mut wl = Self::default();
        wl.extend(nets);
        wl
    }

    /// Parse entries, logging and skipping invalid ones.
    pub fn from_strings<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut nets = Vec::with_capacity(entries.len());
        for entry in entries {
            match parse_whitelist_entry(entry.as_ref()) {
                Ok(net) => nets.push(net),
                Err(e) => warn!("{}", e),
            }
        }
        Self::new(nets)
    }

    /// Parse request-supplied entries; invalid ones are ignored quietly.
    pub fn from_request<S: AsRef<str>>(entries: &[S]) -> Self {
        let nets = entries
            .iter()
            .filter_map(|entry| match parse_whitelist_entry(entry.as_ref()) {
                Ok(net) => Some(net),
                Err(e) => {
                    debug!("Ignoring request whitelist entry: {}", e);
                    None
                }
            })
            .collect();
        Self::new(nets)
    }

    pub fn nets(&self) -> &[Ipv4Net] {
        &self.nets
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nets.len()
    }

    /// Entries keep their first-seen order; exact duplicates are dropped.
    pub fn extend<I: IntoIterator<Item = Ipv4Net>>(&mut self, nets: I) {
        for net in nets {
            let net = net.trunc();
            if !self.nets.contains(&net) {
                self.nets.push(net);
            }
        }
    }

    /// True when the whole range of `net` lies inside a whitelist CIDR.
    pub fn covers(&self, net: &Ipv4Net) -> bool {
        self.nets.iter().any(|allowed| allowed.contains(net))
    }
}

fn parse_whitelist_entry(entry: &str) -> std::result::Result<Ipv4Net, ConfigError> {
    parse_ipv4_net(entry.trim())
        .map(|net| net.trunc())
        .ok_or_else(|| ConfigError::InvalidWhitelist(entry.to_string()))
}

/// Remove every entry contained in (or equal to) a CIDR of either whitelist.
///
/// Containment is range containment: a /32 inside a whitelisted /24 goes,
/// a /24 only partially covered by a whitelisted /25 stays.
pub fn filter(
    entries: Vec<NetworkEntry>,
    configured: &Whitelist,
    request: &Whitelist,
) -> Vec<NetworkEntry> {
    if configured.is_empty() && request.is_empty() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|entry| !configured.covers(&entry.net) && !request.covers(&entry.net))
        .collect()
}

/// The YAML whitelist file (`whitelist:` list).
#[derive(Debug, Clone)]
pub struct WhitelistFile {
    path: PathBuf,
}

impl WhitelistFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current whitelist. Missing or unreadable files yield an
    /// empty whitelist so compilation can go on.
    pub async fn load(&self) -> Whitelist {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read whitelist file {:?}: {}", self.path, e);
                return Whitelist::default();
            }
        };
        match parse_whitelist_yaml(&content) {
            Ok(wl) => wl,
            Err(e) => {
                warn!("Failed to parse whitelist file {:?}: {:#}", self.path, e);
                Whitelist::default()
            }
        }
    }
}

/// Parse a whitelist document. Accepts `whitelist: [...]` or a bare list.
pub fn parse_whitelist_yaml(content: &str) -> Result<Whitelist> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Doc {
        Keyed {
            #[serde(default)]
            whitelist: Vec<String>,
        },
        Bare(Vec<String>),
    }

    let doc: Option<Doc> =
        serde_yaml::from_str(content).context("Whitelist file is not valid YAML")?;
    let entries = match doc {
        Some(Doc::Keyed { whitelist }) => whitelist,
        Some(Doc::Bare(list)) => list,
        None => Vec::new(),
    };
    Ok(Whitelist::from_strings(&entries))
}
