//! # blocklist-compiler - IPv4 feeds to RouterOS address-list scripts
//!
//! Pulls plain-text IPv4 blocklists from many HTTP sources, normalizes each
//! according to its own policy, merges and aggregates them, removes
//! whitelisted ranges and renders a MikroTik import script.
//!
//! ## Features
//!
//! - **Per-source policy** - keep hosts, widen to /24, or collapse dense /24s
//! - **Whitelists** - a YAML file plus per-request CIDRs, range containment
//! - **Fault tolerant** - an unreachable feed contributes nothing, the rest still compiles
//! - **Single-flight cache** - concurrent requests for the same output share one compilation
//! - **Additive scripts** - every entry wrapped in `:do { } on-error={}`, nothing removed
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    blocklist-compiler                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)              HTTP (axum)                        │
//! │    └── serve, compile,     └── /health, /mikrotik.rsc,      │
//! │        check, sources          /mikrotik/custom.rsc, ...    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BlocklistService                                           │
//! │    └── variants (all, custom, single) over CompilationCache │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Compiler                                                   │
//! │    ├── Fetcher (reqwest + rustls, bounded fan-out)          │
//! │    ├── Parser -> Normalizer (per-source cidr_mode)          │
//! │    ├── Aggregator (ipnet, /24 threshold, dominance)         │
//! │    └── Whitelist filter                                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Renderer                                                   │
//! │    └── /ip firewall address-list import script              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use blocklist_compiler::config::Config;
//! use blocklist_compiler::service::{BlocklistService, ScriptRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/blocklist-compiler/config.yaml")?;
//!     let service = BlocklistService::from_config(&config)?;
//!
//!     let script = service.compiled_all(&ScriptRequest::default()).await?;
//!     print!("{}", script.body);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`source`] - Source definitions and the YAML source store
//! - [`fetcher`] - HTTP client for downloading feeds
//! - [`parser`] - Feed text to IPv4 networks
//! - [`normalizer`] - Per-source `cidr_mode` policy
//! - [`aggregator`] - Merge, /24 threshold and dominance
//! - [`whitelist`] - Whitelist loading and filtering
//! - [`renderer`] - RouterOS script output
//! - [`cache`] - TTL cache with single-flight computation
//! - [`compiler`] - The pipeline tying the stages together
//! - [`service`] - Output variants, overrides and caching
//! - [`server`] - HTTP routes
//! - [`config`] - Configuration parsing and validation
//! - [`cli`] / [`commands`] - Command-line interface
//! - [`utils`] - Formatting helpers

pub mod aggregator;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod compiler;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod normalizer;
pub mod parser;
pub mod renderer;
pub mod server;
pub mod service;
pub mod source;
pub mod utils;
pub mod whitelist;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use service::{BlocklistService, ScriptRequest, ScriptResponse};
