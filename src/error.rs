//! Error types for the blocklist compiler.

use std::time::Duration;
use thiserror::Error;

/// Failure to retrieve a feed. Recovered locally: the source contributes nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Response too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: usize, max: usize },
}

/// A single bad item in the sources or whitelist file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid source definition: {0}")]
    InvalidSource(String),

    #[error("Invalid whitelist entry: {0}")]
    InvalidWhitelist(String),
}

/// A compilation failed inside the cache. Cloned to every waiter of the key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Compilation failed: {0}")]
    Compute(String),

    #[error("Compilation task aborted: {0}")]
    Aborted(String),
}

/// Errors surfaced by the service to its callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
