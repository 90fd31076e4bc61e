//! The compilation pipeline: fetch, parse, normalize, aggregate, filter.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregator::{aggregate, count_ips, Contribution, NetworkEntry};
use crate::fetcher::{fetch_all, FeedFetcher};
use crate::normalizer::normalize;
use crate::parser::parse;
use crate::source::{Source, SourceId};
use crate::utils::format_count;
use crate::whitelist::{self, Whitelist};

/// Fetch outcome of one source during a compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Fetched { parsed: usize, normalized: usize },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub id: SourceId,
    pub name: String,
    pub status: SourceStatus,
}

/// A compiled list plus everything needed to render it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledOutput {
    pub entries: Vec<NetworkEntry>,
    pub list_name: String,
    pub default_comment: String,
    /// RouterOS duration; empty means no `timeout=`
    pub timeout: String,
    pub compiled_at: DateTime<Utc>,
    pub reports: Vec<SourceReport>,
}

impl CompiledOutput {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.reports
            .iter()
            .filter(|r| matches!(r.status, SourceStatus::Failed(_)))
    }
}

/// Engine-wide settings for one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileSettings {
    pub aggregate_threshold: usize,
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
}

/// Rendering metadata resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderParams {
    pub list_name: String,
    pub default_comment: String,
    pub timeout: String,
}

/// Runs compilations against a feed fetcher.
#[derive(Clone)]
pub struct Compiler {
    fetcher: Arc<dyn FeedFetcher>,
    settings: CompileSettings,
}

impl Compiler {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, settings: CompileSettings) -> Self {
        Self { fetcher, settings }
    }

    pub fn settings(&self) -> &CompileSettings {
        &self.settings
    }

    /// Compile `sources` (in configured order) into a filtered entry list.
    ///
    /// Never fails: a source that cannot be fetched contributes nothing and is
    /// reported as failed.
    pub async fn compile(
        &self,
        sources: &[Source],
        configured: &Whitelist,
        request: &Whitelist,
        params: RenderParams,
    ) -> CompiledOutput {
        let fetched = fetch_all(
            self.fetcher.as_ref(),
            sources,
            self.settings.fetch_timeout,
            self.settings.max_concurrent_fetches,
        )
        .await;

        let mut contributions = Vec::with_capacity(sources.len());
        let mut reports = Vec::with_capacity(sources.len());

        for result in fetched {
            let source = &sources[result.index];
            let status = match result.body {
                Ok(body) => {
                    let (contribution, parsed) = normalize_source(source, &body);
                    let status = SourceStatus::Fetched {
                        parsed,
                        normalized: contribution.nets.len(),
                    };
                    contributions.push(contribution);
                    status
                }
                Err(e) => SourceStatus::Failed(e.to_string()),
            };
            reports.push(SourceReport {
                id: source.id,
                name: source.name.clone(),
                status,
            });
        }

        let merged = aggregate(
            &contributions,
            self.settings.aggregate_threshold,
            &params.default_comment,
        );
        let before = merged.len();
        let entries = whitelist::filter(merged, configured, request);

        info!(
            "Compiled {} sources ({} failed): {} entries, {} whitelisted, {} IPs",
            sources.len(),
            reports
                .iter()
                .filter(|r| matches!(r.status, SourceStatus::Failed(_)))
                .count(),
            format_count(entries.len()),
            format_count(before - entries.len()),
            format_count(count_ips(&entries) as usize),
        );

        CompiledOutput {
            entries,
            list_name: params.list_name,
            default_comment: params.default_comment,
            timeout: params.timeout,
            compiled_at: Utc::now(),
            reports,
        }
    }
}

/// Parse and normalize one source's body; returns the contribution and the
/// number of entries the parser accepted.
fn normalize_source(source: &Source, body: &str) -> (Contribution, usize) {
    let delimiter = source.effective_delimiter();
    let mut parsed = 0usize;
    let normalized = normalize(
        parse(body, &delimiter).inspect(|_| parsed += 1),
        source.cidr_mode,
    );

    if normalized.collapsed > 0 {
        warn!(
            "{}: {} entries with a prefix narrowed to their first address (cidr_mode={})",
            source.name, normalized.collapsed, source.cidr_mode
        );
    }
    debug!(
        "{}: {} parsed -> {} normalized",
        source.name,
        parsed,
        normalized.nets.len()
    );

    (Contribution::new(source, normalized.nets), parsed)
}
