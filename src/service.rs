//! Output variants over the compiler and cache.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::aggregator::NetworkEntry;
use crate::cache::{CacheStatus, CompilationCache};
use crate::compiler::{CompiledOutput, Compiler, RenderParams};
use crate::config::Config;
use crate::error::ServiceError;
use crate::fetcher::HttpFetcher;
use crate::renderer::{format_timeout_hours, is_valid_list_name, is_valid_timeout, render};
use crate::source::{Source, SourceId, SourceProvider, YamlSourceStore};
use crate::whitelist::{Whitelist, WhitelistFile};

/// Which sources an output covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    All,
    Custom,
    Single,
}

/// Everything that distinguishes one cached compilation from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub variant: Variant,
    pub source_ids: Vec<SourceId>,
    pub request_whitelist: Vec<String>,
    pub list_name: String,
    pub timeout: String,
}

/// Optional per-request overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptRequest {
    pub list_name: Option<String>,
    pub timeout: Option<String>,
    pub whitelist: Vec<String>,
}

/// A rendered script with its cache metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResponse {
    pub body: String,
    pub compiled_at: DateTime<Utc>,
    pub entry_count: usize,
    pub cache_status: CacheStatus,
    pub failed_sources: Vec<String>,
}

/// A compiled entry covering a looked-up address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub entry: NetworkEntry,
    pub source_names: Vec<String>,
}

/// Service-level settings taken from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub list_name: String,
    pub global_comment: String,
    pub default_timeout: String,
    pub cache_ttl: Duration,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            list_name: config.list_name.clone(),
            global_comment: config.global_comment.clone(),
            default_timeout: config.default_timeout.clone(),
            cache_ttl: config.cache_ttl(),
        }
    }
}

/// Compiles and caches the three script variants.
pub struct BlocklistService {
    compiler: Compiler,
    sources: Arc<dyn SourceProvider>,
    whitelist: Option<WhitelistFile>,
    cache: CompilationCache<CacheKey, CompiledOutput>,
    settings: ServiceSettings,
}

impl BlocklistService {
    pub fn new(
        compiler: Compiler,
        sources: Arc<dyn SourceProvider>,
        whitelist: Option<WhitelistFile>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            compiler,
            sources,
            whitelist,
            cache: CompilationCache::new(),
            settings,
        }
    }

    /// Wire the HTTP fetcher and the YAML source and whitelist files from
    /// `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(config.fetch_retries)?;
        let compiler = Compiler::new(Arc::new(fetcher), config.compile_settings());
        Ok(Self::new(
            compiler,
            Arc::new(YamlSourceStore::new(&config.sources_file)),
            Some(WhitelistFile::new(&config.whitelist_file)),
            ServiceSettings::from(config),
        ))
    }

    /// Replace the source provider (CLI `--source` overrides).
    pub fn with_sources(mut self, sources: Arc<dyn SourceProvider>) -> Self {
        self.sources = sources;
        self
    }

    /// Current source definitions, in configured order.
    pub async fn sources(&self) -> Vec<Source> {
        self.sources.load_sources().await
    }

    /// All active sources.
    pub async fn compiled_all(&self, request: &ScriptRequest) -> Result<ScriptResponse, ServiceError> {
        let sources: Vec<Source> = self
            .sources
            .load_sources()
            .await
            .into_iter()
            .filter(|s| s.is_active)
            .collect();
        if sources.is_empty() {
            warn!("No active sources configured");
        }
        let timeout = self.resolve_timeout(request, None);
        self.produce(Variant::All, sources, request, timeout).await
    }

    /// An explicit set of source ids, active or not. Unknown ids are skipped.
    pub async fn compiled_custom(
        &self,
        ids: &[SourceId],
        request: &ScriptRequest,
    ) -> Result<ScriptResponse, ServiceError> {
        let wanted: BTreeSet<SourceId> = ids.iter().copied().collect();
        let sources: Vec<Source> = self
            .sources
            .load_sources()
            .await
            .into_iter()
            .filter(|s| wanted.contains(&s.id))
            .collect();
        if sources.len() < wanted.len() {
            let known: BTreeSet<SourceId> = sources.iter().map(|s| s.id).collect();
            let unknown: Vec<SourceId> = wanted.difference(&known).copied().collect();
            info!("Ignoring unknown source ids: {:?}", unknown);
        }
        let timeout = self.resolve_timeout(request, None);
        self.produce(Variant::Custom, sources, request, timeout).await
    }

    /// One source, addressed by id or by name.
    pub async fn compiled_single(
        &self,
        key: &str,
        request: &ScriptRequest,
    ) -> Result<ScriptResponse, ServiceError> {
        let sources = self.sources.load_sources().await;
        let source = find_source(&sources, key)
            .cloned()
            .ok_or_else(|| ServiceError::SourceNotFound(key.to_string()))?;
        let timeout = self.resolve_timeout(request, Some(&source));
        self.produce(Variant::Single, vec![source], request, timeout)
            .await
    }

    /// Forget every cached compilation.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    /// Find the compiled entry covering `addr` in the all-sources output.
    pub async fn lookup(&self, addr: Ipv4Addr) -> Result<Option<Listing>, ServiceError> {
        let sources: Vec<Source> = self
            .sources
            .load_sources()
            .await
            .into_iter()
            .filter(|s| s.is_active)
            .collect();
        let request = ScriptRequest::default();
        let timeout = self.resolve_timeout(&request, None);
        let names: BTreeMap<SourceId, String> =
            sources.iter().map(|s| (s.id, s.name.clone())).collect();
        let (output, _) = self
            .compiled(Variant::All, sources, &request, timeout)
            .await?;

        Ok(output
            .entries
            .iter()
            .find(|e| e.net.contains(&addr))
            .map(|entry| Listing {
                entry: entry.clone(),
                source_names: entry
                    .sources
                    .iter()
                    .filter_map(|id| names.get(id).cloned())
                    .collect(),
            }))
    }

    async fn produce(
        &self,
        variant: Variant,
        sources: Vec<Source>,
        request: &ScriptRequest,
        timeout: String,
    ) -> Result<ScriptResponse, ServiceError> {
        let (output, cache_status) = self.compiled(variant, sources, request, timeout).await?;

        debug!(
            "{:?} script: {} entries (cache {})",
            variant,
            output.entries.len(),
            cache_status.as_str()
        );

        Ok(ScriptResponse {
            body: render(&output),
            compiled_at: output.compiled_at,
            entry_count: output.entries.len(),
            cache_status,
            failed_sources: output.failed_sources().map(|r| r.name.clone()).collect(),
        })
    }

    async fn compiled(
        &self,
        variant: Variant,
        sources: Vec<Source>,
        request: &ScriptRequest,
        timeout: String,
    ) -> Result<(Arc<CompiledOutput>, CacheStatus), ServiceError> {
        let list_name = self.resolve_list_name(request);

        let mut request_whitelist: Vec<String> =
            request.whitelist.iter().map(|s| s.trim().to_string()).collect();
        request_whitelist.sort();
        request_whitelist.dedup();

        let mut source_ids: Vec<SourceId> = sources.iter().map(|s| s.id).collect();
        source_ids.sort_unstable();

        let key = CacheKey {
            variant,
            source_ids,
            request_whitelist: request_whitelist.clone(),
            list_name: list_name.clone(),
            timeout: timeout.clone(),
        };

        let compiler = self.compiler.clone();
        let whitelist_file = self.whitelist.clone();
        let params = RenderParams {
            list_name,
            default_comment: self.settings.global_comment.clone(),
            timeout,
        };

        let compiled = self
            .cache
            .get_or_compute(key, self.settings.cache_ttl, move || async move {
                let configured = match whitelist_file {
                    Some(file) => file.load().await,
                    None => Whitelist::default(),
                };
                let request = Whitelist::from_request(&request_whitelist);
                let output = compiler
                    .compile(&sources, &configured, &request, params)
                    .await;
                Ok::<_, std::convert::Infallible>(output)
            })
            .await?;
        Ok(compiled)
    }

    fn resolve_list_name(&self, request: &ScriptRequest) -> String {
        match request.list_name.as_deref().map(str::trim) {
            Some(name) if is_valid_list_name(name) => name.to_string(),
            Some(name) => {
                debug!("Ignoring invalid list name override {:?}", name);
                self.settings.list_name.clone()
            }
            None => self.settings.list_name.clone(),
        }
    }

    /// Request override, then the single source's own expiry, then the default.
    fn resolve_timeout(&self, request: &ScriptRequest, single: Option<&Source>) -> String {
        if let Some(timeout) = request.timeout.as_deref().map(str::trim) {
            if is_valid_timeout(timeout) {
                return timeout.to_string();
            }
            debug!("Ignoring invalid timeout override {:?}", timeout);
        }
        match single {
            Some(source) if source.timeout_hours > 0 => format_timeout_hours(source.timeout_hours),
            _ => self.settings.default_timeout.clone(),
        }
    }
}

/// Look a source up by numeric id first, then by name.
pub fn find_source<'a>(sources: &'a [Source], key: &str) -> Option<&'a Source> {
    let key = key.trim();
    key.parse::<SourceId>()
        .ok()
        .and_then(|id| sources.iter().find(|s| s.id == id))
        .or_else(|| sources.iter().find(|s| s.name == key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompileSettings;
    use crate::error::FetchError;
    use crate::fetcher::MockFeedFetcher;
    use crate::source::{test_source, CidrMode, StaticSources};

    fn settings() -> ServiceSettings {
        ServiceSettings {
            list_name: "blacklist".to_string(),
            global_comment: "compiled-blocklist".to_string(),
            default_timeout: "02:00:00".to_string(),
            cache_ttl: Duration::from_secs(60),
        }
    }

    fn sources() -> Vec<Source> {
        let mut inactive = test_source(3, "dormant", CidrMode::Host);
        inactive.is_active = false;
        let mut hourly = test_source(2, "hourly", CidrMode::Host);
        hourly.timeout_hours = 6;
        vec![test_source(1, "alpha", CidrMode::Host), hourly, inactive]
    }

    fn service(fetcher: MockFeedFetcher) -> BlocklistService {
        let compiler = Compiler::new(
            Arc::new(fetcher),
            CompileSettings {
                aggregate_threshold: 50,
                fetch_timeout: Duration::from_secs(1),
                max_concurrent_fetches: 4,
            },
        );
        BlocklistService::new(compiler, Arc::new(StaticSources(sources())), None, settings())
    }

    fn echo_fetcher() -> MockFeedFetcher {
        let mut mock = MockFeedFetcher::new();
        mock.expect_fetch().returning(|url, _| {
            Ok(match url {
                u if u.ends_with("/alpha.txt") => "1.1.1.1\n",
                u if u.ends_with("/hourly.txt") => "2.2.2.2\n",
                u if u.ends_with("/dormant.txt") => "3.3.3.3\n",
                _ => return Err(FetchError::Status(404)),
            }
            .to_string())
        });
        mock
    }

    #[tokio::test]
    async fn test_all_skips_inactive() {
        let svc = service(echo_fetcher());
        let response = svc.compiled_all(&ScriptRequest::default()).await.unwrap();
        assert_eq!(response.entry_count, 2);
        assert!(response.body.contains("address=1.1.1.1 "));
        assert!(response.body.contains("address=2.2.2.2 "));
        assert!(!response.body.contains("3.3.3.3"));
        assert_eq!(response.cache_status, CacheStatus::Miss);
    }

    #[tokio::test]
    async fn test_custom_includes_inactive_and_ignores_unknown() {
        let svc = service(echo_fetcher());
        let response = svc
            .compiled_custom(&[3, 99], &ScriptRequest::default())
            .await
            .unwrap();
        assert_eq!(response.entry_count, 1);
        assert!(response.body.contains("address=3.3.3.3 "));
    }

    #[tokio::test]
    async fn test_single_by_id_or_name_uses_source_timeout() {
        let svc = service(echo_fetcher());
        let by_id = svc.compiled_single("2", &ScriptRequest::default()).await.unwrap();
        let by_name = svc
            .compiled_single("hourly", &ScriptRequest::default())
            .await
            .unwrap();
        assert!(by_id.body.contains("timeout=06:00:00"));
        assert_eq!(by_id.body, by_name.body);
        assert_eq!(by_name.cache_status, CacheStatus::Hit);
    }

    #[tokio::test]
    async fn test_single_unknown() {
        let svc = service(echo_fetcher());
        let err = svc
            .compiled_single("nope", &ScriptRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::SourceNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_overrides_applied_and_validated() {
        let svc = service(echo_fetcher());
        let request = ScriptRequest {
            list_name: Some("edge".to_string()),
            timeout: Some("1d".to_string()),
            whitelist: vec!["1.1.1.0/24".to_string(), "garbage".to_string()],
        };
        let response = svc.compiled_all(&request).await.unwrap();
        assert_eq!(response.entry_count, 1);
        assert!(response.body.contains("add list=edge address=2.2.2.2 "));
        assert!(response.body.contains("timeout=1d "));

        let bad = ScriptRequest {
            list_name: Some("x; /system reboot".to_string()),
            timeout: Some("forever".to_string()),
            whitelist: Vec::new(),
        };
        let response = svc.compiled_all(&bad).await.unwrap();
        assert!(response.body.contains("add list=blacklist "));
        assert!(response.body.contains("timeout=02:00:00 "));
    }

    #[tokio::test]
    async fn test_cached_script_is_byte_identical() {
        let mut mock = MockFeedFetcher::new();
        mock.expect_fetch()
            .times(2)
            .returning(|_, _| Ok("4.4.4.4\n".to_string()));
        let svc = service(mock);

        let first = svc.compiled_all(&ScriptRequest::default()).await.unwrap();
        let second = svc.compiled_all(&ScriptRequest::default()).await.unwrap();
        assert_eq!(first.body, second.body);
        assert_eq!(second.cache_status, CacheStatus::Hit);
    }

    #[tokio::test]
    async fn test_request_whitelist_order_shares_cache_entry() {
        let svc = service(echo_fetcher());
        let a = ScriptRequest {
            whitelist: vec!["9.9.9.0/24".to_string(), "8.8.8.8".to_string()],
            ..Default::default()
        };
        let b = ScriptRequest {
            whitelist: vec!["8.8.8.8".to_string(), "9.9.9.0/24".to_string()],
            ..Default::default()
        };
        svc.compiled_all(&a).await.unwrap();
        let second = svc.compiled_all(&b).await.unwrap();
        assert_eq!(second.cache_status, CacheStatus::Hit);
    }

    #[tokio::test]
    async fn test_failed_source_reported() {
        let mut mock = MockFeedFetcher::new();
        mock.expect_fetch().returning(|url, _| {
            if url.ends_with("/alpha.txt") {
                Err(FetchError::Timeout(Duration::from_secs(1)))
            } else {
                Ok("5.5.5.5\n".to_string())
            }
        });
        let svc = service(mock);
        let response = svc.compiled_all(&ScriptRequest::default()).await.unwrap();
        assert_eq!(response.failed_sources, vec!["alpha".to_string()]);
        assert_eq!(response.entry_count, 1);
    }

    #[tokio::test]
    async fn test_lookup() {
        let svc = service(echo_fetcher());
        let hit = svc.lookup("2.2.2.2".parse().unwrap()).await.unwrap().unwrap();
        assert_eq!(hit.entry.net.to_string(), "2.2.2.2/32");
        assert_eq!(hit.source_names, vec!["hourly".to_string()]);
        assert!(svc.lookup("3.3.3.3".parse().unwrap()).await.unwrap().is_none());
    }

    #[test]
    fn test_find_source() {
        let list = sources();
        assert_eq!(find_source(&list, "1").map(|s| s.id), Some(1));
        assert_eq!(find_source(&list, "dormant").map(|s| s.id), Some(3));
        assert!(find_source(&list, "42").is_none());
    }
}
