//! HTTP surface: health check and the three script routes.

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::ServiceError;
use crate::service::{BlocklistService, ScriptRequest, ScriptResponse};
use crate::utils::{parse_id_list, split_list};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Query parameters accepted by every script route.
#[derive(Debug, Default, Deserialize)]
pub struct ScriptQuery {
    pub list: Option<String>,
    pub timeout: Option<String>,
    pub whitelist: Option<String>,
    /// Only read by the custom route
    pub sources: Option<String>,
}

impl ScriptQuery {
    fn request(&self) -> ScriptRequest {
        ScriptRequest {
            list_name: self.list.clone(),
            timeout: self.timeout.clone(),
            whitelist: self.whitelist.as_deref().map(split_list).unwrap_or_default(),
        }
    }
}

/// Build the HTTP router over a shared service.
pub fn build_router(service: Arc<BlocklistService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mikrotik.rsc", get(all_sources))
        .route("/mikrotik/custom.rsc", get(custom_sources))
        .route("/mikrotik/source/{key}", get(single_source))
        .with_state(service)
}

/// Bind `listen` and serve until SIGINT or SIGTERM.
pub async fn serve(service: Arc<BlocklistService>, listen: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to register SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received, draining connections");
}

async fn health() -> Response {
    text(StatusCode::OK, "ok\n".to_string())
}

async fn all_sources(
    State(service): State<Arc<BlocklistService>>,
    Query(query): Query<ScriptQuery>,
) -> Response {
    script(service.compiled_all(&query.request()).await)
}

async fn custom_sources(
    State(service): State<Arc<BlocklistService>>,
    Query(query): Query<ScriptQuery>,
) -> Response {
    let Some(raw) = query.sources.as_deref() else {
        return text(StatusCode::BAD_REQUEST, "missing sources parameter\n".to_string());
    };
    let (ids, invalid) = parse_id_list(raw);
    if !invalid.is_empty() {
        return text(
            StatusCode::BAD_REQUEST,
            format!("invalid source ids: {}\n", invalid.join(",")),
        );
    }
    script(service.compiled_custom(&ids, &query.request()).await)
}

async fn single_source(
    State(service): State<Arc<BlocklistService>>,
    Path(key): Path<String>,
    Query(query): Query<ScriptQuery>,
) -> Response {
    script(service.compiled_single(&key, &query.request()).await)
}

fn script(result: Result<ScriptResponse, ServiceError>) -> Response {
    let response = match result {
        Ok(r) => r,
        Err(ServiceError::SourceNotFound(key)) => {
            return text(StatusCode::NOT_FOUND, format!("unknown source: {}\n", key));
        }
        Err(e) => {
            error!("Compilation failed: {}", e);
            return text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "compilation failed\n".to_string(),
            );
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    headers.insert("x-cache", HeaderValue::from_static(response.cache_status.as_str()));
    if let Ok(v) = HeaderValue::from_str(&response.compiled_at.to_rfc3339()) {
        headers.insert("x-compiled-at", v);
    }
    if !response.failed_sources.is_empty() {
        if let Ok(v) = HeaderValue::from_str(&response.failed_sources.join(",")) {
            headers.insert("x-failed-sources", v);
        }
    }
    (StatusCode::OK, headers, response.body).into_response()
}

fn text(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response()
}
