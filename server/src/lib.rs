use anyhow::Result;
use axum::{extract::{DefaultBodyLimit, Path, Query, State}, http::StatusCode, routing::{get, post}, Json, Router};
use pkgsearch_core::{
    BatchReport, PackageRecord, QueryEngine, RefreshCoordinator, RefreshOutcome, SearchError, SearchResult, SledStore,
    StoreError,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer, AllowOrigin};
use tower_http::trace::TraceLayer;

const MAX_LIMIT: usize = 100;
// batches carry whole READMEs
const BATCH_BODY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// sled directory holding package records
    pub store: PathBuf,
    pub admin_token: Option<String>,
    /// Comma-separated origins; any origin when unset.
    pub cors_allow_origin: Option<String>,
    /// `None` disables scheduled refreshes.
    pub refresh_interval: Option<Duration>,
}

impl ServerConfig {
    /// Reads `ADMIN_TOKEN` and `CORS_ALLOW_ORIGIN` from the environment.
    pub fn from_env(store: PathBuf, refresh_interval_secs: u64) -> Self {
        ServerConfig {
            store,
            admin_token: std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
            cors_allow_origin: std::env::var("CORS_ALLOW_ORIGIN").ok(),
            refresh_interval: (refresh_interval_secs > 0).then(|| Duration::from_secs(refresh_interval_secs)),
        }
    }
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}
fn default_limit() -> usize { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_matches: u64,
    pub results: Vec<SearchResult>,
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RefreshCoordinator<SledStore>>,
    pub engine: QueryEngine,
    pub admin_token: Option<String>,
}

/// Open the record store and publish an initial snapshot. A failed initial
/// refresh is logged and the server starts with an empty index.
///
/// sled locks the store directory, so while the server runs it is the only
/// writer; loaders feed it through `/packages/batch`.
pub fn build_state(config: &ServerConfig) -> Result<AppState> {
    let store = SledStore::open(&config.store)?;
    let coordinator = Arc::new(RefreshCoordinator::new(store));
    if let Err(e) = coordinator.refresh() {
        tracing::warn!(error = %e, "initial refresh failed, serving empty index");
    }
    let engine = QueryEngine::new(coordinator.reader());
    Ok(AppState { coordinator, engine, admin_token: config.admin_token.clone() })
}

pub fn build_app(state: AppState, config: &ServerConfig) -> Router {
    let cors = match &config.cors_allow_origin {
        Some(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        None => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/package/*path", get(package_handler))
        .route("/packages", post(insert_handler))
        .route("/packages/batch", post(batch_handler).layer(DefaultBodyLimit::max(BATCH_BODY_LIMIT)))
        .route("/refresh", post(refresh_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Refresh on a fixed interval. Failures are logged; the last good snapshot
/// keeps serving.
pub fn spawn_refresh_loop(coordinator: Arc<RefreshCoordinator<SledStore>>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick fires immediately and build_state already refreshed
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let coordinator = coordinator.clone();
            match tokio::task::spawn_blocking(move || coordinator.refresh()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "scheduled refresh failed"),
                Err(e) => tracing::error!(error = %e, "refresh task panicked"),
            }
        }
    })
}

type ApiError = (StatusCode, String);

fn internal(e: impl std::fmt::Display) -> ApiError { (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()) }

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let limit = params.limit.min(MAX_LIMIT);
    let offset = params.offset;

    // dropping this handler (client went away) cancels the blocking search
    let token = CancellationToken::new();
    let _cancel_on_drop = token.clone().drop_guard();
    let engine = state.engine.clone();
    let q = params.q.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.search_page(&q, limit, offset, &token))
        .await
        .map_err(internal)?;

    let page = match outcome {
        Ok(page) => page,
        Err(e @ SearchError::InvalidArgument(_)) => return Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => return Err(internal(e)),
    };
    let elapsed = start.elapsed();
    Ok(Json(SearchResponse {
        query: params.q,
        took_s: elapsed.as_secs_f64(),
        total_matches: page.total_matches,
        results: page.results,
    }))
}

pub async fn package_handler(State(state): State<AppState>, Path(path): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.coordinator.current();
    let doc = snapshot
        .index
        .get_by_path(path.trim_matches('/'))
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("package {path:?} not found")))?;
    let built_at = snapshot.built_at.format(&Rfc3339).map_err(internal)?;
    Ok(Json(serde_json::json!({
        "package_path": doc.package_path,
        "module_path": doc.module_path,
        "version": doc.version,
        "name": doc.name,
        "synopsis": doc.synopsis,
        "licenses": doc.licenses,
        "num_imported_by": doc.popularity,
        "indexed_terms": doc.term_count(),
        "generation": snapshot.generation,
        "snapshot_built_at": built_at,
    })))
}

async fn insert_handler(State(state): State<AppState>, headers: axum::http::HeaderMap, Json(record): Json<PackageRecord>) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;
    let coordinator = state.coordinator.clone();
    let outcome = tokio::task::spawn_blocking(move || coordinator.insert(record))
        .await
        .map_err(internal)?;
    match outcome {
        Ok(outcome) => Ok(Json(serde_json::json!({ "outcome": outcome }))),
        Err(e @ StoreError::Invalid(_)) => Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => Err(internal(e)),
    }
}

async fn batch_handler(State(state): State<AppState>, headers: axum::http::HeaderMap, Json(records): Json<Vec<PackageRecord>>) -> Result<Json<BatchReport>, ApiError> {
    authorize(&state, &headers)?;
    let coordinator = state.coordinator.clone();
    let outcome = tokio::task::spawn_blocking(move || coordinator.insert_many(records))
        .await
        .map_err(internal)?;
    match outcome {
        Ok(report) => Ok(Json(report)),
        Err(e @ StoreError::Invalid(_)) => Err((StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => Err(internal(e)),
    }
}

async fn refresh_handler(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Result<Json<RefreshOutcome>, ApiError> {
    authorize(&state, &headers)?;
    let coordinator = state.coordinator.clone();
    tokio::task::spawn_blocking(move || coordinator.refresh())
        .await
        .map_err(internal)?
        .map(Json)
        .map_err(internal)
}

fn authorize(state: &AppState, headers: &axum::http::HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
