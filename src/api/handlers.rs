//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::{build_cache, Cache, StatsCounter};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    DeleteResponse, GetResponse, HasKeyResponse, HealthResponse, SetRequest, SetResponse,
    StatsResponse,
};

/// Application state shared across all handlers.
///
/// The cache synchronizes internally, so handlers share it through a plain
/// `Arc`. `stats` is the recorder the underlying engine reports to.
#[derive(Clone)]
pub struct AppState {
    /// Cache serving requests, local engine or replicated wrapper
    pub cache: Arc<dyn Cache>,
    /// Counters fed by the engine
    pub stats: Arc<StatsCounter>,
    /// Whether writes go through the replicated log
    pub replicated: bool,
}

impl AppState {
    /// Creates a new AppState around a local (non-replicated) cache.
    pub fn new(cache: Arc<dyn Cache>, stats: Arc<StatsCounter>) -> Self {
        Self {
            cache,
            stats,
            replicated: false,
        }
    }

    /// Creates a new AppState whose writes are replicated.
    pub fn replicated(cache: Arc<dyn Cache>, stats: Arc<StatsCounter>) -> Self {
        Self {
            cache,
            stats,
            replicated: true,
        }
    }

    /// Creates a new AppState with a fresh local engine built from configuration.
    pub fn from_config(config: &Config) -> Self {
        let stats = StatsCounter::new();
        let cache = build_cache(config.policy, config.capacity, stats.clone());
        Self::new(cache, stats)
    }
}

/// Handler for PUT /set
///
/// Stores a key-value pair in the cache.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let created = state.cache.put(&req.key, req.value.into_bytes())?;
    Ok(Json(SetResponse::new(req.key, created)))
}

/// Handler for GET /get/:key
///
/// Retrieves a value from the cache by key. Non UTF-8 bytes are replaced.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.cache.get(&key)? {
        Some(value) => {
            let value = String::from_utf8_lossy(&value).into_owned();
            Ok(Json(GetResponse::new(key, value)))
        }
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if state.cache.delete(&key)? {
        Ok(Json(DeleteResponse::new(key)))
    } else {
        Err(CacheError::NotFound(key))
    }
}

/// Handler for GET /has/:key
///
/// Membership check; leaves eviction order and counters untouched.
pub async fn has_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<HasKeyResponse> {
    let exists = state.cache.has_key(&key);
    Json(HasKeyResponse { key, exists })
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let cache = &state.cache;
    Json(StatsResponse::new(
        &state.stats.snapshot(),
        cache.len(),
        cache.size(),
        cache.capacity(),
        cache.policy(),
        state.replicated,
    ))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
