use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tower_http::set_header::SetResponseHeaderLayer;

use crisismap_common::Config;
use crisismap_model::{Cache, ModelDeps};

pub mod auth;
pub mod catalog;
mod components;
pub mod error;
pub mod jsonp;
pub mod redirect;
pub mod rest;

pub struct AppState {
    pub deps: ModelDeps,
    pub config: Config,
    pub http: reqwest::Client,
    /// Parsed proxy responses keyed by `[url, post_json]`.
    pub jsonp_cache: Cache<Value>,
    /// Outbound proxy fetches per client IP over the last minute.
    pub rate_limiter: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl AppState {
    pub fn new(deps: ModelDeps, config: Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()?;
        let jsonp_cache = Cache::new("jsonp.content", config.jsonp_cache_seconds as f64, 0.0);
        Ok(Self {
            deps,
            config,
            http,
            jsonp_cache,
            rate_limiter: Mutex::new(HashMap::new()),
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/crisismap/jsonp", get(jsonp::jsonp_handler))
        .route(
            "/crisismap/a/{domain}/.catalog",
            get(catalog::catalog_page).post(catalog::catalog_update),
        )
        .route("/crisismap/redirect/{key}", get(redirect::redirect_handler))
        .route("/crisismap/api/maps/{map_id}", get(rest::maps::api_map))
        .route("/crisismap/api/reports", post(rest::reports::api_create_report))
        .route("/crisismap/api/reports/search", get(rest::reports::api_search_reports))
        .route("/crisismap/api/votes", post(rest::votes::api_vote))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
