//! `agent-memory-server`: the thin HTTP adapter over `agent-memory-core`
//! (spec §1's explicit non-goal list — auth, rate limiting, audit logging,
//! and routing live here, never in the core crate).

mod auth;
mod response;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower::limit::RateLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agent_memory_core::{AppConfig, CoreContext};

use crate::auth::AuthStore;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<CoreContext>,
    pub auth: Arc<AuthStore>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("AGENT_MEMORY_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/recall", post(routes::recall))
        .route("/v1/capture", post(routes::capture))
        .route("/v1/store", post(routes::store))
        .route("/v1/rule", post(routes::rule))
        .route("/v1/forget", delete(routes::forget))
        .route("/v1/search", get(routes::search))
        .route("/v1/pin", post(routes::pin))
        .route("/v1/unpin", post(routes::unpin))
        .route("/v1/decay", post(routes::decay))
        .route("/v1/consolidate", post(routes::consolidate))
        .route("/v1/compress", post(routes::compress))
        .route("/v1/gc", post(routes::gc))
        .route("/v1/amnesia-check", post(routes::amnesia_check))
        .route("/v1/stats", get(routes::stats))
        .route("/v1/agents", get(routes::agents))
        .route("/v1/metrics", get(routes::metrics))
        .route("/v1/metrics/prometheus", get(routes::metrics_prometheus))
        .route("/v1/export", get(routes::export))
        .route("/v1/import", post(routes::import))
        .route("/v1/admin/rotate-key", post(routes::rotate_key))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .route("/v1/health", get(routes::health))
        .route("/v1/health/deep", get(routes::health_deep))
        .merge(protected)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            let code = if e.to_string().contains("missing required secret") { 4 } else { 2 };
            std::process::exit(code);
        }
    };

    let ctx = Arc::new(CoreContext::new(config.clone()));

    // Touch the default agent's store once at startup so a corrupt/
    // unwritable store file fails fast with the documented exit code,
    // rather than surfacing on the first recall request.
    if let Err(e) = ctx.pool.get("main") {
        error!(error = %e, "failed to open default store");
        std::process::exit(3);
    }

    let auth = Arc::new(AuthStore::from_env());
    if !auth.is_enabled() {
        tracing::warn!("AGENT_MEMORY_API_KEYS not set; running with auth disabled");
    }

    let state = AppState { ctx, auth };

    let requests_per_sec: u64 = std::env::var("AGENT_MEMORY_RATE_LIMIT_RPS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(200);

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(tower_http::cors::Any).allow_methods([Method::GET, Method::POST, Method::DELETE]))
        .layer(SetResponseHeaderLayer::if_not_present(
            axum::http::header::SERVER,
            HeaderValue::from_static(concat!("agent-memory-server/", env!("CARGO_PKG_VERSION"))),
        ))
        .layer(RateLimitLayer::new(requests_per_sec, Duration::from_secs(1)));

    let port: u16 = std::env::var("AGENT_MEMORY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8089);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind listener");
            std::process::exit(3);
        }
    };

    info!(%addr, "agent-memory-server listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
        std::process::exit(3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_memory_core::Embedder;
    use std::sync::Arc;

    fn state_in(dir: &std::path::Path) -> AppState {
        let mut config = AppConfig::default();
        config.store.data_dir = Some(dir.to_string_lossy().to_string());
        config.embed.dimensions = 8;
        config.rerank.enabled = false;
        let embedder: Arc<dyn Embedder> = Arc::new(agent_memory_core::NullEmbedder::new(8));
        let ctx = Arc::new(CoreContext::with_embedder(config, embedder));
        AppState { ctx, auth: Arc::new(AuthStore::from_env()) }
    }

    #[test]
    fn router_builds_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let _router = build_router(state_in(dir.path()));
    }
}
