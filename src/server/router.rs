//! HTTP router and shared application state.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{any, get, post},
};
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};

use super::auth::ResolvedAuth;
use super::handlers;
use crate::scope::{ScopeBuilder, ScopeStore};
use crate::token::TokenService;
use crate::upstream::{Directory, Forwarder};

/// Shared application state, constructed once at startup and threaded into
/// every handler. The caches and the revocation set are the only mutable
/// pieces; each is owned by its service.
pub struct AppState {
    /// Resolved API-key and admin-key bindings
    pub auth: ResolvedAuth,
    /// Token mint/validate/revoke service
    pub tokens: Arc<TokenService>,
    /// Scope cache
    pub scopes: Arc<dyn ScopeStore>,
    /// Scope materialization
    pub builder: ScopeBuilder,
    /// Upstream directory, used by the health probe
    pub directory: Arc<dyn Directory>,
    /// Upstream request forwarder
    pub forwarder: Arc<Forwarder>,
    /// TTL for cached scopes
    pub scope_ttl: Duration,
}

/// Create the router.
pub fn create_router(state: Arc<AppState>, max_body_size: usize) -> Router {
    Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/logout", post(handlers::logout))
        .route("/admin/refresh/{group_id}", post(handlers::admin_refresh))
        .route("/admin/health", get(handlers::admin_health))
        .route("/v1.0/{*path}", any(handlers::proxy_v1))
        .route("/beta/{*path}", any(handlers::proxy_beta))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
