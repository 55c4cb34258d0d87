//! HTTP routes for the gateway.
//!
//! Defines the Axum router and application state. Protected routes are
//! wrapped with the authentication middleware; the login/callback pair
//! and health/metrics stay public.

use crate::auth::cache::ValidationCache;
use crate::auth::jwt::JwtValidator;
use crate::auth::revocation::RevocationStore;
use crate::config::Config;
use crate::handlers;
use crate::middleware::auth::{require_auth, AuthState};
use crate::services::OidcClient;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across handlers and middleware.
///
/// The cache and revocation store are explicit component instances owned
/// here and injected everywhere they are consumed - constructed once at
/// process start, no package-level singletons.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: PgPool,

    /// Service configuration.
    pub config: Config,

    /// Identity-provider client for the login path.
    pub oidc: Arc<OidcClient>,

    /// JWT validator with JWKS client.
    pub validator: Arc<JwtValidator>,

    /// Token validation cache.
    pub cache: Arc<ValidationCache>,

    /// Token revocation store.
    pub revocations: Arc<RevocationStore>,

    /// Prometheus render handle; `None` when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Build the application routes.
///
/// - Public: `/v1/health`, `/metrics`, `/auth/login`, `/auth/callback`
/// - Protected (auth middleware): `/auth/check`, `/auth/logout`,
///   `/v1/me/permissions`, `/v1/me/permissions/check`
/// - TraceLayer for request logging, 30 second request timeout
pub fn build_routes(state: Arc<AppState>) -> Router {
    let auth_state = Arc::new(AuthState {
        pool: state.pool.clone(),
        validator: Arc::clone(&state.validator),
        cache: Arc::clone(&state.cache),
        revocations: Arc::clone(&state.revocations),
    });

    let public_routes = Router::new()
        .route("/v1/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics_handler))
        .route("/auth/login", get(handlers::auth_handler::login))
        .route("/auth/callback", get(handlers::auth_handler::callback))
        .with_state(Arc::clone(&state));

    let protected_routes = Router::new()
        .route("/auth/check", get(handlers::auth_handler::check))
        .route("/auth/logout", post(handlers::auth_handler::logout))
        .route(
            "/v1/me/permissions",
            get(handlers::permissions_handler::get_permissions),
        )
        .route(
            "/v1/me/permissions/check",
            get(handlers::permissions_handler::check_permission_query),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    public_routes
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        // Required for Axum's State extractor.
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_config_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<Config>();
    }
}
