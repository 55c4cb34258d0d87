use gateway_service::auth::cache::ValidationCache;
use gateway_service::auth::jwks::JwksClient;
use gateway_service::auth::jwt::JwtValidator;
use gateway_service::auth::revocation::RevocationStore;
use gateway_service::config::Config;
use gateway_service::observability;
use gateway_service::routes::{self, AppState};
use gateway_service::services::OidcClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Millgate gateway");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Configuration loaded successfully");

    // Initialize database connection pool
    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    info!("Database connection established");

    sqlx::migrate!("../../migrations").run(&db_pool).await?;
    info!("Migrations applied");

    // Metrics recorder (non-fatal when it cannot install, e.g. double init)
    let metrics_handle = match observability::init_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics recorder unavailable: {}", e);
            None
        }
    };

    // Authentication components: constructed once, owned by the router
    // state, passed explicitly to every consumer.
    let jwks_client = Arc::new(JwksClient::new(config.jwks_url.clone()));
    let validator = Arc::new(JwtValidator::new(
        Arc::clone(&jwks_client),
        config.jwt_clock_skew_seconds,
    ));
    let cache = Arc::new(ValidationCache::default());
    let revocations = Arc::new(RevocationStore::new());
    let oidc = Arc::new(OidcClient::new(&config));

    // Parse bind address before moving config
    let bind_address = config.bind_address.clone();

    let state = Arc::new(AppState {
        pool: db_pool,
        config,
        oidc,
        validator,
        cache,
        revocations,
        metrics: metrics_handle,
    });

    // Build application routes
    let app = routes::build_routes(state);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Millgate gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
