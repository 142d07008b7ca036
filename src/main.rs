use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pickup_api::{
    config::Config,
    middleware::auth::JwtSecret,
    routes,
    services::lifecycle::{start_sweeper, PickupLifecycle},
    store::{pg::PgStore, DocumentStore},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let config = Arc::new(config);

    let store: Arc<dyn DocumentStore> =
        Arc::new(PgStore::connect(&config.database_url, &config.redis_url).await?);
    info!("Document store connected and provisioned");

    let lifecycle = PickupLifecycle::new(Arc::clone(&store), config.grace_window);
    start_sweeper(lifecycle.clone(), config.sweep_interval);

    let state = AppState {
        store,
        lifecycle,
        config: config.clone(),
    };

    // Allow the app base domain; localhost is always allowed for
    // development.
    let base_url = config.app_base_url.clone();
    let cors_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let o = match origin.to_str() {
            Ok(s) => s,
            Err(_) => return false,
        };
        o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") || o == base_url
    });

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_origin(cors_origin);

    let jwt_secret = JwtSecret(config.jwt_secret.clone());

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Auth
        .route("/auth/me", get(routes::auth::me))
        // School
        .route("/classes", get(routes::classes::list_classes))
        .route("/classes/{id}/students", get(routes::classes::list_students))
        // Kindergarten
        .route("/groups", get(routes::groups::list_groups))
        .route("/groups/{id}/children", get(routes::groups::list_children))
        // Pickup requests
        .route("/pickups", post(routes::pickups::create_pickup))
        .route("/pickups/{id}", get(routes::pickups::get_pickup))
        .route("/pickups/{id}/ws", get(routes::websocket::pickup_status_ws))
        .route("/scopes/{id}/pending", get(routes::pickups::scope_pending))
        .route("/scopes/{id}/pending/ws", get(routes::websocket::scope_pending_ws))
        // Notices
        .route("/ws", get(routes::websocket::notices_ws))
        .layer(axum::Extension(jwt_secret))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("pickup API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
