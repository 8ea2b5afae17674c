mod config;
mod db;
mod db_storage;
mod errors;
mod extractor;
mod ghl_client;
mod ghl_sync;
mod handlers;
mod models;
mod nda;
mod normalize;
mod transport;
mod webhook_handler;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;

/// Serves the OpenAPI specification YAML file.
async fn serve_openapi_spec() -> impl IntoResponse {
    match tokio::fs::read_to_string("openapi.yml").await {
        Ok(content) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/yaml")],
            content,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "OpenAPI spec not found.").into_response(),
    }
}

/// Serves the Swagger UI HTML page, configured to load the OpenAPI spec
/// served by `serve_openapi_spec`.
async fn serve_swagger_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Rust Inbound API - Swagger UI</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; padding: 0; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-standalone-preset.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/api-docs/openapi.yml",
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIStandalonePreset
                ],
                layout: "StandaloneLayout"
            });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database pool, the GHL client,
/// and the HTTP routes with their middleware (CORS, rate limiting, request
/// body limit), then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_inbound_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool (runs migrations)
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // Media folder-id cache (24 hour TTL); folder ids are stable, so this
    // saves one listing call per NDA upload.
    let nda_folder_cache = Cache::builder()
        .time_to_live(Duration::from_secs(86400))
        .max_capacity(100)
        .build();

    // Initialize GHL client; sync degrades to a no-op when unconfigured.
    let ghl_client = ghl_client::GhlClient::from_config(&config);
    match &ghl_client {
        Some(_) => tracing::info!("GHL client initialized: {}", config.ghl_base_url),
        None => tracing::warn!("GHL client not configured; CRM sync disabled"),
    }

    // Build application state
    let app_state = Arc::new(handlers::AppState {
        db: db.pool.clone(),
        config: config.clone(),
        ghl_client,
        nda_folder_cache,
        nda_renderer: Arc::new(nda::ValueSnapshotRenderer),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        // API Documentation
        .route("/docs", get(serve_swagger_ui))
        .route("/api-docs/openapi.yml", get(serve_openapi_spec))
        // SendGrid Inbound Parse webhook
        .route(
            "/api/v1/webhooks/sendgrid",
            post(webhook_handler::sendgrid_inbound),
        )
        // Inbound email inspection
        .route("/api/v1/emails", get(handlers::list_emails))
        .route("/api/v1/emails/:id", get(handlers::get_email))
        // NDA pages
        .route("/api/v1/nda", get(handlers::nda_contacts))
        .route(
            "/api/v1/nda/:contact_id",
            get(handlers::nda_form).post(handlers::nda_save),
        )
        .layer(
            ServiceBuilder::new()
                // Raw MIME emails can be large: 25MB max payload
                .layer(RequestBodyLimitLayer::new(25 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check (bypasses rate limiting)
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
