//! Defines the HTTP surface of the flipbook server.
//!
//! ## Structure
//! - `POST /upload-jpgs` — build a flipbook from multipart field `files`
//! - `GET  /flipbook/*`  — static files rooted at the output directory
//! - `GET  /healthz`, `GET /readyz` — probes
//! - anything else       — static files rooted at the static directory
//!
//! Every route passes through the CORS and request-tracing layers.

use crate::{
    AppState,
    config::AppConfig,
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::upload_jpgs,
    },
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

/// Build the router for the upload route and both static mounts.
///
/// The router carries shared state (`AppState`) to the handlers.
pub fn routes(cfg: &AppConfig) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload-jpgs",
            post(upload_jpgs).layer(DefaultBodyLimit::disable()),
        )
        .nest_service("/flipbook", ServeDir::new(&cfg.output_dir))
        .fallback_service(ServeDir::new(&cfg.static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cfg))
}

/// `*` anywhere in the allowed origins allows every origin.
pub fn cors_layer(cfg: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if cfg.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = cfg
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring invalid CORS origin `{}`", o);
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}
