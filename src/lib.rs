//! Flipbook server: turns a batch of uploaded JPEGs into a copy of a static
//! flipbook template and publishes it under a generated id.

use axum::Router;
use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use config::AppConfig;
use services::flipbook_service::FlipbookService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub flipbooks: FlipbookService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            flipbooks: FlipbookService::from_config(&config),
            config: Arc::new(config),
        }
    }
}

/// Build the full application router from configuration.
pub fn create_app(config: AppConfig) -> Router {
    let state = AppState::new(config);
    routes::routes::routes(&state.config).with_state(state)
}
