pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::StorageConfig;
use crate::services::upload_service::UploadService;
use axum::{
    Router,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub upload: Arc<UploadService>,
    pub config: StorageConfig,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/upload",
            post(api::handlers::upload::upload_chunk).layer(
                // Room for multipart framing on top of the chunk itself.
                axum::extract::DefaultBodyLimit::max(state.config.max_chunk_size + 1024 * 1024),
            ),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
