use axum::{response::Json, routing::get, Router};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::routes::{convert, sign};

#[derive(Clone)]
pub struct AppStateData {
    pub config: AppConfig,
}

pub type AppState = Arc<AppStateData>;

pub fn create_router() -> Router<AppState> {
    let api_routes = Router::new()
        .merge(convert::create_router())
        .merge(sign::create_router());

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health_check))
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
