mod common;
mod config;
mod error;
mod models;
mod routes;
mod services;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use config::AppConfig;
use routes::web::{create_router, AppState, AppStateData};

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::convert::word_to_html_handler,
        routes::convert::word_to_pdf_handler,
        routes::sign::sign_handler,
    ),
    components(
        schemas(
            models::convert::ConvertedHtml,
            models::convert::ConvertedPdf,
            models::sign::SignOptions,
            models::sign::SignedDocument,
            common::responses::ApiResponse<models::convert::ConvertedHtml>,
            common::responses::ApiResponse<models::convert::ConvertedPdf>,
            common::responses::ApiResponse<models::sign::SignedDocument>,
        )
    ),
    tags(
        (name = "convert", description = "Word document conversion endpoints"),
        (name = "sign", description = "PDF signing endpoints")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    match dotenvy::dotenv() {
        Ok(path) => println!("Loaded .env file from: {:?}", path),
        Err(e) => println!("No .env file loaded: {}", e),
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Surface keystore problems at startup; the conversion endpoints
    // keep working either way.
    match services::keystore::load_from_file(
        Path::new(&config.keystore.path),
        &config.keystore.password,
    ) {
        Ok(_) => tracing::info!(path = %config.keystore.path, "keystore validated"),
        Err(e) => tracing::warn!(
            path = %config.keystore.path,
            error = %e,
            "keystore is not usable; signing requests will fail"
        ),
    }

    let app_state: AppState = Arc::new(AppStateData {
        config: config.clone(),
    });

    let api_routes = create_router();
    let swagger_routes =
        SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi());

    let app = Router::new()
        .merge(api_routes)
        .merge(swagger_routes)
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("server running on http://{}", addr);
    tracing::info!("swagger ui: http://{}/swagger-ui", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind server port");
    axum::serve(listener, app.into_make_service())
        .await
        .expect("server error");
}
