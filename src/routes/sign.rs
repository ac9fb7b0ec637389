use std::path::Path;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};

use crate::common::responses::ApiResponse;
use crate::common::utils::fetch_bytes;
use crate::error::Error;
use crate::models::sign::{SignOptions, SignedDocument};
use crate::routes::web::AppState;
use crate::services::{keystore, signer};

pub fn create_router() -> Router<AppState> {
    Router::new().route("/sign", post(sign_handler))
}

type SignResult = Result<Json<ApiResponse<SignedDocument>>, (StatusCode, Json<ApiResponse<SignedDocument>>)>;

fn bad_request(message: String) -> (StatusCode, Json<ApiResponse<SignedDocument>>) {
    ApiResponse::bad_request(message)
}

#[utoipa::path(
    post,
    path = "/api/sign",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "PDF signed", body = ApiResponse<SignedDocument>),
        (status = 400, description = "Invalid request", body = ApiResponse<SignedDocument>),
        (status = 404, description = "Remote document not found", body = ApiResponse<SignedDocument>),
        (status = 500, description = "Keystore or signing failure", body = ApiResponse<SignedDocument>)
    ),
    tag = "sign"
)]
pub async fn sign_handler(State(state): State<AppState>, mut multipart: Multipart) -> SignResult {
    let mut pdf_bytes: Option<Vec<u8>> = None;
    let mut pdf_url: Option<String> = None;
    let mut image_bytes: Option<Vec<u8>> = None;
    let mut options = SignOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Invalid multipart payload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "pdf" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read pdf: {}", e)))?;
                pdf_bytes = Some(data.to_vec());
            }
            "pdf_url" => {
                pdf_url = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| bad_request(format!("Failed to read pdf_url: {}", e)))?,
                );
            }
            "image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read image: {}", e)))?;
                image_bytes = Some(data.to_vec());
            }
            "page" => options.page = Some(parse_field(field, &name).await?),
            "right_offset" => options.right_offset = parse_field(field, &name).await?,
            "top_offset" => options.top_offset = parse_field(field, &name).await?,
            "width" => options.width = parse_field(field, &name).await?,
            "height" => options.height = parse_field(field, &name).await?,
            "reason" => {
                options.reason = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| bad_request(format!("Failed to read reason: {}", e)))?,
                );
            }
            "location" => {
                options.location = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| bad_request(format!("Failed to read location: {}", e)))?,
                );
            }
            _ => {}
        }
    }

    let pdf = match (pdf_bytes, pdf_url) {
        (Some(bytes), _) => bytes,
        (None, Some(url)) => fetch_bytes(&url).await.map_err(ApiResponse::from_error)?,
        (None, None) => return Err(bad_request("Missing pdf file or pdf_url".to_string())),
    };
    let image =
        image_bytes.ok_or_else(|| bad_request("Missing signature image".to_string()))?;

    let keystore_config = state.config.keystore.clone();
    // Keystore parsing and RSA signing are CPU bound; keep them off the
    // async worker threads.
    let signed = tokio::task::spawn_blocking(move || {
        let key = keystore::load_from_file(
            Path::new(&keystore_config.path),
            &keystore_config.password,
        )
        .map_err(Error::Keystore)?;
        signer::sign_pdf(&pdf, &image, &options, &key).map_err(Error::Signing)
    })
    .await
    .map_err(|e| ApiResponse::internal_error(format!("Signing task failed: {}", e)))?
    .map_err(ApiResponse::from_error)?;

    let digest = hex::encode(Sha256::digest(&signed.bytes));
    tracing::info!(
        page = signed.page,
        bytes = signed.bytes.len(),
        sha256 = %digest,
        "pdf signed"
    );
    Ok(ApiResponse::ok(
        "PDF signed successfully",
        SignedDocument {
            pdf_base64: general_purpose::STANDARD.encode(&signed.bytes),
            sha256: digest,
            page: signed.page,
            size_bytes: signed.bytes.len(),
        },
    ))
}

async fn parse_field<T: std::str::FromStr>(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<T, (StatusCode, Json<ApiResponse<SignedDocument>>)>
where
    T::Err: std::fmt::Display,
{
    let text = field
        .text()
        .await
        .map_err(|e| bad_request(format!("Failed to read {}: {}", name, e)))?;
    text.trim()
        .parse()
        .map_err(|e| bad_request(format!("Invalid value for {}: {}", name, e)))
}
