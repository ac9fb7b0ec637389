use std::collections::HashMap;

use axum::extract::Multipart;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use base64::{engine::general_purpose, Engine as _};

use crate::common::responses::ApiResponse;
use crate::common::utils::replace_template_variables;
use crate::error::{ConversionError, Error};
use crate::models::convert::{ConvertedHtml, ConvertedPdf};
use crate::routes::web::AppState;
use crate::services::convert::ImageHandling;
use crate::services::{convert, html, render};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/convert/word-to-html", post(word_to_html_handler))
        .route("/convert/word-to-pdf", post(word_to_pdf_handler))
}

struct ConvertRequest {
    file: Vec<u8>,
    variables: HashMap<String, String>,
}

async fn read_convert_request<T>(
    multipart: &mut Multipart,
) -> Result<ConvertRequest, (StatusCode, Json<ApiResponse<T>>)> {
    let mut file = None;
    let mut variables = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiResponse::bad_request(format!("Invalid multipart payload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiResponse::bad_request(format!("Failed to read file: {}", e)))?;
                file = Some(data.to_vec());
            }
            "variables" => {
                let text = field.text().await.map_err(|e| {
                    ApiResponse::bad_request(format!("Failed to read variables: {}", e))
                })?;
                variables = serde_json::from_str(&text).map_err(|e| {
                    ApiResponse::bad_request(format!("variables must be a JSON object: {}", e))
                })?;
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiResponse::bad_request("Missing file field".to_string()))?;
    Ok(ConvertRequest { file, variables })
}

#[utoipa::path(
    post,
    path = "/api/convert/word-to-html",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Document converted", body = ApiResponse<ConvertedHtml>),
        (status = 400, description = "Invalid request", body = ApiResponse<ConvertedHtml>),
        (status = 415, description = "Unrecognized document format", body = ApiResponse<ConvertedHtml>)
    ),
    tag = "convert"
)]
pub async fn word_to_html_handler(
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<ConvertedHtml>>, (StatusCode, Json<ApiResponse<ConvertedHtml>>)> {
    let request = read_convert_request(&mut multipart).await?;

    // Uploaded documents never choose a filesystem destination; embedded
    // images come back inline as data URIs.
    let conversion = convert::word_to_html(&request.file, &ImageHandling::Inline)
        .map_err(|e| ApiResponse::from_error(Error::Conversion(e)))?;
    let html = replace_template_variables(&conversion.html, &request.variables);

    tracing::info!(
        format = conversion.format.as_str(),
        images = conversion.extracted_images.len(),
        "document converted to HTML"
    );
    Ok(ApiResponse::ok(
        "Document converted successfully",
        ConvertedHtml {
            html,
            detected_format: conversion.format.as_str().to_string(),
            extracted_images: conversion.extracted_images,
        },
    ))
}

#[utoipa::path(
    post,
    path = "/api/convert/word-to-pdf",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Document rendered to PDF", body = ApiResponse<ConvertedPdf>),
        (status = 400, description = "Invalid request", body = ApiResponse<ConvertedPdf>),
        (status = 422, description = "Conversion failed", body = ApiResponse<ConvertedPdf>)
    ),
    tag = "convert"
)]
pub async fn word_to_pdf_handler(
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<ConvertedPdf>>, (StatusCode, Json<ApiResponse<ConvertedPdf>>)> {
    let request = read_convert_request(&mut multipart).await?;

    let conversion = convert::word_to_html(&request.file, &ImageHandling::Inline)
        .map_err(|e| ApiResponse::from_error(Error::Conversion(e)))?;
    let substituted = replace_template_variables(&conversion.html, &request.variables);
    let normalized = html::normalize_html(&substituted)
        .map_err(|e| ApiResponse::from_error(Error::Conversion(e)))?;

    // Chrome renders synchronously; keep it off the async worker threads.
    let pdf = tokio::task::spawn_blocking(move || render::html_to_pdf(&normalized))
        .await
        .map_err(|e| {
            ApiResponse::from_error(Error::Conversion(ConversionError::Render(anyhow::anyhow!(
                "render task failed: {}",
                e
            ))))
        })?
        .map_err(|e| ApiResponse::from_error(Error::Conversion(e)))?;

    tracing::info!(
        format = conversion.format.as_str(),
        bytes = pdf.len(),
        "document rendered to PDF"
    );
    Ok(ApiResponse::ok(
        "Document rendered successfully",
        ConvertedPdf {
            pdf_base64: general_purpose::STANDARD.encode(&pdf),
            detected_format: conversion.format.as_str().to_string(),
            size_bytes: pdf.len(),
        },
    ))
}
