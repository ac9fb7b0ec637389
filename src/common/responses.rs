use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Standard envelope for every API response.
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub status_code: u16,
    pub message: String,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<ApiResponse<T>> {
        Json(ApiResponse {
            success: true,
            status_code: 200,
            message: message.into(),
            data: Some(data),
            error: None,
        })
    }

    pub fn bad_request(message: String) -> (StatusCode, Json<ApiResponse<T>>) {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse {
                success: false,
                status_code: 400,
                message: message.clone(),
                data: None,
                error: Some(message),
            }),
        )
    }

    pub fn from_error(err: crate::error::Error) -> (StatusCode, Json<ApiResponse<T>>) {
        let status = err.status_code();
        tracing::error!(error = %err, status = %status, "request failed");
        let message = err.to_string();
        (
            status,
            Json(ApiResponse {
                success: false,
                status_code: status.as_u16(),
                message: message.clone(),
                data: None,
                error: Some(message),
            }),
        )
    }

    pub fn internal_error(message: String) -> (StatusCode, Json<ApiResponse<T>>) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse {
                success: false,
                status_code: 500,
                message: message.clone(),
                data: None,
                error: Some(message),
            }),
        )
    }
}
