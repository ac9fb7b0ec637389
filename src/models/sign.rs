use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Placement and metadata options for a visible signature.
#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct SignOptions {
    /// 1-based page number. Omitted means the last page.
    pub page: Option<u32>,
    pub right_offset: f32,
    pub top_offset: f32,
    pub width: f32,
    pub height: f32,
    pub reason: Option<String>,
    pub location: Option<String>,
}

impl Default for SignOptions {
    fn default() -> Self {
        SignOptions {
            page: None,
            right_offset: 150.0,
            top_offset: 50.0,
            width: 50.0,
            height: 30.0,
            reason: None,
            location: None,
        }
    }
}

/// A signed PDF ready to return to the client.
#[derive(Serialize, ToSchema)]
pub struct SignedDocument {
    /// Base64-encoded PDF bytes.
    pub pdf_base64: String,
    /// SHA-256 of the signed bytes, hex-encoded.
    pub sha256: String,
    pub page: u32,
    pub size_bytes: usize,
}
