use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct ConvertedHtml {
    pub html: String,
    /// Format detected from the file header, "doc" or "docx".
    pub detected_format: String,
    /// Names of embedded images carried into the HTML as data URIs.
    pub extracted_images: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ConvertedPdf {
    pub pdf_base64: String,
    pub detected_format: String,
    pub size_bytes: usize,
}
