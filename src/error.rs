use axum::http::StatusCode;
use thiserror::Error;

/// Top-level error for the conversion and signing pipelines.
#[derive(Debug, Error)]
pub enum Error {
    #[error("resource not found: {path}")]
    ResourceNotFound {
        path: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Keystore(#[from] KeystoreError),

    #[error(transparent)]
    Signing(#[from] SigningError),
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("unrecognized document format (header bytes do not match ZIP or OLE)")]
    UnknownFormat,

    #[error("document archive is unreadable")]
    Archive(#[from] zip::result::ZipError),

    #[error("document markup is malformed")]
    Markup(#[from] quick_xml::Error),

    #[error("document contains no extractable text")]
    Empty,

    #[error("failed to extract embedded image {name}")]
    ImageExtraction {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTML rendering failed: {0}")]
    Render(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("keystore not found at {path}")]
    NotFound {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("keystore is not a valid PKCS#12 container")]
    Malformed(#[source] openssl::error::ErrorStack),

    #[error("keystore password rejected")]
    BadPassword(#[source] openssl::error::ErrorStack),

    #[error("keystore contains no private key")]
    NoPrivateKey,

    #[error("keystore contains no certificate")]
    NoCertificate,

    #[error("signing certificate expired on {not_after}")]
    Expired { not_after: String },
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("input is not a valid PDF")]
    InvalidPdf(#[source] lopdf::Error),

    #[error("page {requested} does not exist (document has {total} pages)")]
    PageOutOfRange { requested: u32, total: u32 },

    #[error("signature image could not be decoded")]
    Image(#[source] image::ImageError),

    #[error("failed to assemble signature structures")]
    Assembly(#[source] lopdf::Error),

    #[error("cryptographic signing failed")]
    Cms(#[source] openssl::error::ErrorStack),

    #[error("signature of {actual} bytes exceeds the {capacity}-byte placeholder")]
    SignatureTooLarge { actual: usize, capacity: usize },

    #[error("byte range offsets did not stabilize after {passes} serialization passes")]
    ByteRangeUnstable { passes: usize },

    #[error("failed to serialize signed document: {0}")]
    Serialize(String),

    #[error("signature placeholder not present in serialized document")]
    PlaceholderMissing,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conversion(ConversionError::UnknownFormat) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::Conversion(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Keystore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Signing(SigningError::PageOutOfRange { .. })
            | Error::Signing(SigningError::InvalidPdf(_))
            | Error::Signing(SigningError::Image(_)) => StatusCode::BAD_REQUEST,
            Error::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_maps_to_unsupported_media_type() {
        let err = Error::from(ConversionError::UnknownFormat);
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn page_out_of_range_maps_to_bad_request() {
        let err = Error::from(SigningError::PageOutOfRange {
            requested: 9,
            total: 3,
        });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("page 9"));
    }

    #[test]
    fn unstable_byte_range_is_internal() {
        let err = Error::from(SigningError::ByteRangeUnstable { passes: 5 });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn keystore_errors_are_internal() {
        let err = Error::from(KeystoreError::NoPrivateKey);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
