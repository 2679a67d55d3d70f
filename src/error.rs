use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid service response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExtractorError>;
