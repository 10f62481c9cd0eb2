//! Upstream error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Upstream rejected request: {code} - {message}")]
    Rejected { code: i64, message: String },
}
