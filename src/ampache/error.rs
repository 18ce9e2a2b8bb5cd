use thiserror::Error;

use super::parser::ParseError;

/// Session token expired; the client re-authenticates once and retries
pub const SESSION_EXPIRED: u32 = 4701;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server answered with status {0}")]
    Status(reqwest::StatusCode),

    #[error("Ampache error {code}: {message}")]
    Server { code: u32, message: String },

    #[error("Failed to parse server response: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid server URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Handshake did not return a session token")]
    MissingToken,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ApiError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::Server { code, .. } if *code == SESSION_EXPIRED)
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
