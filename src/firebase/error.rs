//! Error types for sign-in, the scoped store and configuration

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The backend refused the request with the given error code
    /// (e.g. `INVALID_PASSWORD`, `TOO_MANY_ATTEMPTS_TRY_LATER`).
    #[error("Authentication rejected: {code}")]
    Rejected { code: String },

    #[error("Auth transport error: {0}")]
    Transport(String),

    #[error("Auth endpoint returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Auth configuration error: {0}")]
    Config(String),

    #[error("Failed to access session file: {0}")]
    SessionFile(#[from] std::io::Error),

    #[error("Failed to parse auth response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl AuthError {
    /// Backend error code, if the backend answered with one.
    pub fn code(&self) -> Option<&str> {
        match self {
            AuthError::Rejected { code } => Some(code),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Access denied: no authenticated user")]
    AccessDenied,

    #[error("Invalid path segment: {0}")]
    InvalidPath(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Firestore API error (HTTP {status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Store transport error: {0}")]
    Transport(String),

    #[error("Failed to decode document: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required config value: {0}")]
    Missing(&'static str),
}
