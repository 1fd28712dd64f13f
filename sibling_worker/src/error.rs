use sibling_codec::CloneError;
use thiserror::Error;

/// Errors surfaced by sibling handles and their collaborators.
///
/// The type is `Clone` because the outcome of the creation request is shared
/// by every operation awaiting the channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    #[error("Failed to construct 'Worker': '{0}' is not a blob: URL")]
    InvalidUrl(String),
    #[error("{value} is not a valid value for WorkerOptions.{field}")]
    InvalidOption { field: &'static str, value: String },
    #[error("No script is registered for '{0}'")]
    ScriptNotFound(String),
    #[error("Sibling request failed with status {status}: {message}")]
    Transport { status: u16, message: String },
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error(transparent)]
    Clone(#[from] CloneError),
    #[error("JSON serialization/deserialization failed: {0}")]
    Json(String),
    #[error("No handler is registered for entrypoint '{0}'")]
    UnknownEntrypoint(String),
    #[error("Invalid channel id: {0:?}")]
    InvalidChannel(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for WorkerError {
    fn from(e: reqwest::Error) -> Self {
        WorkerError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(e: serde_json::Error) -> Self {
        WorkerError::Json(e.to_string())
    }
}

impl From<url::ParseError> for WorkerError {
    fn from(e: url::ParseError) -> Self {
        WorkerError::Config(format!("URL parsing failed: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Failures of a [`KeyBackend`](crate::crypto_key::KeyBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key is not extractable")]
    NotExtractable,
    #[error("unsupported JWK key type '{0}'")]
    UnsupportedKeyType(String),
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}
