//! Error taxonomy shared by the facades.
//!
//! Every facade returns one closed enum. Remote failures surface as
//! [`BackendError`] wrapped in the facade's own type, local pre-flight checks
//! as [`ValidationError`].

use thiserror::Error;

/// Missing or malformed connection settings. Fatal at initialization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("backend URL must be a non-empty string")]
    MissingUrl,
    #[error("backend anon key must be a non-empty string")]
    MissingAnonKey,
    #[error("backend URL `{url}` invalid: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Raised by the client provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("backend client not initialized; call initialize() first")]
    Uninitialized,
    #[error("failed to construct backend client: {0}")]
    Connect(#[from] BackendError),
}

/// Failure reported by (or while talking to) the remote backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("`{0}` already exists")]
    Conflict(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed backend payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl BackendError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no active session")]
    NotSignedIn,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Lookup by id matched zero or several rows.
    #[error("product `{id}` not found ({matched} rows matched)")]
    NotFound { id: String, matched: usize },
    #[error("invalid product: {0}")]
    Validation(String),
    #[error(transparent)]
    Query(#[from] BackendError),
}

/// Local checks on an image before it is sent anywhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No file selected")]
    MissingFile,
    #[error("Invalid file type. Please upload a JPEG, PNG, or WebP image.")]
    UnsupportedType(String),
    #[error("File size too large. Maximum size is 5MB.")]
    TooLarge { size: u64, max: u64 },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("upload failed: {0}")]
    Storage(#[from] BackendError),
}
