//! Error types for Bundle Sync
//!
//! This module provides the error hierarchy used across the reconciliation
//! engine. Each external concern (catalog API, persisted state, inbound
//! webhooks, configuration) gets its own `thiserror` enum. The crate-level
//! [`Error`] is returned where more than one of them can fail, such as
//! opening the SQLite store.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for Bundle Sync operations
#[derive(Error, Debug)]
pub enum Error {
    /// Catalog API errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Persisted state errors (dedup records, order history)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Inbound webhook errors
    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors returned by the external catalog API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    /// The request never produced a response
    #[error("Request failed: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("HTTP error {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Errors from the persisted-state stores
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Backing store could not be reached or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be parsed
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Errors surfaced to the webhook sender
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WebhookError {
    /// Payload is malformed or missing required fields
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// No credential is stored for the producing store
    #[error("Unknown store: {0}")]
    UnknownStore(String),

    /// Unexpected failure while processing
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration loading errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Environment variable holds a value that cannot be parsed
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name
        key: String,
        /// Parse failure
        message: String,
    },

    /// Credential list entry is not `store:token`
    #[error("Invalid store credential entry: {0}")]
    InvalidCredential(String),
}

/// Result type alias for Bundle Sync operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CatalogError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            CatalogError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            CatalogError::Transport(err.to_string())
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(err.to_string())
            }
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

impl From<url::ParseError> for CatalogError {
    fn from(err: url::ParseError) -> Self {
        CatalogError::InvalidUrl(err.to_string())
    }
}

/// JSON body returned by every webhook response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Human-readable outcome
    pub message: String,
}

impl MessageBody {
    /// Build a message body
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl WebhookError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::UnknownStore(_) => StatusCode::UNAUTHORIZED,
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(MessageBody::new(self.to_string()))).into_response()
    }
}
