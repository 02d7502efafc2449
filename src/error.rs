//! Error taxonomy shared by the storage, extraction, model, and
//! orchestration layers.
//!
//! | Variant | Recoverable | Typical handling |
//! |---------|-------------|------------------|
//! | [`ServiceError::NotFound`] | yes | alternate resolution path, then fallback |
//! | [`ServiceError::Transport`] | yes | bounded retry, then fallback |
//! | [`ServiceError::Parse`] | yes | fallback with degraded recommendations |
//! | [`ServiceError::Configuration`] | no | HTTP 500 |
//! | [`ServiceError::BadRequest`] | no | HTTP 400 |

use thiserror::Error;

/// Errors produced by the matching and comparison core.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The object is absent from the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, timeout, or non-2xx reply from the store or the model API.
    #[error("transport error: {0}")]
    Transport(String),

    /// The model reply could not be shaped into a comparison result.
    #[error("parse error: {0}")]
    Parse(String),

    /// Missing credentials, keys, or required settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed inbound input.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ServiceError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Whether the caller may route around this error (alternate path or fallback).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Transport(_) | Self::Parse(_)
        )
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {}", err))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
