//! Error types for feedkit
//!
//! This module defines the crate-level error type. Failures of a single
//! load-more attempt are modelled separately by
//! [`LoadMoreError`](crate::recovery::LoadMoreError), which carries the
//! classification used to pick a recovery strategy.

use crate::load_more::LoadMoreState;
use crate::recovery::LoadMoreError;
use thiserror::Error;

/// The main error type for feedkit
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // ============================================================================
    // State Machine Errors
    // ============================================================================
    #[error("Invalid load-more transition: {from} -> {to}")]
    InvalidTransition {
        from: LoadMoreState,
        to: LoadMoreState,
    },

    // ============================================================================
    // Load-More Errors
    // ============================================================================
    #[error(transparent)]
    LoadMore(#[from] LoadMoreError),

    // ============================================================================
    // Batching Errors
    // ============================================================================
    #[error("Batched request was dropped before completion")]
    BatchCancelled,

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::LoadMore(e) => e.retryable,
            _ => false,
        }
    }
}

/// Result type alias for feedkit
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}
