//! Error Handling Module
//!
//! Defines the error type shared by every stage of the diagnostic pipeline.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for diagnosis operations
#[derive(Error, Debug)]
pub enum DiagnosisError {
    /// Image bytes could not be decoded into a color image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Label map, model config or application config is malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Model artifact could not be loaded or does not match the label map
    #[error("Model error: {0}")]
    Model(String),

    /// Forward pass failed or produced an unusable output
    #[error("Inference error: {0}")]
    Inference(String),

    /// Treatment advisor gateway failure
    #[error("Advisor error: {0}")]
    Advisor(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl DiagnosisError {
    /// Whether the error was caused by the request payload rather than the service.
    ///
    /// Client errors abort the single request; everything else is an
    /// infrastructure or startup problem.
    pub fn is_client_error(&self) -> bool {
        matches!(self, DiagnosisError::InvalidImage(_))
    }
}

impl From<serde_json::Error> for DiagnosisError {
    fn from(err: serde_json::Error) -> Self {
        DiagnosisError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for DiagnosisError {
    fn from(err: image::ImageError) -> Self {
        DiagnosisError::InvalidImage(err.to_string())
    }
}

impl From<reqwest::Error> for DiagnosisError {
    fn from(err: reqwest::Error) -> Self {
        // request URLs never reach messages or logs
        DiagnosisError::Advisor(err.without_url().to_string())
    }
}

/// Convenience Result type for diagnosis operations
pub type Result<T> = std::result::Result<T, DiagnosisError>;

/// Extension trait for turning foreign errors into configuration errors with context
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| DiagnosisError::Configuration(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| DiagnosisError::Configuration(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| DiagnosisError::Configuration(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| DiagnosisError::Configuration(f()))
    }
}
