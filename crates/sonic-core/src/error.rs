//! Error types for Sonic

use thiserror::Error;

use crate::alerting::NotifyError;

/// Result type alias using Sonic's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Sonic operations
#[derive(Error, Debug)]
pub enum Error {
    /// A metric for one subject is missing or malformed
    #[error("Data error for {subject}: {message}")]
    Data {
        /// Position or alert id
        subject: String,
        /// What was wrong with it
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Notification delivery error
    #[error("Notification error: {0}")]
    Notification(#[from] NotifyError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a data error for a subject
    pub fn data(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Data {
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error only affects a single subject of a cycle
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
