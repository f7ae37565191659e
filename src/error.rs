//! Error types for the device agent
//!
//! Each layer keeps its own error enum (`ConfigError`, `CertificateError`,
//! `EncodingError`, `MqttError`); [`DeviceError`] is what the activities and
//! the orchestrator hand back to `main`.

use crate::config::ConfigError;
use crate::protocol::EncodingError;
use crate::tls::CertificateError;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for device agent operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("Failed to connect to broker: {0}")]
    Connect(#[source] BoxError),

    #[error("Failed to publish to {topic}: {source}")]
    Publish {
        topic: String,
        #[source]
        source: BoxError,
    },

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Failed to subscribe to {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: BoxError,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl DeviceError {
    pub fn connect<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Connect(Box::new(error))
    }

    pub fn publish<E: std::error::Error + Send + Sync + 'static>(
        topic: impl Into<String>,
        error: E,
    ) -> Self {
        Self::Publish {
            topic: topic.into(),
            source: Box::new(error),
        }
    }

    pub fn subscribe<E: std::error::Error + Send + Sync + 'static>(
        topic: impl Into<String>,
        error: E,
    ) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            source: Box::new(error),
        }
    }
}

/// Result type alias for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
