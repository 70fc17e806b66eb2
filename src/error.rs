//! Error types for the vehicle advisor

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for advisor operations
pub type Result<T> = std::result::Result<T, AdvisorError>;

#[derive(Error, Debug)]
pub enum AdvisorError {

    // =============================
    // Session-level taxonomy
    // =============================

    /// A field supplied by the customer could not be parsed. Reprompt.
    #[error("User input error: {0}")]
    UserInput(String),

    /// Classifier, embedding provider or rule source unreachable.
    #[error("External service error: {0}")]
    ExternalService(String),

    /// A recommendation references a vehicle that is gone or unavailable.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Missing or malformed configuration for an integration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =============================
    // Component errors
    // =============================

    #[error("Dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Invalid rule set: {0}")]
    InvalidRuleSet(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for AdvisorError {
    fn from(error: sqlx::Error) -> Self {
        AdvisorError::Database(error.to_string())
    }
}
