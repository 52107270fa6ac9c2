//! Error types for incident-intake.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Missing credential: {name}")]
    MissingCredential { name: String },

    // Collaborator errors
    #[error("{service} failed: {message}")]
    UpstreamServiceFailure { service: String, message: String },

    // Lifecycle errors
    #[error("Malformed extraction response: {message}")]
    MalformedExtractionResponse { message: String },

    #[error("Incident registry submission failed: {message}")]
    RegistrySubmissionFailure {
        status: Option<u16>,
        message: String,
    },

    // Pipeline plumbing
    #[error("Pipeline error: {message}")]
    Pipeline { message: String },

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl IntakeError {
    /// Shorthand for a failed dialogue, synthesis or completion call.
    pub fn upstream(service: &str, message: impl Into<String>) -> Self {
        IntakeError::UpstreamServiceFailure {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, IntakeError>;
