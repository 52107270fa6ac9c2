//! incident-intake - Emergency call intake over a streaming voice pipeline
//!
//! Conducts a spoken intake dialogue, detects when it is over, extracts a
//! structured incident record from the transcript and reports it.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod config;
pub mod defaults;
pub mod error;
pub mod extraction;
pub mod lifecycle;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod services;
pub mod session;
pub mod transcript;

// Composition root
pub use session::{CallReport, CallSession, Collaborators};

// Pipeline
pub use pipeline::{
    AudioSink, ChannelAudioSink, Frame, FrameDirection, OutputEvent, Pipeline, PipelineParams,
    PipelineTask, RunOutcome, SessionSummary, TaskHandle, TransportEvent, Turn,
};

// Lifecycle and reporting
pub use extraction::{Criticality, IncidentExtractor, IncidentRecord};
pub use lifecycle::{Conclusion, LifecycleController, LifecycleState, Trigger};
pub use registry::{CallerLocation, HttpIncidentRegistry, IncidentRegistry, IncidentSubmission};

// Collaborators
pub use services::{CompletionModel, DialogueModel, SpeechSynthesizer};

// Error handling
pub use error::{IntakeError, Result};

// Config
pub use config::Config;

// Station framework (for custom stations)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
