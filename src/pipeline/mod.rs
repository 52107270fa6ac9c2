//! Streaming call pipeline.
//!
//! Every station runs on its own tokio task, connected to its neighbours by
//! bounded channels in both directions. Frames flow downstream from the
//! transport input to the audio output and upstream back to the task.

pub mod aggregator;
pub mod dialogue_station;
pub mod error;
pub mod frame;
pub mod orchestrator;
pub mod station;
pub mod synthesis_station;
pub mod transport;

pub use aggregator::{AssistantAggregator, UserAggregator};
pub use dialogue_station::DialogueStation;
pub use error::{ErrorReporter, LogReporter, StationError};
pub use frame::{AudioChunk, Frame, FrameDirection, Role, Turn};
pub use orchestrator::{
    Pipeline, PipelineParams, PipelineTask, RunOutcome, SessionSummary, TaskHandle,
};
pub use station::{Interrupter, Outbox, Station, StationRunner};
pub use synthesis_station::SynthesisStation;
pub use transport::{
    AudioSink, ChannelAudioSink, OutputEvent, OutputStation, TransportEvent, event_channel,
};
