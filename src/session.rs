//! One call, wired end to end.
//!
//! Seeds the transcript with the system instruction, builds the chain
//! `user aggregator → dialogue → synthesis → output → assistant aggregator →
//! conversation` and runs it until the call ends.

use crate::config::{Config, SessionConfig};
use crate::error::Result;
use crate::extraction::IncidentExtractor;
use crate::lifecycle::{CallContext, Conclusion, ConversationStation, LifecycleController};
use crate::pipeline::{
    AssistantAggregator, AudioSink, DialogueStation, ErrorReporter, LogReporter, OutputStation,
    Pipeline, PipelineParams, PipelineTask, SessionSummary, SynthesisStation, TaskHandle,
    TransportEvent, Turn, UserAggregator,
};
use crate::registry::{CallerLocation, HttpIncidentRegistry, IncidentRegistry};
use crate::services::{CompletionModel, DialogueModel, GeminiClient, SpeechSynthesizer};
use crate::transcript::Transcript;
use std::sync::Arc;
use tokio::sync::mpsc;

impl From<&SessionConfig> for CallerLocation {
    fn from(session: &SessionConfig) -> Self {
        Self {
            latitude: session.latitude,
            longitude: session.longitude,
        }
    }
}

/// External services one call talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub dialogue: Arc<dyn DialogueModel>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub completion: Arc<dyn CompletionModel>,
    pub registry: Arc<dyn IncidentRegistry>,
}

impl Collaborators {
    /// HTTP clients for every service named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            dialogue: Arc::new(GeminiClient::dialogue(&config.services)?),
            synthesizer: speech_synthesizer(config)?,
            completion: Arc::new(GeminiClient::extraction(&config.services)?),
            registry: Arc::new(HttpIncidentRegistry::from_config(&config.registry)?),
        })
    }
}

#[cfg(feature = "elevenlabs")]
fn speech_synthesizer(config: &Config) -> Result<Arc<dyn SpeechSynthesizer>> {
    Ok(Arc::new(crate::services::ElevenLabsSynthesizer::from_services(
        &config.services,
    )?))
}

#[cfg(not(feature = "elevenlabs"))]
fn speech_synthesizer(_config: &Config) -> Result<Arc<dyn SpeechSynthesizer>> {
    Err(crate::error::IntakeError::Other(
        "no speech synthesizer built in (enable the `elevenlabs` feature)".to_string(),
    ))
}

/// What a finished call produced.
#[derive(Debug, Clone)]
pub struct CallReport {
    pub summary: SessionSummary,
    /// `None` when the call was cancelled before any end trigger fired.
    pub conclusion: Option<Conclusion>,
    pub transcript: Vec<Turn>,
}

/// A single call, ready to run.
pub struct CallSession {
    task: PipelineTask,
    controller: Arc<LifecycleController>,
    transcript: Transcript,
}

impl CallSession {
    pub fn new<A: AudioSink>(
        config: &Config,
        collaborators: Collaborators,
        sink: A,
        location: CallerLocation,
    ) -> Self {
        Self::with_error_reporter(config, collaborators, sink, location, Arc::new(LogReporter))
    }

    pub fn with_error_reporter<A: AudioSink>(
        config: &Config,
        collaborators: Collaborators,
        sink: A,
        location: CallerLocation,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let transcript = Transcript::with_system(config.session.system_instruction.as_str());

        let controller = Arc::new(
            LifecycleController::new(
                CallContext::new(transcript.clone(), location),
                IncidentExtractor::new(collaborators.completion),
                collaborators.registry,
            )
            .with_error_reporter(reporter.clone()),
        );

        let pipeline = Pipeline::new()
            .with_station(UserAggregator::new(transcript.clone()))
            .with_station(DialogueStation::new(collaborators.dialogue))
            .with_station(SynthesisStation::new(collaborators.synthesizer))
            .with_station(OutputStation::new(sink))
            .with_station(AssistantAggregator::new(transcript.clone()))
            .with_station(ConversationStation::new(controller.clone()));

        let params = PipelineParams::default()
            .with_interruptions(config.pipeline.allow_interruptions)
            .with_channel_capacity(config.pipeline.channel_capacity);

        let task = PipelineTask::new(pipeline, params)
            .with_error_reporter(reporter)
            .with_lifecycle(controller.clone())
            .with_transcript(transcript.clone());

        Self {
            task,
            controller,
            transcript,
        }
    }

    /// Handle for queuing transcriptions and stopping the call.
    pub fn handle(&self) -> TaskHandle {
        self.task.handle()
    }

    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }

    pub fn controller(&self) -> Arc<LifecycleController> {
        self.controller.clone()
    }

    /// Runs the call to completion.
    pub async fn run(self, events: mpsc::Receiver<TransportEvent>) -> Result<CallReport> {
        tracing::info!(version = %crate::version_string(), "call session starting");
        let summary = self.task.run(events).await?;
        let conclusion = self.controller.outcome();
        match &conclusion {
            Some(Conclusion::Reported { record, receipt }) => tracing::info!(
                criticality = %record.criticality,
                status = receipt.status,
                "call concluded"
            ),
            Some(Conclusion::Failed { error, .. }) => {
                tracing::warn!(error = %error, "call concluded without a report")
            }
            None => tracing::info!(outcome = ?summary.outcome, "call ended before conclusion"),
        }
        Ok(CallReport {
            summary,
            conclusion,
            transcript: self.transcript.snapshot(),
        })
    }
}
