//! Conversation lifecycle: detects the end of a call and reports it once.
//!
//! The controller moves `Active → Ending → Ended`. Three triggers compete
//! for the first transition: the `<END>` sentinel in an assistant turn, the
//! participant leaving, and an `End` frame reaching the tail of the chain.
//! Whichever wins the claim seals the transcript; the others become no-ops
//! that wait for the same conclusion.

use crate::defaults;
use crate::error::IntakeError;
use crate::extraction::{IncidentExtractor, IncidentRecord, render_transcript};
use crate::pipeline::error::{ErrorReporter, LogReporter, StationError};
use crate::pipeline::frame::{Frame, FrameDirection, Role, Turn};
use crate::pipeline::station::{Outbox, Station};
use crate::registry::{CallerLocation, IncidentRegistry, IncidentSubmission, RegistryReceipt};
use crate::transcript::Transcript;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Active = 0,
    Ending = 1,
    Ended = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Active,
            1 => LifecycleState::Ending,
            _ => LifecycleState::Ended,
        }
    }
}

/// What ended the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The assistant's last turn carried the end sentinel.
    Sentinel,
    /// The transport reported the caller gone.
    ParticipantLeft,
    /// An `End` frame reached the controller.
    EndFrame,
}

/// Recorded result of concluding a call.
#[derive(Debug, Clone)]
pub enum Conclusion {
    Reported {
        record: IncidentRecord,
        receipt: RegistryReceipt,
    },
    /// `record` is present when extraction succeeded but submission did not.
    Failed {
        record: Option<IncidentRecord>,
        error: Arc<IntakeError>,
    },
}

impl Conclusion {
    pub fn is_reported(&self) -> bool {
        matches!(self, Conclusion::Reported { .. })
    }

    pub fn record(&self) -> Option<&IncidentRecord> {
        match self {
            Conclusion::Reported { record, .. } => Some(record),
            Conclusion::Failed { record, .. } => record.as_ref(),
        }
    }

    pub fn error(&self) -> Option<&IntakeError> {
        match self {
            Conclusion::Reported { .. } => None,
            Conclusion::Failed { error, .. } => Some(error),
        }
    }
}

/// Per-call state the controller reads when concluding.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub transcript: Transcript,
    pub location: CallerLocation,
}

impl CallContext {
    pub fn new(transcript: Transcript, location: CallerLocation) -> Self {
        Self {
            transcript,
            location,
        }
    }
}

/// Returns true if the last turn is the assistant's and carries the sentinel.
pub fn ends_conversation(turns: &[Turn]) -> bool {
    turns.last().is_some_and(|turn| {
        turn.role == Role::Assistant && turn.content.contains(defaults::END_SENTINEL)
    })
}

pub struct LifecycleController {
    context: CallContext,
    extractor: IncidentExtractor,
    registry: Arc<dyn IncidentRegistry>,
    reporter: Arc<dyn ErrorReporter>,
    state: AtomicU8,
    trigger: OnceLock<Trigger>,
    outcome: OnceLock<Conclusion>,
    finishing: Mutex<()>,
}

impl LifecycleController {
    pub fn new(
        context: CallContext,
        extractor: IncidentExtractor,
        registry: Arc<dyn IncidentRegistry>,
    ) -> Self {
        Self {
            context,
            extractor,
            registry,
            reporter: Arc::new(LogReporter),
            state: AtomicU8::new(LifecycleState::Active as u8),
            trigger: OnceLock::new(),
            outcome: OnceLock::new(),
            finishing: Mutex::new(()),
        }
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The trigger that won the claim, if any.
    pub fn trigger(&self) -> Option<Trigger> {
        self.trigger.get().copied()
    }

    /// The recorded conclusion once the state is `Ended`.
    pub fn outcome(&self) -> Option<Conclusion> {
        self.outcome.get().cloned()
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// Attempts the `Active → Ending` transition. Only one caller ever wins;
    /// the winner seals the transcript.
    pub fn claim(&self, trigger: Trigger) -> bool {
        let won = self
            .state
            .compare_exchange(
                LifecycleState::Active as u8,
                LifecycleState::Ending as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            if self.trigger.set(trigger).is_err() {
                tracing::debug!("trigger already recorded");
            }
            self.context.transcript.seal();
            tracing::info!(?trigger, "conversation ended");
        } else {
            tracing::debug!(?trigger, state = ?self.state(), "conversation already ending");
        }
        won
    }

    /// Runs extraction and reporting for a claimed conversation.
    ///
    /// Idempotent: later callers wait for the first run and return without
    /// repeating it. Does nothing while the conversation is still active.
    pub async fn finish(&self) {
        let _guard = self.finishing.lock().await;
        if self.outcome.get().is_some() || self.state() == LifecycleState::Active {
            return;
        }

        let conclusion = self.report().await;
        if let Some(error) = conclusion.error() {
            tracing::error!(error = %error, "incident was not reported");
            self.reporter
                .report("Lifecycle", &StationError::Recoverable(error.to_string()));
        }
        if self.outcome.set(conclusion).is_err() {
            tracing::debug!("conclusion already recorded");
        }
        self.state
            .store(LifecycleState::Ended as u8, Ordering::Release);
    }

    /// Claims with `trigger` and waits for the conclusion. Returns true if
    /// this trigger won the claim.
    pub async fn conclude(&self, trigger: Trigger) -> bool {
        let won = self.claim(trigger);
        self.finish().await;
        won
    }

    /// Disconnect trigger, invoked by the pipeline task.
    pub async fn participant_left(&self) -> bool {
        self.conclude(Trigger::ParticipantLeft).await
    }

    async fn report(&self) -> Conclusion {
        let turns = self.context.transcript.snapshot();
        let rendered = render_transcript(&turns);
        tracing::debug!(turns = turns.len().saturating_sub(1), "extracting incident");

        let record = match self.extractor.extract(&rendered).await {
            Ok(record) => record,
            Err(error) => {
                return Conclusion::Failed {
                    record: None,
                    error: Arc::new(error),
                };
            }
        };

        let submission = IncidentSubmission::new(&record, self.context.location, &rendered);
        match self.registry.register(&submission).await {
            Ok(receipt) => Conclusion::Reported { record, receipt },
            Err(error) => Conclusion::Failed {
                record: Some(record),
                error: Arc::new(error),
            },
        }
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("state", &self.state())
            .field("trigger", &self.trigger())
            .field("location", &self.context.location)
            .finish_non_exhaustive()
    }
}

/// Tail station that watches the committed conversation.
///
/// Every frame is forwarded unchanged.
pub struct ConversationStation {
    controller: Arc<LifecycleController>,
}

impl ConversationStation {
    pub fn new(controller: Arc<LifecycleController>) -> Self {
        Self { controller }
    }
}

#[async_trait::async_trait]
impl Station for ConversationStation {
    async fn process(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        outbox: &mut Outbox,
    ) -> Result<(), StationError> {
        match (&frame, direction) {
            (Frame::DialogueTurns(turns), FrameDirection::Downstream) => {
                if let Some(last) = turns.last() {
                    tracing::debug!(role = %last.role, content = %last.content, "turn committed");
                }
                if ends_conversation(turns) && self.controller.claim(Trigger::Sentinel) {
                    // Teardown starts now; the report runs alongside it and
                    // the End frame waits for it on its way out.
                    outbox.push_to_task(Frame::End);
                    let controller = self.controller.clone();
                    tokio::spawn(async move { controller.finish().await });
                }
            }
            (Frame::End, FrameDirection::Downstream) => {
                self.controller.conclude(Trigger::EndFrame).await;
            }
            _ => {}
        }
        outbox.push(frame, direction);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Conversation"
    }

    fn interruptible(&self) -> bool {
        false
    }

    async fn cancel(&mut self) {
        // A claimed conversation still gets reported on cancel.
        self.controller.finish().await;
    }
}
