//! User and assistant message aggregators.
//!
//! Both append to the shared call transcript and publish the updated
//! conversation as a `DialogueTurns` snapshot. Neither is interruptible:
//! they only ever see committed traffic and must not lose it.

use crate::pipeline::error::StationError;
use crate::pipeline::frame::{Frame, FrameDirection, Turn};
use crate::pipeline::station::{Outbox, Station};
use crate::transcript::Transcript;

/// Records user speech and asks the dialogue model for a reply.
pub struct UserAggregator {
    transcript: Transcript,
}

impl UserAggregator {
    pub fn new(transcript: Transcript) -> Self {
        Self { transcript }
    }
}

#[async_trait::async_trait]
impl Station for UserAggregator {
    async fn process(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        outbox: &mut Outbox,
    ) -> Result<(), StationError> {
        let text = match (frame, direction) {
            (Frame::Transcription { text }, FrameDirection::Downstream) => text,
            (frame, direction) => {
                outbox.push(frame, direction);
                return Ok(());
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let turns = self.transcript.append_and_snapshot(Turn::user(text))?;
        tracing::debug!(chars = text.len(), "user turn recorded");

        // The caller spoke: whatever the assistant was saying is stale.
        outbox.request_interruption();
        outbox.push(Frame::DialogueTurns(turns), FrameDirection::Downstream);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "UserAggregator"
    }

    fn interruptible(&self) -> bool {
        false
    }
}

/// Records what the assistant actually said.
pub struct AssistantAggregator {
    transcript: Transcript,
}

impl AssistantAggregator {
    pub fn new(transcript: Transcript) -> Self {
        Self { transcript }
    }
}

#[async_trait::async_trait]
impl Station for AssistantAggregator {
    async fn process(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        outbox: &mut Outbox,
    ) -> Result<(), StationError> {
        match (frame, direction) {
            (Frame::AssistantText { text }, FrameDirection::Downstream) => {
                if text.trim().is_empty() {
                    return Ok(());
                }
                let turns = self
                    .transcript
                    .append_and_snapshot(Turn::assistant(text.trim()))?;
                tracing::debug!(chars = text.len(), "assistant turn recorded");
                outbox.push(Frame::DialogueTurns(turns), FrameDirection::Downstream);
            }
            (frame, direction) => outbox.push(frame, direction),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "AssistantAggregator"
    }

    fn interruptible(&self) -> bool {
        false
    }
}
