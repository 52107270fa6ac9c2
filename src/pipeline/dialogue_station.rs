//! Dialogue station: turns the conversation so far into the next reply.

use crate::pipeline::error::StationError;
use crate::pipeline::frame::{Frame, FrameDirection};
use crate::pipeline::station::{Outbox, Station};
use crate::services::DialogueModel;
use std::sync::Arc;
use std::time::Instant;

/// Consumes `DialogueTurns` and emits one `AssistantText` per reply.
///
/// Interruptible: a newer user turn drops the in-flight request.
pub struct DialogueStation {
    model: Arc<dyn DialogueModel>,
}

impl DialogueStation {
    pub fn new(model: Arc<dyn DialogueModel>) -> Self {
        Self { model }
    }
}

#[async_trait::async_trait]
impl Station for DialogueStation {
    async fn process(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        outbox: &mut Outbox,
    ) -> Result<(), StationError> {
        let turns = match (frame, direction) {
            (Frame::DialogueTurns(turns), FrameDirection::Downstream) => turns,
            (frame, direction) => {
                outbox.push(frame, direction);
                return Ok(());
            }
        };

        let started = Instant::now();
        let reply = self.model.respond(&turns).await?;
        tracing::debug!(
            turns = turns.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dialogue reply"
        );

        if !reply.trim().is_empty() {
            outbox.push(
                Frame::AssistantText {
                    text: reply.trim().to_string(),
                },
                FrameDirection::Downstream,
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Dialogue"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame::Turn;
    use crate::services::MockDialogue;

    #[tokio::test]
    async fn test_reply_replaces_turns() {
        let model = Arc::new(MockDialogue::new().with_reply(" Emergency response, how can I help? "));
        let mut station = DialogueStation::new(model.clone());
        let mut outbox = Outbox::new();
        let turns = vec![Turn::system("sys")];

        station
            .process(
                Frame::DialogueTurns(turns.clone()),
                FrameDirection::Downstream,
                &mut outbox,
            )
            .await
            .unwrap();

        assert_eq!(
            outbox.frames(),
            &[(
                Frame::AssistantText {
                    text: "Emergency response, how can I help?".into()
                },
                FrameDirection::Downstream
            )]
        );
        assert_eq!(model.calls(), vec![turns]);
    }

    #[tokio::test]
    async fn test_model_failure_drops_frame() {
        let mut station = DialogueStation::new(Arc::new(MockDialogue::new().with_failure()));
        let mut outbox = Outbox::new();

        let result = station
            .process(
                Frame::DialogueTurns(vec![Turn::user("help")]),
                FrameDirection::Downstream,
                &mut outbox,
            )
            .await;

        match result {
            Err(StationError::Recoverable(message)) => assert!(message.contains("dialogue")),
            other => panic!("expected recoverable error, got {other:?}"),
        }
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn test_other_frames_pass_through() {
        let mut station = DialogueStation::new(Arc::new(MockDialogue::new()));
        let mut outbox = Outbox::new();
        station
            .process(Frame::Start, FrameDirection::Downstream, &mut outbox)
            .await
            .unwrap();
        assert_eq!(outbox.frames(), &[(Frame::Start, FrameDirection::Downstream)]);
    }

    #[tokio::test]
    async fn test_blank_reply_is_not_forwarded() {
        let mut station = DialogueStation::new(Arc::new(MockDialogue::new().with_reply("  ")));
        let mut outbox = Outbox::new();
        station
            .process(
                Frame::DialogueTurns(vec![Turn::user("hi")]),
                FrameDirection::Downstream,
                &mut outbox,
            )
            .await
            .unwrap();
        assert!(outbox.is_empty());
    }
}
