//! Synthesis station: speaks assistant replies.

use crate::defaults;
use crate::pipeline::error::StationError;
use crate::pipeline::frame::{Frame, FrameDirection};
use crate::pipeline::station::{Outbox, Station};
use crate::services::SpeechSynthesizer;
use std::sync::Arc;

/// Emits `Audio` for each `AssistantText`, then forwards the text so the
/// assistant aggregator can record it.
///
/// The end sentinel is stripped from what is spoken, never from the text
/// that travels on.
pub struct SynthesisStation {
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl SynthesisStation {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { synthesizer }
    }
}

/// Text to speak for `reply`, without the end sentinel.
pub fn speakable(reply: &str) -> String {
    reply.replace(defaults::END_SENTINEL, "").trim().to_string()
}

#[async_trait::async_trait]
impl Station for SynthesisStation {
    async fn process(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        outbox: &mut Outbox,
    ) -> Result<(), StationError> {
        let text = match (frame, direction) {
            (Frame::AssistantText { text }, FrameDirection::Downstream) => text,
            (frame, direction) => {
                outbox.push(frame, direction);
                return Ok(());
            }
        };

        let spoken = speakable(&text);
        let result = if spoken.is_empty() {
            Ok(Vec::new())
        } else {
            self.synthesizer.synthesize(&spoken).await
        };

        let outcome = match result {
            Ok(chunks) => {
                tracing::debug!(chunks = chunks.len(), "reply synthesized");
                for chunk in chunks {
                    outbox.push(Frame::Audio(chunk), FrameDirection::Downstream);
                }
                Ok(())
            }
            Err(e) => Err(StationError::from(e)),
        };

        // The reply was produced either way; keep it in the conversation.
        outbox.push(Frame::AssistantText { text }, FrameDirection::Downstream);
        outcome
    }

    fn name(&self) -> &'static str {
        "Synthesis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockSynthesizer;

    fn reply(text: &str) -> Frame {
        Frame::AssistantText {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_speakable_strips_sentinel() {
        assert_eq!(speakable("Help is on the way. <END>"), "Help is on the way.");
        assert_eq!(speakable("<END>"), "");
        assert_eq!(speakable("How many people?"), "How many people?");
    }

    #[tokio::test]
    async fn test_audio_precedes_text() {
        let synth = Arc::new(MockSynthesizer::new().with_chunks(2));
        let mut station = SynthesisStation::new(synth.clone());
        let mut outbox = Outbox::new();

        station
            .process(reply("Stay calm. <END>"), FrameDirection::Downstream, &mut outbox)
            .await
            .unwrap();

        let kinds: Vec<&str> = outbox.frames().iter().map(|(f, _)| f.kind()).collect();
        assert_eq!(kinds, vec!["Audio", "Audio", "AssistantText"]);
        assert_eq!(outbox.frames()[2].0, reply("Stay calm. <END>"));
        assert_eq!(synth.texts(), vec!["Stay calm.".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_still_forwards_text() {
        let mut station = SynthesisStation::new(Arc::new(MockSynthesizer::new().with_failure()));
        let mut outbox = Outbox::new();

        let result = station
            .process(reply("Hello"), FrameDirection::Downstream, &mut outbox)
            .await;

        assert!(matches!(result, Err(StationError::Recoverable(_))));
        assert_eq!(
            outbox.frames(),
            &[(reply("Hello"), FrameDirection::Downstream)]
        );
    }

    #[tokio::test]
    async fn test_sentinel_only_reply_is_silent() {
        let synth = Arc::new(MockSynthesizer::new());
        let mut station = SynthesisStation::new(synth.clone());
        let mut outbox = Outbox::new();

        station
            .process(reply("<END>"), FrameDirection::Downstream, &mut outbox)
            .await
            .unwrap();

        assert!(synth.texts().is_empty());
        assert_eq!(outbox.frames().len(), 1);
    }
}
