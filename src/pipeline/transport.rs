//! Transport boundary: lifecycle events in, synthesized audio out.
//!
//! The room transport itself lives outside this crate. It feeds recognized
//! speech through [`TaskHandle::queue_frame`](crate::pipeline::TaskHandle::queue_frame),
//! reports participants on a [`TransportEvent`] channel and plays audio
//! handed to an [`AudioSink`].

use crate::error::{IntakeError, Result};
use crate::pipeline::error::StationError;
use crate::pipeline::frame::{AudioChunk, Frame, FrameDirection};
use crate::pipeline::station::{Outbox, Station};
use tokio::sync::mpsc;

/// Participant lifecycle reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ParticipantJoined {
        participant_id: String,
    },
    ParticipantLeft {
        participant_id: String,
        reason: Option<String>,
    },
}

/// Creates the channel the transport reports participant events on.
pub fn event_channel(capacity: usize) -> (mpsc::Sender<TransportEvent>, mpsc::Receiver<TransportEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Destination for outbound audio.
#[async_trait::async_trait]
pub trait AudioSink: Send + 'static {
    /// Plays or buffers one chunk.
    async fn write(&mut self, chunk: AudioChunk) -> Result<()>;

    /// Drops any audio buffered but not yet played.
    async fn clear(&mut self) {}

    /// Releases the output; no more writes follow.
    async fn close(&mut self) {}
}

/// What a [`ChannelAudioSink`] delivers to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Audio(AudioChunk),
    /// Flush the playback buffer (user interrupted).
    Clear,
}

/// Audio sink that hands chunks to the transport over a bounded channel.
pub struct ChannelAudioSink {
    tx: Option<mpsc::Sender<OutputEvent>>,
}

impl ChannelAudioSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutputEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }
}

#[async_trait::async_trait]
impl AudioSink for ChannelAudioSink {
    async fn write(&mut self, chunk: AudioChunk) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| IntakeError::Pipeline {
            message: "audio output already closed".to_string(),
        })?;
        tx.send(OutputEvent::Audio(chunk))
            .await
            .map_err(|_| IntakeError::Pipeline {
                message: "transport stopped reading audio".to_string(),
            })
    }

    async fn clear(&mut self) {
        if let Some(tx) = &self.tx
            && tx.send(OutputEvent::Clear).await.is_err()
        {
            tracing::debug!("transport gone, nothing to clear");
        }
    }

    async fn close(&mut self) {
        // Dropping the sender ends the transport's receive loop.
        self.tx = None;
    }
}

/// Terminal audio station: consumes `Audio` frames, forwards everything else.
pub struct OutputStation<A: AudioSink> {
    sink: A,
    chunks_written: u64,
}

impl<A: AudioSink> OutputStation<A> {
    pub fn new(sink: A) -> Self {
        Self {
            sink,
            chunks_written: 0,
        }
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }
}

#[async_trait::async_trait]
impl<A: AudioSink> Station for OutputStation<A> {
    async fn process(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        outbox: &mut Outbox,
    ) -> std::result::Result<(), StationError> {
        match (frame, direction) {
            (Frame::Audio(chunk), FrameDirection::Downstream) => {
                self.sink.write(chunk).await?;
                self.chunks_written += 1;
            }
            (frame, direction) => outbox.push(frame, direction),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Output"
    }

    async fn stop(&mut self) {
        tracing::debug!(chunks = self.chunks_written, "audio output closing");
        self.sink.close().await;
    }

    async fn cancel(&mut self) {
        self.sink.clear().await;
        self.sink.close().await;
    }

    async fn interrupted(&mut self) {
        self.sink.clear().await;
    }
}
