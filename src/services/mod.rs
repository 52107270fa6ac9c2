//! Collaborator seams: dialogue, one-shot completion and speech synthesis.
//!
//! Each trait has an HTTP-backed implementation in a submodule and a mock
//! for tests and offline runs.

pub mod gemini;

#[cfg(feature = "elevenlabs")]
pub mod elevenlabs;

pub use gemini::GeminiClient;

#[cfg(feature = "elevenlabs")]
pub use elevenlabs::ElevenLabsSynthesizer;

use crate::error::{IntakeError, Result};
use crate::pipeline::frame::{AudioChunk, Turn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Produces the assistant's next reply from the conversation so far.
#[async_trait::async_trait]
pub trait DialogueModel: Send + Sync {
    /// `turns` is the whole transcript, system instruction first.
    async fn respond(&self, turns: &[Turn]) -> Result<String>;
}

/// One-shot text completion used for extraction.
#[async_trait::async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Converts assistant text to audio.
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<AudioChunk>>;
}

#[async_trait::async_trait]
impl<T: DialogueModel + ?Sized> DialogueModel for Arc<T> {
    async fn respond(&self, turns: &[Turn]) -> Result<String> {
        (**self).respond(turns).await
    }
}

#[async_trait::async_trait]
impl<T: CompletionModel + ?Sized> CompletionModel for Arc<T> {
    async fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt).await
    }
}

#[async_trait::async_trait]
impl<T: SpeechSynthesizer + ?Sized> SpeechSynthesizer for Arc<T> {
    async fn synthesize(&self, text: &str) -> Result<Vec<AudioChunk>> {
        (**self).synthesize(text).await
    }
}

/// Scripted dialogue model for testing.
///
/// Replies are handed out in order; once the script runs out the last reply
/// repeats.
#[derive(Debug, Clone, Default)]
pub struct MockDialogue {
    replies: Arc<Mutex<VecDeque<String>>>,
    last: Arc<Mutex<Option<String>>>,
    calls: Arc<Mutex<Vec<Vec<Turn>>>>,
    delay: Option<Duration>,
    should_fail: bool,
}

impl MockDialogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a reply to the script.
    pub fn with_reply(self, reply: &str) -> Self {
        lock(&self.replies).push_back(reply.to_string());
        self
    }

    /// Sleeps before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Configure the mock to fail on respond.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Transcripts passed to `respond`, in call order.
    pub fn calls(&self) -> Vec<Vec<Turn>> {
        lock(&self.calls).clone()
    }
}

#[async_trait::async_trait]
impl DialogueModel for MockDialogue {
    async fn respond(&self, turns: &[Turn]) -> Result<String> {
        lock(&self.calls).push(turns.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(IntakeError::upstream("dialogue", "mock dialogue failure"));
        }
        let next = lock(&self.replies).pop_front();
        let mut last = lock(&self.last);
        if let Some(reply) = next {
            *last = Some(reply);
        }
        Ok(last.clone().unwrap_or_default())
    }
}

/// Completion model returning a fixed response.
#[derive(Debug, Clone)]
pub struct MockCompletion {
    response: String,
    prompts: Arc<Mutex<Vec<String>>>,
    should_fail: bool,
}

impl MockCompletion {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            prompts: Arc::default(),
            should_fail: false,
        }
    }

    /// Configure the mock to fail on complete.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

#[async_trait::async_trait]
impl CompletionModel for MockCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        lock(&self.prompts).push(prompt.to_string());
        if self.should_fail {
            Err(IntakeError::upstream("extraction", "mock completion failure"))
        } else {
            Ok(self.response.clone())
        }
    }
}

/// Synthesizer producing one silent chunk per call.
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    texts: Arc<Mutex<Vec<String>>>,
    chunks_per_call: usize,
    delay: Option<Duration>,
    should_fail: bool,
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self {
            texts: Arc::default(),
            chunks_per_call: 1,
            delay: None,
            should_fail: false,
        }
    }
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks(mut self, chunks_per_call: usize) -> Self {
        self.chunks_per_call = chunks_per_call;
        self
    }

    /// Sleeps before returning audio.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Configure the mock to fail on synthesize.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Texts that finished synthesis.
    pub fn texts(&self) -> Vec<String> {
        lock(&self.texts).clone()
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<AudioChunk>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(IntakeError::upstream("synthesis", "mock synthesis failure"));
        }
        lock(&self.texts).push(text.to_string());
        let chunk = AudioChunk::new(
            vec![0; crate::defaults::AUDIO_FRAME_BYTES],
            crate::defaults::SYNTHESIS_SAMPLE_RATE,
        );
        Ok(vec![chunk; self.chunks_per_call])
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Maps a reqwest failure to an upstream service error.
pub(crate) fn request_failed(service: &str, error: reqwest::Error) -> IntakeError {
    if error.is_timeout() {
        IntakeError::upstream(service, format!("request timed out: {error}"))
    } else {
        IntakeError::upstream(service, format!("request failed: {error}"))
    }
}

/// Reads a non-2xx response into an upstream service error.
pub(crate) async fn status_failed(service: &str, response: reqwest::Response) -> IntakeError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    IntakeError::upstream(service, format!("HTTP {}: {}", status.as_u16(), body.trim()))
}
