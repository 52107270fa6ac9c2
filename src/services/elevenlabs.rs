//! ElevenLabs text-to-speech client.

use crate::config::ServicesConfig;
use crate::defaults;
use crate::error::{IntakeError, Result};
use crate::pipeline::frame::AudioChunk;
use crate::services::{SpeechSynthesizer, request_failed, status_failed};
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Duration;

const SERVICE: &str = "synthesis";
const MODEL_ID: &str = "eleven_turbo_v2";

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// Streams PCM speech for one voice.
#[derive(Debug, Clone)]
pub struct ElevenLabsSynthesizer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    voice_id: String,
    sample_rate: u32,
}

impl ElevenLabsSynthesizer {
    pub fn new(api_key: &str, voice_id: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntakeError::upstream(SERVICE, format!("client setup failed: {e}")))?;
        Ok(Self {
            http,
            base_url: defaults::ELEVENLABS_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            voice_id: voice_id.to_string(),
            sample_rate: defaults::SYNTHESIS_SAMPLE_RATE,
        })
    }

    pub fn from_services(services: &ServicesConfig) -> Result<Self> {
        let api_key = services.elevenlabs_api_key.as_deref().ok_or_else(|| {
            IntakeError::MissingCredential {
                name: "ELEVENLABS_API_KEY".to_string(),
            }
        })?;
        Ok(Self::new(
            api_key,
            &services.voice_id,
            Duration::from_secs(services.timeout_secs),
        )?
        .with_base_url(&services.elevenlabs_base_url))
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}?output_format=pcm_{}",
            self.base_url, self.voice_id, self.sample_rate
        )
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<AudioChunk>> {
        let response = self
            .http
            .post(self.endpoint())
            .header("xi-api-key", &self.api_key)
            .json(&SpeechRequest {
                text,
                model_id: MODEL_ID,
            })
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(status_failed(SERVICE, response).await);
        }

        let mut framer = Framer::new(defaults::AUDIO_FRAME_BYTES, self.sample_rate);
        let mut chunks = Vec::new();
        let mut body = response.bytes_stream();
        while let Some(bytes) = body.next().await {
            let bytes = bytes.map_err(|e| request_failed(SERVICE, e))?;
            chunks.extend(framer.push(&bytes));
        }
        chunks.extend(framer.finish());

        tracing::debug!(chunks = chunks.len(), chars = text.len(), "speech synthesized");
        Ok(chunks)
    }
}

/// Regroups an arbitrary byte stream into fixed-size PCM frames.
struct Framer {
    pending: Vec<u8>,
    frame_bytes: usize,
    sample_rate: u32,
}

impl Framer {
    fn new(frame_bytes: usize, sample_rate: u32) -> Self {
        Self {
            pending: Vec::with_capacity(frame_bytes),
            frame_bytes,
            sample_rate,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<AudioChunk> {
        self.pending.extend_from_slice(bytes);
        let whole = self.pending.len() / self.frame_bytes * self.frame_bytes;
        let rest = self.pending.split_off(whole);
        let ready = std::mem::replace(&mut self.pending, rest);
        ready
            .chunks(self.frame_bytes)
            .map(|frame| AudioChunk::new(frame.to_vec(), self.sample_rate))
            .collect()
    }

    /// Flushes the tail, dropping a dangling odd byte.
    fn finish(mut self) -> Option<AudioChunk> {
        let even = self.pending.len() & !1;
        self.pending.truncate(even);
        (!self.pending.is_empty()).then(|| AudioChunk::new(self.pending, self.sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_framer_regroups_stream() {
        let mut framer = Framer::new(4, 16000);
        assert!(framer.push(&[1, 2, 3]).is_empty());
        let frames = framer.push(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, vec![1, 2, 3, 4]);
        assert_eq!(frames[1].data, vec![5, 6, 7, 8]);

        // [9] is half a sample
        assert!(framer.finish().is_none());
    }

    #[test]
    fn test_framer_tail_keeps_whole_samples() {
        let mut framer = Framer::new(8, 16000);
        framer.push(&[1, 2, 3]);
        assert_eq!(framer.finish().unwrap().data, vec![1, 2]);

        let framer = Framer::new(8, 16000);
        assert!(framer.finish().is_none());
    }

    #[tokio::test]
    async fn test_synthesize_streams_pcm_frames() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/text-to-speech/voice-1"))
            .and(query_param("output_format", "pcm_16000"))
            .and(header("xi-api-key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1600]))
            .expect(1)
            .mount(&server)
            .await;

        let synth = ElevenLabsSynthesizer::new("key", "voice-1", Duration::from_secs(5))
            .unwrap()
            .with_base_url(&server.uri());
        let chunks = synth.synthesize("Help is on the way.").await.unwrap();

        // 1600 bytes = two full 640-byte frames + 320-byte tail
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].data.len(), defaults::AUDIO_FRAME_BYTES);
        assert_eq!(chunks[2].data.len(), 320);
        assert!(chunks.iter().all(|c| c.sample_rate == 16000));
    }

    #[tokio::test]
    async fn test_synthesis_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let synth = ElevenLabsSynthesizer::new("key", "voice-1", Duration::from_secs(5))
            .unwrap()
            .with_base_url(&server.uri());
        let result = synth.synthesize("x").await;
        assert!(matches!(
            result,
            Err(IntakeError::UpstreamServiceFailure { .. })
        ));
    }

    #[test]
    fn test_missing_key_is_reported() {
        assert!(matches!(
            ElevenLabsSynthesizer::from_services(&ServicesConfig::default()),
            Err(IntakeError::MissingCredential { .. })
        ));
    }
}
