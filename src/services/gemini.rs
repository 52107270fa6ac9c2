//! Gemini `generateContent` client.
//!
//! Serves both the dialogue station (whole transcript in, reply out) and the
//! extraction step (one prompt in, JSON text out).

use crate::config::ServicesConfig;
use crate::error::{IntakeError, Result};
use crate::pipeline::frame::{Role, Turn};
use crate::services::{CompletionModel, DialogueModel, request_failed, status_failed};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SERVICE: &str = "gemini";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

/// HTTP client for one Gemini model.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    json_output: bool,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntakeError::upstream(SERVICE, format!("client setup failed: {e}")))?;
        Ok(Self {
            http,
            base_url: crate::defaults::GEMINI_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            json_output: false,
        })
    }

    /// Dialogue client from the services section.
    pub fn dialogue(services: &ServicesConfig) -> Result<Self> {
        Self::from_services(services, &services.dialogue_model)
    }

    /// Extraction client from the services section; asks for JSON output.
    pub fn extraction(services: &ServicesConfig) -> Result<Self> {
        Ok(Self::from_services(services, &services.extraction_model)?.with_json_output())
    }

    fn from_services(services: &ServicesConfig, model: &str) -> Result<Self> {
        let api_key =
            services
                .google_api_key
                .as_deref()
                .ok_or_else(|| IntakeError::MissingCredential {
                    name: "GOOGLE_AI_API_KEY".to_string(),
                })?;
        Ok(
            Self::new(api_key, model, Duration::from_secs(services.timeout_secs))?
                .with_base_url(&services.gemini_base_url),
        )
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Requests `application/json` responses.
    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        tracing::debug!(model = %self.model, turns = request.contents.len(), "gemini request");
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(status_failed(SERVICE, response).await);
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| IntakeError::upstream(SERVICE, format!("unreadable response: {e}")))?;

        first_text(body).ok_or_else(|| IntakeError::upstream(SERVICE, "response had no text"))
    }
}

/// Text of `candidates[0].content.parts[0]`.
fn first_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .next()
        .map(|part| part.text)
}

/// Maps transcript turns onto Gemini contents.
///
/// System turns become the system instruction and assistant turns use the
/// `model` role. A transcript holding only the instruction is sent as a
/// single user turn so the model opens the call.
fn dialogue_request(turns: &[Turn]) -> GenerateRequest {
    let system: Vec<&str> = turns
        .iter()
        .filter(|t| t.role == Role::System)
        .map(|t| t.content.as_str())
        .collect();
    let contents: Vec<Content> = turns
        .iter()
        .filter_map(|t| match t.role {
            Role::System => None,
            Role::User => Some(Content::text(Some("user"), &t.content)),
            Role::Assistant => Some(Content::text(Some("model"), &t.content)),
        })
        .collect();
    let instruction = system.join("\n");

    if contents.is_empty() {
        return GenerateRequest {
            system_instruction: None,
            contents: vec![Content::text(Some("user"), &instruction)],
            generation_config: None,
        };
    }

    GenerateRequest {
        system_instruction: (!instruction.is_empty()).then(|| Content::text(None, &instruction)),
        contents,
        generation_config: None,
    }
}

#[async_trait::async_trait]
impl DialogueModel for GeminiClient {
    async fn respond(&self, turns: &[Turn]) -> Result<String> {
        let mut request = dialogue_request(turns);
        if self.json_output {
            request.generation_config = Some(GenerationConfig {
                response_mime_type: "application/json",
            });
        }
        self.generate(&request).await
    }
}

#[async_trait::async_trait]
impl CompletionModel for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content::text(Some("user"), prompt)],
            generation_config: self.json_output.then_some(GenerationConfig {
                response_mime_type: "application/json",
            }),
        };
        self.generate(&request).await
    }
}
