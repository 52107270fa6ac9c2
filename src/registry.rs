//! Incident registry: where concluded calls are reported.

use crate::config::RegistryConfig;
use crate::defaults;
use crate::error::{IntakeError, Result};
use crate::extraction::{Criticality, IncidentRecord};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Caller position reported with every incident.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallerLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for CallerLocation {
    fn default() -> Self {
        Self {
            latitude: defaults::DEFAULT_LATITUDE,
            longitude: defaults::DEFAULT_LONGITUDE,
        }
    }
}

/// JSON body posted to the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentSubmission {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub criticality: Criticality,
    pub transcript: String,
    pub status: &'static str,
    #[serde(rename = "type")]
    pub incident_type: String,
    pub impact: String,
}

impl IncidentSubmission {
    /// A new open incident.
    pub fn new(record: &IncidentRecord, location: CallerLocation, transcript: &str) -> Self {
        Self {
            name: record.name.clone(),
            lat: location.latitude,
            lng: location.longitude,
            criticality: record.criticality,
            transcript: transcript.to_string(),
            status: defaults::OPEN_STATUS,
            incident_type: record.incident_type.clone(),
            impact: record.impact.clone(),
        }
    }
}

/// What the registry answered.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryReceipt {
    pub status: u16,
    /// Response body, parsed as JSON when possible.
    pub body: serde_json::Value,
}

#[async_trait::async_trait]
pub trait IncidentRegistry: Send + Sync {
    async fn register(&self, submission: &IncidentSubmission) -> Result<RegistryReceipt>;
}

/// Registry reached over HTTP at `{base_url}/api/incidents/register`.
#[derive(Debug, Clone)]
pub struct HttpIncidentRegistry {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpIncidentRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IntakeError::RegistrySubmissionFailure {
                status: None,
                message: format!("client setup failed: {e}"),
            })?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}{}",
                base_url.trim_end_matches('/'),
                defaults::REGISTRY_PATH
            ),
        })
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        let base_url =
            config
                .base_url
                .as_deref()
                .ok_or_else(|| IntakeError::ConfigInvalidValue {
                    key: "registry.base_url".to_string(),
                    message: "API_SERVER_URL is not set".to_string(),
                })?;
        Self::new(base_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl IncidentRegistry for HttpIncidentRegistry {
    async fn register(&self, submission: &IncidentSubmission) -> Result<RegistryReceipt> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(submission)
            .send()
            .await
            .map_err(|e| IntakeError::RegistrySubmissionFailure {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(IntakeError::RegistrySubmissionFailure {
                status: Some(status.as_u16()),
                message: format!("HTTP {}: {}", status.as_u16(), text.trim()),
            });
        }

        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
        tracing::info!(status = status.as_u16(), "incident registered");
        Ok(RegistryReceipt {
            status: status.as_u16(),
            body,
        })
    }
}

/// In-memory registry for testing.
#[derive(Debug, Clone, Default)]
pub struct MockRegistry {
    submissions: Arc<Mutex<Vec<IncidentSubmission>>>,
    fail_status: Option<u16>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to reject every submission with `status`.
    pub fn with_failure(mut self, status: u16) -> Self {
        self.fail_status = Some(status);
        self
    }

    pub fn submissions(&self) -> Vec<IncidentSubmission> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl IncidentRegistry for MockRegistry {
    async fn register(&self, submission: &IncidentSubmission) -> Result<RegistryReceipt> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(submission.clone());
        match self.fail_status {
            Some(status) => Err(IntakeError::RegistrySubmissionFailure {
                status: Some(status),
                message: format!("HTTP {status}"),
            }),
            None => Ok(RegistryReceipt {
                status: 200,
                body: serde_json::json!({ "ok": true }),
            }),
        }
    }
}
