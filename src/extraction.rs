//! Turns a finished call transcript into a structured incident record.

use crate::defaults;
use crate::error::{IntakeError, Result};
use crate::pipeline::frame::Turn;
use crate::services::CompletionModel;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;

/// Severity assigned by the extraction model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    High,
    Medium,
    Low,
    Unknown,
}

impl Criticality {
    pub fn as_str(self) -> &'static str {
        match self {
            Criticality::High => "High",
            Criticality::Medium => "Medium",
            Criticality::Low => "Low",
            Criticality::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four fields reported for every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncidentRecord {
    #[serde(deserialize_with = "or_unknown")]
    pub impact: String,
    #[serde(deserialize_with = "criticality_or_unknown")]
    pub criticality: Criticality,
    #[serde(rename = "type", deserialize_with = "or_unknown")]
    pub incident_type: String,
    #[serde(deserialize_with = "or_unknown")]
    pub name: String,
}

fn or_unknown<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let value = String::deserialize(deserializer)?;
    let value = value.trim();
    Ok(if value.is_empty() {
        defaults::UNKNOWN.to_string()
    } else {
        value.to_string()
    })
}

fn criticality_or_unknown<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Criticality, D::Error> {
    let value = String::deserialize(deserializer)?;
    match value.trim() {
        "High" => Ok(Criticality::High),
        "Medium" => Ok(Criticality::Medium),
        "Low" => Ok(Criticality::Low),
        "Unknown" | "" => Ok(Criticality::Unknown),
        other => Err(serde::de::Error::unknown_variant(
            other,
            &["High", "Medium", "Low", "Unknown"],
        )),
    }
}

/// Renders every turn after the system instruction as `role: content` lines.
pub fn render_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .skip(1)
        .map(|turn| format!("{}: {}\n", turn.role, turn.content))
        .collect()
}

/// Strictly parses the model's JSON answer.
///
/// Unknown or missing fields, an unrecognized criticality and anything that
/// is not a JSON object are all malformed. A fenced ```json block is
/// unwrapped first.
pub fn parse_record(response: &str) -> Result<IncidentRecord> {
    serde_json::from_str(strip_fence(response)).map_err(|e| {
        IntakeError::MalformedExtractionResponse {
            message: format!("{e}: {}", preview(response)),
        }
    })
}

fn strip_fence(response: &str) -> &str {
    let trimmed = response.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|body| body.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn preview(response: &str) -> String {
    const LIMIT: usize = 120;
    match response.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}…", &response[..cut]),
        None => response.to_string(),
    }
}

/// One-shot extraction over an injected completion model.
#[derive(Clone)]
pub struct IncidentExtractor {
    model: Arc<dyn CompletionModel>,
    instruction: String,
}

impl IncidentExtractor {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self {
            model,
            instruction: defaults::EXTRACTION_INSTRUCTION.to_string(),
        }
    }

    pub fn with_instruction(mut self, instruction: &str) -> Self {
        self.instruction = instruction.to_string();
        self
    }

    /// The prompt sent for `rendered`: instruction, newline, transcript.
    pub fn prompt(&self, rendered: &str) -> String {
        format!("{}\n{}", self.instruction, rendered)
    }

    /// Extracts a record from an already rendered transcript. No retries.
    pub async fn extract(&self, rendered: &str) -> Result<IncidentRecord> {
        let response = self.model.complete(&self.prompt(rendered)).await?;
        let record = parse_record(&response)?;
        tracing::info!(
            criticality = %record.criticality,
            incident_type = %record.incident_type,
            "incident extracted"
        );
        Ok(record)
    }
}

impl fmt::Debug for IncidentExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncidentExtractor")
            .field("instruction_len", &self.instruction.len())
            .finish_non_exhaustive()
    }
}
