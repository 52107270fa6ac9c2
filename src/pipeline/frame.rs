//! Frame types for the call pipeline.
//!
//! Defines the data structures that flow between pipeline stations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction a frame travels through the station chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDirection {
    /// From the transport input toward the transport output (head → tail).
    Downstream,
    /// Back toward the input side (tail → head); control and termination.
    Upstream,
}

impl FrameDirection {
    /// Returns the opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            FrameDirection::Downstream => FrameDirection::Upstream,
            FrameDirection::Upstream => FrameDirection::Downstream,
        }
    }
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDirection::Downstream => write!(f, "downstream"),
            FrameDirection::Upstream => write!(f, "upstream"),
        }
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged entry of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A block of synthesized audio on its way to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Raw 16-bit little-endian PCM bytes.
    pub data: Vec<u8>,
    /// Sample rate of `data` in Hz.
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, sample_rate: u32) -> Self {
        Self { data, sample_rate }
    }

    /// Returns the duration of this chunk in milliseconds (mono).
    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate == 0 {
            return 0;
        }
        ((self.data.len() as u64 / 2) * 1000 / self.sample_rate as u64) as u32
    }
}

/// Unified frame type that flows through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Pipeline is starting; stations acquire resources.
    Start,
    /// Graceful end of the call; stations flush and stop.
    End,
    /// Immediate teardown; stations drop in-flight work.
    Cancel,
    /// User barged in; in-flight assistant output is stale.
    Interruption,
    /// Recognized user speech delivered by the transport.
    Transcription { text: String },
    /// Ordered conversation snapshot.
    DialogueTurns(Vec<Turn>),
    /// Full assistant reply produced by the dialogue model.
    AssistantText { text: String },
    /// Synthesized speech for the output transport.
    Audio(AudioChunk),
    /// Error notification travelling upstream to the task.
    Error { message: String, fatal: bool },
}

impl Frame {
    /// Returns true for control frames, which interruption never discards.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Frame::Start | Frame::End | Frame::Cancel | Frame::Interruption | Frame::Error { .. }
        )
    }

    /// Returns true if this frame terminates the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::End | Frame::Cancel)
    }

    /// Short kind name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Start => "Start",
            Frame::End => "End",
            Frame::Cancel => "Cancel",
            Frame::Interruption => "Interruption",
            Frame::Transcription { .. } => "Transcription",
            Frame::DialogueTurns(_) => "DialogueTurns",
            Frame::AssistantText { .. } => "AssistantText",
            Frame::Audio(_) => "Audio",
            Frame::Error { .. } => "Error",
        }
    }

    /// Extracts the turns if this is a DialogueTurns frame.
    pub fn into_turns(self) -> Option<Vec<Turn>> {
        match self {
            Frame::DialogueTurns(turns) => Some(turns),
            _ => None,
        }
    }
}
