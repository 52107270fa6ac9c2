use crate::defaults;
use crate::error::{IntakeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub services: ServicesConfig,
    pub registry: RegistryConfig,
    pub session: SessionConfig,
    pub pipeline: PipelineSettings,
}

/// Credentials and endpoints for the dialogue, extraction and synthesis services
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServicesConfig {
    pub google_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub gemini_base_url: String,
    pub dialogue_model: String,
    pub extraction_model: String,
    pub elevenlabs_base_url: String,
    pub voice_id: String,
    pub timeout_secs: u64,
}

/// Incident registry endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base URL of the API server; the register path is appended.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

/// Per-call defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub system_instruction: String,
}

/// Pipeline task policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub allow_interruptions: bool,
    pub channel_capacity: usize,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            google_api_key: None,
            elevenlabs_api_key: None,
            gemini_base_url: defaults::GEMINI_BASE_URL.to_string(),
            dialogue_model: defaults::DIALOGUE_MODEL.to_string(),
            extraction_model: defaults::EXTRACTION_MODEL.to_string(),
            elevenlabs_base_url: defaults::ELEVENLABS_BASE_URL.to_string(),
            voice_id: defaults::ELEVENLABS_VOICE_ID.to_string(),
            timeout_secs: defaults::HTTP_TIMEOUT_SECS,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: defaults::HTTP_TIMEOUT_SECS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            latitude: defaults::DEFAULT_LATITUDE,
            longitude: defaults::DEFAULT_LONGITUDE,
            system_instruction: defaults::SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            channel_capacity: defaults::CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(IntakeError::ConfigParse {
                        message: format!("{}: {}", path.display(), e),
                    })
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - GOOGLE_AI_API_KEY → services.google_api_key
    /// - ELEVENLABS_API_KEY → services.elevenlabs_api_key
    /// - API_SERVER_URL → registry.base_url
    /// - INTAKE_DIALOGUE_MODEL → services.dialogue_model
    /// - INTAKE_EXTRACTION_MODEL → services.extraction_model
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = non_empty_env("GOOGLE_AI_API_KEY") {
            self.services.google_api_key = Some(key);
        }
        if let Some(key) = non_empty_env("ELEVENLABS_API_KEY") {
            self.services.elevenlabs_api_key = Some(key);
        }
        if let Some(url) = non_empty_env("API_SERVER_URL") {
            self.registry.base_url = Some(url);
        }
        if let Some(model) = non_empty_env("INTAKE_DIALOGUE_MODEL") {
            self.services.dialogue_model = model;
        }
        if let Some(model) = non_empty_env("INTAKE_EXTRACTION_MODEL") {
            self.services.extraction_model = model;
        }
        self
    }

    /// Check that everything a live call needs is present and well-formed.
    pub fn validate(&self) -> Result<()> {
        if self.services.google_api_key.is_none() {
            return Err(IntakeError::MissingCredential {
                name: "GOOGLE_AI_API_KEY".to_string(),
            });
        }

        let base_url = self
            .registry
            .base_url
            .as_deref()
            .ok_or_else(|| IntakeError::MissingCredential {
                name: "API_SERVER_URL".to_string(),
            })?;
        check_url("registry.base_url", base_url)?;
        check_url("services.gemini_base_url", &self.services.gemini_base_url)?;
        check_url(
            "services.elevenlabs_base_url",
            &self.services.elevenlabs_base_url,
        )?;

        if self.pipeline.channel_capacity == 0 {
            return Err(IntakeError::ConfigInvalidValue {
                key: "pipeline.channel_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(-90.0..=90.0).contains(&self.session.latitude) {
            return Err(IntakeError::ConfigInvalidValue {
                key: "session.latitude".to_string(),
                message: format!("{} is outside [-90, 90]", self.session.latitude),
            });
        }
        if !(-180.0..=180.0).contains(&self.session.longitude) {
            return Err(IntakeError::ConfigInvalidValue {
                key: "session.longitude".to_string(),
                message: format!("{} is outside [-180, 180]", self.session.longitude),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/incident-intake/config.toml on Linux, or a path
    /// relative to the working directory when no config dir is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("incident-intake")
            .join("config.toml")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn check_url(key: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(IntakeError::ConfigInvalidValue {
            key: key.to_string(),
            message: format!("'{}' must start with http:// or https://", url),
        })
    }
}
