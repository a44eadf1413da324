//! Compiler configuration, read from a YAML file.
//!
//! ```yaml
//! auto-beam: true
//! legacy-syntax: true
//! default-repeat-times: 1
//! default-program: 0
//! default-channel: 0
//! ```
//!
//! Every key is optional.

use serde::{Deserialize, Serialize};

use crate::error::ScoreError;

/// Validated compiler settings
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Compute beam segment types from note durations.
    pub auto_beam: bool,
    /// Accept the legacy `l`, `g+` and `g-` note options.
    pub legacy_syntax: bool,
    /// Repeat count for a repeat barline without `(times N)`.
    pub default_repeat_times: u32,
    pub default_program: u8,
    pub default_channel: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_beam: true,
            legacy_syntax: true,
            default_repeat_times: 1,
            default_program: 0,
            default_channel: 0,
        }
    }
}

/// Raw config for YAML deserialization
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    auto_beam: Option<bool>,
    legacy_syntax: Option<bool>,
    default_repeat_times: Option<u32>,
    default_program: Option<u8>,
    default_channel: Option<u8>,
}

impl Config {
    /// Parse and validate YAML config text. An empty document yields the defaults.
    pub fn from_yaml(text: &str) -> Result<Self, ScoreError> {
        let raw: RawConfig = if text.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(text).map_err(|e| ScoreError::ConfigError(e.to_string()))?
        };

        let defaults = Config::default();
        let config = Config {
            auto_beam: raw.auto_beam.unwrap_or(defaults.auto_beam),
            legacy_syntax: raw.legacy_syntax.unwrap_or(defaults.legacy_syntax),
            default_repeat_times: raw.default_repeat_times.unwrap_or(defaults.default_repeat_times),
            default_program: raw.default_program.unwrap_or(defaults.default_program),
            default_channel: raw.default_channel.unwrap_or(defaults.default_channel),
        };

        if config.default_repeat_times == 0 {
            return Err(ScoreError::ConfigError(
                "default-repeat-times must be at least 1".to_string(),
            ));
        }
        if config.default_program > 127 {
            return Err(ScoreError::ConfigError(
                "default-program must be in 0..128".to_string(),
            ));
        }
        if config.default_channel > 15 {
            return Err(ScoreError::ConfigError(
                "default-channel must be in 0..16".to_string(),
            ));
        }
        Ok(config)
    }

    /// Read and parse a YAML config file.
    pub fn load(path: &std::path::Path) -> Result<Self, ScoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }
}
