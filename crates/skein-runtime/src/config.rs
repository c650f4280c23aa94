//! Host configuration (skein.toml)
//!
//! ```toml
//! [isolate]
//! debug_name = "root"
//! start_paused = false
//! pause_on_exit = false
//! advisory_script_uri = "main"
//! advisory_script_entrypoint = "main"
//!
//! [runner]
//! thread_name = "skein.ui"
//!
//! [limits]
//! max_isolates = 16
//! ```
//!
//! Every table and field is optional.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use skein_engine::{IsolateSettings, Snapshot, DEFAULT_ENTRYPOINT};
use std::path::Path;
use tracing::debug;

/// Host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    /// Root isolate settings
    pub isolate: IsolateConfig,
    /// Task runner settings
    pub runner: RunnerConfig,
    /// Resource limits
    pub limits: LimitsConfig,
}

/// `[isolate]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IsolateConfig {
    /// Label used in logs
    pub debug_name: String,
    /// Pause before the first user message until resumed
    pub start_paused: bool,
    /// Pause before exiting until resumed
    pub pause_on_exit: bool,
    /// Advisory script URI recorded in the group
    pub advisory_script_uri: String,
    /// Entrypoint used when a launch names none
    pub advisory_script_entrypoint: String,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            debug_name: "root".to_string(),
            start_paused: false,
            pause_on_exit: false,
            advisory_script_uri: "main".to_string(),
            advisory_script_entrypoint: DEFAULT_ENTRYPOINT.to_string(),
        }
    }
}

/// `[runner]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Name of the thread running isolate messages
    pub thread_name: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            thread_name: "skein.ui".to_string(),
        }
    }
}

/// `[limits]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum number of live isolates (unlimited when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_isolates: Option<usize>,
}

impl HostConfig {
    /// Load a configuration file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_str(&content)?;
        debug!(path = %path.display(), "host config loaded");
        Ok(config)
    }

    /// Parse a configuration from TOML text
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "runner.thread_name cannot be empty".to_string(),
            ));
        }
        if self.isolate.advisory_script_entrypoint.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "isolate.advisory_script_entrypoint cannot be empty".to_string(),
            ));
        }
        if self.limits.max_isolates == Some(0) {
            return Err(ConfigError::Invalid(
                "limits.max_isolates must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Root isolate settings for `snapshot`
    pub fn isolate_settings(&self, snapshot: Snapshot) -> IsolateSettings {
        IsolateSettings::default()
            .with_snapshot(snapshot)
            .with_debug_name(self.isolate.debug_name.clone())
            .with_advisory_script(
                self.isolate.advisory_script_uri.clone(),
                self.isolate.advisory_script_entrypoint.clone(),
            )
            .with_start_paused(self.isolate.start_paused)
            .with_pause_on_exit(self.isolate.pause_on_exit)
    }
}
