//! Service configuration
//!
//! Loaded from `~/.config/spanstream/config.toml` when present. Every field
//! has a default so a partial (or missing) file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StreamError;

/// Longest fence line the tracker must be able to see in one window
/// (three backticks plus a generous language tag).
const MIN_ROLLING_WINDOW: usize = 16;

/// Tunables for admission, delivery and classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Consumer idle timeout for streaming sessions
    pub idle_timeout_secs: u64,
    /// Overall timeout for non-streaming completions
    pub completion_timeout_secs: u64,
    /// Emit a `progress` event every N tokens
    pub progress_interval: usize,
    /// Attempt title extraction every N tokens
    pub title_interval: usize,
    /// Characters of trailing context kept by the content tracker
    pub rolling_window: usize,
    /// Concurrent streaming sessions
    pub max_streaming_sessions: usize,
    /// Concurrent non-streaming completions
    pub max_completions: usize,
    /// How long admission may wait for a free slot (0 = reject immediately)
    pub admission_wait_ms: u64,
    /// Per-session event channel capacity
    pub channel_capacity: usize,
    /// Consecutive backend failures before the breaker opens
    pub breaker_failure_threshold: u32,
    /// Seconds the breaker stays open before probing again
    pub breaker_recovery_secs: u64,
    /// Maximum number of cached model bindings
    pub binding_cache_capacity: u64,
    /// Temperature used when a request does not specify one
    pub default_temperature: f32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            completion_timeout_secs: 300,
            progress_interval: 25,
            title_interval: 20,
            rolling_window: 200,
            max_streaming_sessions: 5,
            max_completions: 10,
            admission_wait_ms: 0,
            channel_capacity: 256,
            breaker_failure_threshold: 5,
            breaker_recovery_secs: 60,
            binding_cache_capacity: 32,
            default_temperature: 0.7,
        }
    }
}

impl StreamConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("spanstream").join("config.toml"))
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load_default() -> Result<Self, StreamError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("Config: No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, StreamError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StreamError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!("Config: Loaded from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self, StreamError> {
        let config: Self =
            toml::from_str(content).map_err(|e| StreamError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), StreamError> {
        let zero_checks = [
            (self.progress_interval, "progress_interval"),
            (self.title_interval, "title_interval"),
            (self.max_streaming_sessions, "max_streaming_sessions"),
            (self.max_completions, "max_completions"),
            (self.channel_capacity, "channel_capacity"),
        ];
        for (value, name) in zero_checks {
            if value == 0 {
                return Err(StreamError::Config(format!("{} must be greater than 0", name)));
            }
        }
        if self.idle_timeout_secs == 0 {
            return Err(StreamError::Config(
                "idle_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.rolling_window < MIN_ROLLING_WINDOW {
            return Err(StreamError::Config(format!(
                "rolling_window must be at least {} characters",
                MIN_ROLLING_WINDOW
            )));
        }
        if !(0.0..=1.0).contains(&self.default_temperature) {
            return Err(StreamError::Config(format!(
                "default_temperature must be between 0.0 and 1.0, got {}",
                self.default_temperature
            )));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    pub fn admission_wait(&self) -> Duration {
        Duration::from_millis(self.admission_wait_ms)
    }

    pub fn breaker_recovery(&self) -> Duration {
        Duration::from_secs(self.breaker_recovery_secs)
    }
}
