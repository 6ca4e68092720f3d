use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Body used when a plugin instance is first configured.
pub const DEFAULT_CODE: &str = "return value;";

/// Persisted plugin configuration.
///
/// A missing `code` key deserialises to an empty string, which makes the
/// transformer a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperConfig {
    #[serde(default)]
    pub code: String,
}

impl Default for TamperConfig {
    fn default() -> Self {
        TamperConfig {
            code: DEFAULT_CODE.to_string(),
        }
    }
}

impl TamperConfig {
    pub fn new(code: impl Into<String>) -> Self {
        TamperConfig { code: code.into() }
    }

    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}

/// Host-side bounds on a single evaluation. Not persisted with the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalLimits {
    /// Wall-clock budget per call. `None` runs inline on the caller's thread.
    pub time_budget: Option<Duration>,
    /// Timed-out workers allowed to keep running before new calls are refused.
    /// Zero disables the cap.
    pub max_detached_workers: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        EvalLimits {
            time_budget: Some(Duration::from_secs(1)),
            max_detached_workers: 4,
        }
    }
}

impl EvalLimits {
    pub fn inline() -> Self {
        EvalLimits {
            time_budget: None,
            max_detached_workers: 0,
        }
    }

    pub fn with_time_budget(budget: Duration) -> Self {
        EvalLimits {
            time_budget: Some(budget),
            ..EvalLimits::default()
        }
    }
}
