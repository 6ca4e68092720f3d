use crate::error::TamperError;
use crate::logging::log_tamper_error;
use serde_json::Value as JsonValue;

/// Result of one transform call, before failure masking.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    /// No code configured, or the snippet returned None.
    Unchanged,
    Replaced(JsonValue),
    Failed(TamperError),
}

impl TransformOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TransformOutcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&TamperError> {
        match self {
            TransformOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// The value the pipeline continues with. A failure is reported once
    /// on the tamper channel and the original value is kept.
    pub fn resolve(self, plugin_id: &str, original: &JsonValue) -> JsonValue {
        match self {
            TransformOutcome::Unchanged => original.clone(),
            TransformOutcome::Replaced(value) => value,
            TransformOutcome::Failed(err) => {
                log_tamper_error!("{} tamper error: {}", plugin_id, err);
                original.clone()
            }
        }
    }
}
