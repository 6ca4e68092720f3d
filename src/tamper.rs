// src/tamper.rs
pub mod config;
mod evaluator;
pub mod form;
pub mod outcome;
pub mod snippet;

use crate::tamper::config::{EvalLimits, TamperConfig};
use crate::tamper::evaluator::SnippetEvaluator;
use crate::tamper::form::{ConfigForm, FieldError, FormValues};
use crate::tamper::outcome::TransformOutcome;
use serde_json::Value as JsonValue;

/// Field values of the source item currently being imported.
pub type Record = serde_json::Map<String, JsonValue>;

/// Static description used by the plugin registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginInfo {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub category: &'static str,
}

pub const STARLARK_CALLBACK: PluginInfo = PluginInfo {
    id: "starlark_callback",
    label: "Starlark callback",
    description: "Process the value with a custom Starlark snippet.",
    category: "Other",
};

/// A unit that maps one field value to another during import.
pub trait Tamper: Send + Sync {
    fn info(&self) -> &PluginInfo;

    fn try_transform(&self, value: &JsonValue, record: Option<&Record>) -> TransformOutcome;

    /// Never fails: errors are logged and the input value comes back.
    fn transform(&self, value: &JsonValue, record: Option<&Record>) -> JsonValue {
        self.try_transform(value, record)
            .resolve(self.info().id, value)
    }
}

/// Tamper that rewrites a value with an operator-authored Starlark body.
///
/// The body sees `value`, `record` and `item_data` (same mapping as
/// `record`) and returns the replacement. Returning None keeps the value.
#[derive(Clone)]
pub struct StarlarkTamper {
    config: TamperConfig,
    evaluator: SnippetEvaluator,
}

impl Default for StarlarkTamper {
    fn default() -> Self {
        Self::new(TamperConfig::default())
    }
}

impl StarlarkTamper {
    pub fn new(config: TamperConfig) -> Self {
        Self::with_limits(config, EvalLimits::default())
    }

    pub fn with_limits(config: TamperConfig, limits: EvalLimits) -> Self {
        StarlarkTamper {
            config,
            evaluator: SnippetEvaluator::new(limits),
        }
    }

    pub fn default_configuration() -> TamperConfig {
        TamperConfig::default()
    }

    pub fn configuration(&self) -> &TamperConfig {
        &self.config
    }

    pub fn set_configuration(&mut self, config: TamperConfig) {
        self.config = config;
    }

    pub fn limits(&self) -> EvalLimits {
        self.evaluator.limits()
    }

    /// Timed-out evaluations whose workers have not finished yet.
    pub fn detached_workers(&self) -> usize {
        self.evaluator.detached_workers()
    }

    pub fn render_configuration_form(&self) -> ConfigForm {
        let current = if self.config.has_code() {
            self.config.code.as_str()
        } else {
            config::DEFAULT_CODE
        };
        form::build(current)
    }

    pub fn validate_configuration_form(&self, values: &FormValues) -> Vec<FieldError> {
        form::validate(values)
    }

    /// Store the submitted body, replacing the current configuration.
    pub fn submit_configuration_form(&mut self, values: &FormValues) {
        let code = form::submitted_code(values).unwrap_or_default();
        self.set_configuration(TamperConfig::new(code));
    }
}

impl Tamper for StarlarkTamper {
    fn info(&self) -> &PluginInfo {
        &STARLARK_CALLBACK
    }

    fn try_transform(&self, value: &JsonValue, record: Option<&Record>) -> TransformOutcome {
        if !self.config.has_code() {
            return TransformOutcome::Unchanged;
        }

        let empty = Record::new();
        let record = record.unwrap_or(&empty);
        match self.evaluator.evaluate(&self.config.code, value, record) {
            Ok(Some(new_value)) => TransformOutcome::Replaced(new_value),
            Ok(None) => TransformOutcome::Unchanged,
            Err(err) => TransformOutcome::Failed(err),
        }
    }
}
