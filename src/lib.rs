// src/lib.rs
pub mod builtins;
mod convert;
pub mod error;
pub mod host;
pub mod logging;
pub mod tamper;

pub use error::*;

pub use host::{ErrorStrategy, ImportPipeline, PipelineConfig, ProcessingStats};
pub use tamper::config::{EvalLimits, TamperConfig, DEFAULT_CODE};
pub use tamper::form::{ConfigForm, FieldError, FormElement, FormExample, FormValues};
pub use tamper::outcome::TransformOutcome;
pub use tamper::{PluginInfo, Record, StarlarkTamper, Tamper, STARLARK_CALLBACK};
