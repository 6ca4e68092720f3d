/// Why a single snippet evaluation did not produce a value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TamperError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("cannot convert value: {0}")]
    Conversion(String),

    #[error("snippet exceeded its time budget of {budget_ms}ms")]
    Timeout { budget_ms: u128 },

    #[error("{limit} timed-out snippets are still running, refusing to start another")]
    Saturated { limit: usize },

    #[error("evaluation worker stopped without a result")]
    WorkerLost,
}

impl From<starlark::Error> for TamperError {
    fn from(err: starlark::Error) -> Self {
        TamperError::Evaluation(format!("{}", err))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid JSON on line {line}: {source}")]
    JsonError {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
