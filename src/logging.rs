//! Diagnostic channels and logger setup.
//!
//! Library code only talks to the `log` facade. The binary decides where
//! records go.

/// Channel for per-value evaluation failures.
pub const TAMPER_TARGET: &str = "tamper_star::tamper";

/// Channel for evaluation worker bookkeeping.
pub const WORKER_TARGET: &str = "tamper_star::worker";

/// Channel for the import run: malformed input lines and the like.
pub const HOST_TARGET: &str = "tamper_star::host";

macro_rules! log_tamper_error {
    ($($arg:tt)*) => {
        log::error!(target: $crate::logging::TAMPER_TARGET, $($arg)*)
    };
}

macro_rules! log_worker_warn {
    ($($arg:tt)*) => {
        log::warn!(target: $crate::logging::WORKER_TARGET, $($arg)*)
    };
}

macro_rules! log_worker_debug {
    ($($arg:tt)*) => {
        log::debug!(target: $crate::logging::WORKER_TARGET, $($arg)*)
    };
}

macro_rules! log_host_warn {
    ($($arg:tt)*) => {
        log::warn!(target: $crate::logging::HOST_TARGET, $($arg)*)
    };
}

pub(crate) use {log_host_warn, log_tamper_error, log_worker_debug, log_worker_warn};

/// Initialise `env_logger`. `RUST_LOG` still wins over the default level.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .try_init();
}
