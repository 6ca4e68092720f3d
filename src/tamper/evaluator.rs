// src/tamper/evaluator.rs - running one snippet against one value
use crate::builtins::snippet_globals;
use crate::convert::{json_to_starlark_value, starlark_to_json_value};
use crate::error::TamperError;
use crate::logging::{log_worker_debug, log_worker_warn};
use crate::tamper::config::EvalLimits;
use crate::tamper::snippet::{program, snippet_dialect, RECORD_GLOBAL, SNIPPET_FILE, VALUE_GLOBAL};
use crate::tamper::Record;
use crossbeam_channel::RecvTimeoutError;
use serde_json::Value as JsonValue;
use starlark::codemap::FileSpanRef;
use starlark::environment::{Globals, Module};
use starlark::eval::{BeforeStmtFuncDyn, Evaluator};
use starlark::syntax::AstModule;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type EvalResult = Result<Option<JsonValue>, TamperError>;

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

/// Evaluates snippet bodies in a fresh interpreter module per call.
///
/// Clones share the count of detached workers.
#[derive(Clone)]
pub(crate) struct SnippetEvaluator {
    globals: Globals,
    limits: EvalLimits,
    detached: Arc<AtomicUsize>,
}

impl SnippetEvaluator {
    pub(crate) fn new(limits: EvalLimits) -> Self {
        SnippetEvaluator {
            globals: snippet_globals(),
            limits,
            detached: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn limits(&self) -> EvalLimits {
        self.limits
    }

    pub(crate) fn detached_workers(&self) -> usize {
        self.detached.load(Ordering::Acquire)
    }

    /// `Ok(None)` when the body returned None.
    pub(crate) fn evaluate(&self, code: &str, value: &JsonValue, record: &Record) -> EvalResult {
        match self.limits.time_budget {
            None => evaluate_guarded(&self.globals, &program(code), value, record, None),
            Some(budget) => self.evaluate_with_budget(code, value, record, budget),
        }
    }

    fn evaluate_with_budget(
        &self,
        code: &str,
        value: &JsonValue,
        record: &Record,
        budget: Duration,
    ) -> EvalResult {
        let limit = self.limits.max_detached_workers;
        if limit > 0 && self.detached.load(Ordering::Acquire) >= limit {
            return Err(TamperError::Saturated { limit });
        }

        let (tx, rx) = crossbeam_channel::bounded::<EvalResult>(1);
        let state = Arc::new(AtomicU8::new(RUNNING));

        let worker_state = Arc::clone(&state);
        let worker_detached = Arc::clone(&self.detached);
        let globals = self.globals.clone();
        let source = program(code);
        let value = value.clone();
        let record = record.clone();

        let join = thread::Builder::new()
            .name("tamper-eval".to_string())
            .spawn(move || {
                let cancel = CancelWhenAbandoned {
                    state: Arc::clone(&worker_state),
                };
                let result = evaluate_guarded(&globals, &source, &value, &record, Some(cancel));
                let _ = tx.send(result);
                if worker_state
                    .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    let left = worker_detached.fetch_sub(1, Ordering::AcqRel) - 1;
                    log_worker_debug!("detached evaluation finished, {} still running", left);
                }
            })
            .map_err(|e| TamperError::Evaluation(format!("cannot start evaluation worker: {}", e)))?;

        match rx.recv_timeout(budget) {
            Ok(result) => {
                let _ = join.join();
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                // Count first so the worker's decrement can never run ahead of it.
                self.detached.fetch_add(1, Ordering::AcqRel);
                if state
                    .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    log_worker_warn!(
                        "evaluation exceeded {}ms, cancelling worker ({} detached)",
                        budget.as_millis(),
                        self.detached.load(Ordering::Acquire)
                    );
                    Err(TamperError::Timeout {
                        budget_ms: budget.as_millis(),
                    })
                } else {
                    // Finished right at the deadline.
                    self.detached.fetch_sub(1, Ordering::AcqRel);
                    let _ = join.join();
                    rx.try_recv().unwrap_or(Err(TamperError::WorkerLost))
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = join.join();
                Err(TamperError::WorkerLost)
            }
        }
    }
}

/// Statement hook that stops the interpreter once the caller stopped
/// waiting for it. Work inside a single native call still runs to the end.
struct CancelWhenAbandoned {
    state: Arc<AtomicU8>,
}

impl<'a, 'e: 'a> BeforeStmtFuncDyn<'a, 'e> for CancelWhenAbandoned {
    fn call<'v>(
        &mut self,
        _span: FileSpanRef,
        _eval: &mut Evaluator<'v, 'a, 'e>,
    ) -> Result<(), starlark::Error> {
        if self.state.load(Ordering::Acquire) == ABANDONED {
            return Err(starlark::Error::new_other(anyhow::anyhow!(
                "evaluation cancelled after its time budget"
            )));
        }
        Ok(())
    }
}

fn evaluate_guarded(
    globals: &Globals,
    source: &str,
    value: &JsonValue,
    record: &Record,
    cancel: Option<CancelWhenAbandoned>,
) -> EvalResult {
    panic::catch_unwind(AssertUnwindSafe(|| {
        evaluate_inline(globals, source, value, record, cancel)
    }))
    .unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(TamperError::Evaluation(format!("interpreter panicked: {}", message)))
    })
}

fn evaluate_inline(
    globals: &Globals,
    source: &str,
    value: &JsonValue,
    record: &Record,
    cancel: Option<CancelWhenAbandoned>,
) -> EvalResult {
    let ast = AstModule::parse(SNIPPET_FILE, source.to_string(), &snippet_dialect())
        .map_err(|e| TamperError::Syntax(e.to_string()))?;

    // Fresh module for each call, nothing carries over
    let module = Module::new();
    let heap = module.heap();
    let starlark_value =
        json_to_starlark_value(heap, value).map_err(|e| TamperError::Conversion(e.to_string()))?;
    let starlark_record = record_to_starlark(heap, record)?;
    module.set(VALUE_GLOBAL, starlark_value);
    module.set(RECORD_GLOBAL, starlark_record);

    let mut eval = Evaluator::new(&module);
    if let Some(cancel) = cancel {
        eval.before_stmt_for_dap((Box::new(cancel) as Box<dyn BeforeStmtFuncDyn>).into());
    }
    let result = eval.eval_module(ast, globals)?;

    if result.is_none() {
        Ok(None)
    } else {
        starlark_to_json_value(result).map(Some)
    }
}

fn record_to_starlark<'v>(
    heap: &'v starlark::values::Heap,
    record: &Record,
) -> Result<starlark::values::Value<'v>, TamperError> {
    let as_json = JsonValue::Object(record.clone());
    json_to_starlark_value(heap, &as_json).map_err(|e| TamperError::Conversion(e.to_string()))
}
