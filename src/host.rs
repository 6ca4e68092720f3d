// src/host.rs - minimal import run driving tampers over JSON Lines
use crate::error::ProcessingError;
use crate::logging::log_host_warn;
use crate::tamper::outcome::TransformOutcome;
use crate::tamper::{Record, Tamper};
use serde_json::Value as JsonValue;
use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

/// How to treat input lines that are not JSON objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStrategy {
    /// Skip problematic lines and continue processing
    Skip,
    /// Stop processing on first error
    FailFast,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub error_strategy: ErrorStrategy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            error_strategy: ErrorStrategy::Skip,
        }
    }
}

/// Runtime statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessingStats {
    pub records_processed: usize,
    pub records_output: usize,
    pub records_skipped: usize,
    pub values_replaced: usize,
    pub values_unchanged: usize,
    pub failures: usize,
    pub processing_time: Duration,
}

impl ProcessingStats {
    fn merge(&mut self, other: &ProcessingStats) {
        self.records_processed += other.records_processed;
        self.records_output += other.records_output;
        self.records_skipped += other.records_skipped;
        self.values_replaced += other.values_replaced;
        self.values_unchanged += other.values_unchanged;
        self.failures += other.failures;
        self.processing_time += other.processing_time;
    }
}

/// One tamper bound to the field it rewrites.
pub struct FieldStep {
    pub field: String,
    pub tamper: Box<dyn Tamper>,
}

/// Applies field steps, in order, to every record of a stream.
///
/// Every step sees the record as it was read from the source, not as
/// earlier steps left it.
pub struct ImportPipeline {
    steps: Vec<FieldStep>,
    config: PipelineConfig,
    stats: ProcessingStats,
}

impl ImportPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        ImportPipeline {
            steps: Vec::new(),
            config,
            stats: ProcessingStats::default(),
        }
    }

    pub fn add_step(&mut self, field: impl Into<String>, tamper: Box<dyn Tamper>) {
        self.steps.push(FieldStep {
            field: field.into(),
            tamper,
        });
    }

    /// Run the field steps over one source record.
    pub fn process_record(&self, source: &Record, stats: &mut ProcessingStats) -> Record {
        let mut output = source.clone();

        for step in &self.steps {
            let Some(current) = output.get(&step.field) else {
                continue;
            };
            let value = current.clone();
            let outcome = step.tamper.try_transform(&value, Some(source));

            match &outcome {
                TransformOutcome::Replaced(_) => stats.values_replaced += 1,
                TransformOutcome::Unchanged => stats.values_unchanged += 1,
                TransformOutcome::Failed(_) => stats.failures += 1,
            }

            let new_value = outcome.resolve(step.tamper.info().id, &value);
            output.insert(step.field.clone(), new_value);
        }

        output
    }

    /// Process a JSON Lines stream, one object per line.
    pub fn process_stream<R: BufRead, W: Write>(
        &mut self,
        input: R,
        output: &mut W,
    ) -> Result<ProcessingStats, ProcessingError> {
        let start_time = Instant::now();
        let mut file_stats = ProcessingStats::default();

        for (index, line_result) in input.lines().enumerate() {
            let line = line_result?;
            let line_number = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            file_stats.records_processed += 1;

            let source = match parse_record(&line, line_number) {
                Ok(record) => record,
                Err(err) => match self.config.error_strategy {
                    ErrorStrategy::FailFast => return Err(err),
                    ErrorStrategy::Skip => {
                        file_stats.records_skipped += 1;
                        log_host_warn!("{}, skipping", err);
                        continue;
                    }
                },
            };

            let record = self.process_record(&source, &mut file_stats);
            if let Err(e) = write_record(output, &record) {
                // Handle broken pipe gracefully
                if e.kind() == std::io::ErrorKind::BrokenPipe {
                    break;
                }
                return Err(ProcessingError::IoError(e));
            }
            file_stats.records_output += 1;
        }

        file_stats.processing_time = start_time.elapsed();
        self.stats.merge(&file_stats);

        Ok(file_stats)
    }

    /// Get current accumulated stats
    pub fn get_stats(&self) -> &ProcessingStats {
        &self.stats
    }
}

fn parse_record(line: &str, line_number: usize) -> Result<Record, ProcessingError> {
    let to_error = |source| ProcessingError::JsonError {
        line: line_number,
        source,
    };
    match serde_json::from_str::<JsonValue>(line).map_err(to_error)? {
        JsonValue::Object(record) => Ok(record),
        other => Err(to_error(serde::de::Error::custom(format!(
            "expected an object, found {}",
            json_kind(&other)
        )))),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

fn write_record<W: Write>(output: &mut W, record: &Record) -> std::io::Result<()> {
    serde_json::to_writer(&mut *output, record)?;
    writeln!(output)
}
