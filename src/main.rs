use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tamper_star::{
    logging, ErrorStrategy, EvalLimits, FormValues, ImportPipeline, PipelineConfig, StarlarkTamper,
    TamperConfig,
};

#[derive(Parser)]
#[command(name = "tamper-star")]
#[command(about = "Rewrite import field values with Starlark snippets")]
#[command(version)]
struct Args {
    /// Log evaluation details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a configuration file the way the configuration form does
    Validate {
        /// YAML file with a `code` key
        #[arg(short = 'c', long = "config")]
        config: PathBuf,
    },

    /// Print the configuration form description as JSON
    Form {
        /// Pre-fill the form from this configuration
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },

    /// Apply the snippet to fields of JSON Lines records
    Run {
        #[arg(short = 'c', long = "config")]
        config: PathBuf,

        /// Field to rewrite (repeatable)
        #[arg(short = 'F', long = "field", required = true)]
        fields: Vec<String>,

        /// Input file (default: stdin)
        #[arg(short = 'i', long = "input")]
        input_file: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short = 'o', long = "output")]
        output_file: Option<PathBuf>,

        /// Wall-clock budget per value, e.g. 500ms or 2s
        #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
        timeout: Duration,

        /// Evaluate on the calling thread without a time budget
        #[arg(long, conflicts_with = "timeout")]
        no_timeout: bool,

        /// Timed-out evaluations allowed to linger before refusing new ones
        #[arg(long, default_value = "4")]
        max_detached: usize,

        /// Stop on the first malformed input line
        #[arg(long)]
        fail_fast: bool,

        /// Print run statistics to stderr
        #[arg(long)]
        stats: bool,
    },
}

fn main() {
    let args = Args::parse();
    logging::init(args.verbose);

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Args) -> anyhow::Result<i32> {
    match args.command {
        Command::Validate { config } => {
            let values = load_form_values(&config)?;
            let errors = StarlarkTamper::default().validate_configuration_form(&values);
            if errors.is_empty() {
                println!("{}: ok", config.display());
                Ok(0)
            } else {
                for error in &errors {
                    eprintln!("{}", error);
                }
                Ok(1)
            }
        }
        Command::Form { config } => {
            let tamper_config = match config {
                Some(path) => TamperConfig::from_yaml_file(&path)?,
                None => StarlarkTamper::default_configuration(),
            };
            let form = StarlarkTamper::new(tamper_config).render_configuration_form();
            println!("{}", serde_json::to_string_pretty(&form)?);
            Ok(0)
        }
        Command::Run {
            config,
            fields,
            input_file,
            output_file,
            timeout,
            no_timeout,
            max_detached,
            fail_fast,
            stats,
        } => {
            let limits = EvalLimits {
                time_budget: if no_timeout { None } else { Some(timeout) },
                max_detached_workers: max_detached,
            };

            let values = load_form_values(&config)?;
            let mut tamper = StarlarkTamper::with_limits(TamperConfig::new(""), limits);
            let errors = tamper.validate_configuration_form(&values);
            if !errors.is_empty() {
                for error in &errors {
                    eprintln!("{}", error);
                }
                anyhow::bail!("refusing to run with an invalid configuration");
            }
            tamper.submit_configuration_form(&values);

            let mut pipeline = ImportPipeline::new(PipelineConfig {
                error_strategy: if fail_fast {
                    ErrorStrategy::FailFast
                } else {
                    ErrorStrategy::Skip
                },
            });
            for field in fields {
                pipeline.add_step(field, Box::new(tamper.clone()));
            }

            let input: Box<dyn BufRead> = match &input_file {
                Some(path) => Box::new(BufReader::new(File::open(path).map_err(|e| {
                    anyhow::anyhow!("Failed to open input file '{}': {}", path.display(), e)
                })?)),
                None => Box::new(BufReader::new(io::stdin())),
            };
            let mut output: Box<dyn Write> = match &output_file {
                Some(path) => Box::new(BufWriter::new(File::create(path).map_err(|e| {
                    anyhow::anyhow!("Failed to create output file '{}': {}", path.display(), e)
                })?)),
                None => Box::new(BufWriter::new(io::stdout())),
            };

            let run_stats = pipeline.process_stream(input, &mut output)?;
            output.flush()?;

            if stats {
                eprintln!("Records processed: {}", run_stats.records_processed);
                eprintln!("Records output: {}", run_stats.records_output);
                eprintln!("Records skipped: {}", run_stats.records_skipped);
                eprintln!("Values replaced: {}", run_stats.values_replaced);
                eprintln!("Values unchanged: {}", run_stats.values_unchanged);
                eprintln!("Failures: {}", run_stats.failures);
                eprintln!("Processing time: {:?}", run_stats.processing_time);
            }
            Ok(0)
        }
    }
}

/// Raw key/value map of a YAML configuration file, as the form would submit it.
fn load_form_values(path: &Path) -> anyhow::Result<FormValues> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config '{}': {}", path.display(), e))?;
    if text.trim().is_empty() {
        return Ok(FormValues::new());
    }
    serde_yaml::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path.display(), e))
}
