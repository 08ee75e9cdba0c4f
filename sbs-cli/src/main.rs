//! Command-line front end for segment-by-segment sessions.
//!
//! Loads measurement folders into a session, defines segments on them and
//! runs the external segment-by-segment computation, one background job
//! per measurement.
#![allow(clippy::uninlined_format_args, clippy::too_many_lines)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::LevelFilter;
use thiserror::Error;

use sbs_core::JobState;
use sbs_optics::{
    default_segments, read_segments, write_segments, AcceleratorInfo, CommandRunner,
    OpticsMeasurement, RunnerConfig, Segment, SegmentBySegment, Session,
};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    Optics(#[from] sbs_optics::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no measurement could be loaded")]
    NoMeasurements,

    #[error("{failed} of {total} segment-by-segment jobs failed")]
    JobsFailed { failed: usize, total: usize },
}

/// Segment-by-segment optics analysis sessions.
#[derive(Parser)]
#[command(name = "sbs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run segment-by-segment on one or more measurements
    Run {
        /// Optics-measurement folders
        #[arg(required = true)]
        measurements: Vec<PathBuf>,

        /// Model folder
        #[arg(long)]
        model_dir: PathBuf,

        /// Accelerator name (lhc, psb, ...)
        #[arg(long)]
        accel: String,

        /// LHC beam
        #[arg(long)]
        beam: Option<u8>,

        /// Model year
        #[arg(long)]
        year: Option<String>,

        /// PSB ring
        #[arg(long)]
        ring: Option<u8>,

        /// Output folder (default: <measurement>/sbs; one sub-folder per
        /// measurement when several are given)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Segment as NAME or NAME,START,END (repeatable)
        #[arg(short, long = "segment", value_name = "NAME[,START,END]")]
        segments: Vec<Segment>,

        /// JSON file with segment definitions
        #[arg(long)]
        segments_file: Option<PathBuf>,

        /// Add the default IP segments for the given beam
        #[arg(long)]
        default_segments: bool,

        /// JSON runner configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Python interpreter (overrides the configuration)
        #[arg(long)]
        python: Option<PathBuf>,

        /// Module to run (overrides the configuration)
        #[arg(long)]
        module: Option<String>,

        /// Print the command lines instead of running them
        #[arg(long)]
        dry_run: bool,
    },

    /// List the default LHC segments
    Segments {
        /// LHC beam
        #[arg(long, default_value = "1")]
        beam: u8,

        /// Write them to a JSON segment file instead
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print them as JSON
        #[arg(long, conflicts_with = "output")]
        json: bool,
    },

    /// Show the metadata of a measurement folder
    Info {
        /// Optics-measurement folder
        measurement: PathBuf,

        /// Model folder
        #[arg(long)]
        model_dir: Option<PathBuf>,

        /// Model sequence name, e.g. LHCB1
        #[arg(long)]
        sequence: Option<String>,

        /// Model date as dd/mm/yy
        #[arg(long)]
        date: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            measurements,
            model_dir,
            accel,
            beam,
            year,
            ring,
            output_dir,
            mut segments,
            segments_file,
            default_segments,
            config,
            python,
            module,
            dry_run,
        } => {
            let mut runner_config = match config {
                Some(path) => RunnerConfig::load(&path)?,
                None => RunnerConfig::default(),
            };
            if let Some(python) = python {
                runner_config = runner_config.with_python(python);
            }
            if let Some(module) = module {
                runner_config = runner_config.with_module(module);
            }
            let runner = CommandRunner::new(runner_config);

            let info = AcceleratorInfo {
                accel: Some(accel.to_lowercase()),
                beam,
                ring,
                year,
            };
            let several = measurements.len() > 1;
            let loaded = measurements.iter().map(|dir| {
                let measurement = OpticsMeasurement::new(dir)
                    .with_model_dir(&model_dir)
                    .with_info(info.clone());
                match &output_dir {
                    Some(out) if several => {
                        let out = out.join(measurement.name());
                        measurement.with_output_dir(out)
                    }
                    Some(out) => measurement.with_output_dir(out),
                    None => measurement,
                }
            });

            let mut session =
                Session::new(Arc::new(runner.clone()) as Arc<dyn SegmentBySegment>);
            let added = session.load_measurements(loaded);
            if added.is_empty() {
                return Err(CliError::NoMeasurements);
            }

            if let Some(path) = segments_file {
                segments.extend(read_segments(&path)?);
            }
            if !segments.is_empty() {
                session.add_segments(&segments)?;
            }
            if default_segments {
                session.add_default_segments()?;
            }

            if dry_run {
                for name in session.selected() {
                    if let Some(measurement) = session.measurements().get(name) {
                        let input = measurement.snapshot::<&str>(&[])?;
                        println!("{}", runner.command_line(&input));
                    }
                }
                return Ok(());
            }

            let started = session.run_segments::<&str>(&[])?;
            log::info!("{}", session.status_text());

            let finished = session.wait_jobs();
            let mut failed = 0;
            for job in &finished {
                match (job.state(), job.failure()) {
                    (JobState::Failed, Some(failure)) => {
                        failed += 1;
                        eprintln!("{}", failure);
                    }
                    (JobState::Failed, None) => failed += 1,
                    _ => println!("{}: done", job.name()),
                }
            }
            if failed > 0 {
                return Err(CliError::JobsFailed {
                    failed,
                    total: started,
                });
            }
        }

        Commands::Segments { beam, output, json } => {
            let segments = default_segments(beam);
            match output {
                Some(path) => {
                    write_segments(&path, &segments)?;
                    println!("Wrote {} segments to {}", segments.len(), path.display());
                }
                None if json => println!("{}", serde_json::to_string_pretty(&segments)?),
                None => {
                    for segment in &segments {
                        println!("{}", segment.to_input_string());
                    }
                }
            }
        }

        Commands::Info {
            measurement,
            model_dir,
            sequence,
            date,
        } => {
            let mut measurement = OpticsMeasurement::new(measurement);
            if let Some(model_dir) = model_dir {
                measurement = measurement.with_model_dir(model_dir);
            }
            if let Some(sequence) = sequence {
                measurement = measurement
                    .with_info(AcceleratorInfo::from_sequence(&sequence, date.as_deref()));
            }

            println!("{}", measurement.summary());
            let missing = measurement.missing_metadata();
            if !missing.is_empty() {
                println!("Missing: {}", missing.join(", "));
            }
        }
    }

    Ok(())
}
