//! Invocation of the external segment-by-segment computation.
//!
//! The physics lives in an external package. This module assembles its
//! input from a measurement snapshot and calls it through the
//! [`SegmentBySegment`] trait; [`CommandRunner`] is the implementation that
//! spawns it as a subprocess.

use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Everything one segment-by-segment run needs, owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbsInput {
    /// Name of the measurement this input was taken from.
    pub measurement: String,
    /// Optics-measurement folder.
    pub measurement_dir: PathBuf,
    /// Model folder.
    pub model_dir: PathBuf,
    /// Accelerator name.
    pub accel: String,
    /// Output folder.
    pub output_dir: PathBuf,
    /// Model year, if known.
    pub year: Option<String>,
    /// LHC beam, if known.
    pub beam: Option<u8>,
    /// PSB ring, if known.
    pub ring: Option<u8>,
    /// Segments as `name` or `name,start,end`.
    pub segments: Vec<String>,
}

/// The segment-by-segment computation.
///
/// Runs synchronously and writes its results to `input.output_dir`.
pub trait SegmentBySegment: Send + Sync {
    /// Runs the computation for one measurement.
    ///
    /// # Errors
    /// Any failure of the computation.
    fn run(&self, input: &SbsInput) -> Result<()>;
}

/// How to launch the external segment-by-segment program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Python interpreter.
    pub python: PathBuf,
    /// Module run with `-m`.
    pub module: String,
    /// Extra arguments appended after the generated ones.
    pub extra_args: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3"),
            module: "omc3.segment_by_segment".to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl RunnerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file; missing fields keep defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Sets the Python interpreter.
    #[must_use]
    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = python.into();
        self
    }

    /// Sets the module to run.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Appends an extra argument.
    #[must_use]
    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }
}

/// Runs segment-by-segment as `python -m <module> --option value ...`.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    config: RunnerConfig,
}

impl CommandRunner {
    /// Creates a runner with the given configuration.
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// The runner's configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Arguments passed to the interpreter for `input`.
    pub fn arguments(&self, input: &SbsInput) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-m".into(), self.config.module.clone().into()];
        let mut push = |flag: &str, value: OsString| {
            args.push(flag.into());
            args.push(value);
        };
        push("--measurement_dir", input.measurement_dir.clone().into());
        push("--model_dir", input.model_dir.clone().into());
        push("--accel", input.accel.clone().into());
        push("--output_dir", input.output_dir.clone().into());
        if let Some(year) = &input.year {
            push("--year", year.clone().into());
        }
        if let Some(beam) = input.beam {
            push("--beam", beam.to_string().into());
        }
        if let Some(ring) = input.ring {
            push("--ring", ring.to_string().into());
        }
        args.push("--segments".into());
        args.extend(input.segments.iter().map(OsString::from));
        args.extend(self.config.extra_args.iter().map(OsString::from));
        args
    }

    /// Full command line as a single printable string.
    pub fn command_line(&self, input: &SbsInput) -> String {
        std::iter::once(self.config.python.as_os_str().to_owned())
            .chain(self.arguments(input))
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl SegmentBySegment for CommandRunner {
    fn run(&self, input: &SbsInput) -> Result<()> {
        log::debug!("Running: {}", self.command_line(input));
        let output = Command::new(&self.config.python)
            .args(self.arguments(input))
            .output()?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            log::debug!("[{}] {line}", input.measurement);
        }
        if output.status.success() {
            return Ok(());
        }
        Err(Error::Command {
            program: self.config.python.clone(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
