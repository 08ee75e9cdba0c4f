//! Optics measurements and their accelerator metadata.

use std::fmt::{self, Write};
use std::path::{Path, PathBuf};

use sbs_core::{Keyed, UniqueKeyedCollection};

use crate::runner::SbsInput;
use crate::segment::Segment;
use crate::{Error, Result};

/// Sub-folder of the measurement used for output unless set otherwise.
pub const DEFAULT_OUTPUT_DIR: &str = "sbs";

/// LHC years for which optics models exist.
pub const LHC_MODEL_YEARS: [u32; 7] = [2012, 2015, 2016, 2017, 2018, 2022, 2023];

/// Accelerator metadata of a measurement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceleratorInfo {
    /// Accelerator name, lower case (`lhc`, `psb`, ...).
    pub accel: Option<String>,
    /// LHC beam.
    pub beam: Option<u8>,
    /// PSB ring.
    pub ring: Option<u8>,
    /// Model year.
    pub year: Option<String>,
}

impl AcceleratorInfo {
    /// Derives the metadata from a model sequence name (e.g. `LHCB1`,
    /// `psb3`) and, for the LHC, the model creation date (`dd/mm/yy`).
    pub fn from_sequence(sequence: &str, date: Option<&str>) -> Self {
        let sequence = sequence.to_lowercase();
        let last_digit = sequence
            .chars()
            .last()
            .and_then(|c| c.to_digit(10))
            .and_then(|d| u8::try_from(d).ok());

        if sequence.contains("lhc") {
            Self {
                accel: Some("lhc".to_string()),
                beam: last_digit,
                ring: None,
                year: date.and_then(lhc_model_year),
            }
        } else if sequence.contains("psb") {
            Self {
                accel: Some("psb".to_string()),
                ring: last_digit,
                ..Self::default()
            }
        } else {
            Self {
                accel: Some(sequence),
                ..Self::default()
            }
        }
    }
}

/// Closest LHC model year not after the year of `date` (`dd/mm/yy`).
pub fn lhc_model_year(date: &str) -> Option<String> {
    let suffix = date.rsplit('/').next()?.trim();
    let Ok(found) = format!("20{suffix}").parse::<u32>() else {
        log::debug!("Could not parse year from '{date}'");
        return None;
    };
    let year = LHC_MODEL_YEARS.iter().rev().find(|&&year| year <= found);
    if year.is_none() {
        log::debug!("No LHC model year at or before {found}");
    }
    year.map(u32::to_string)
}

/// A loaded optics-measurement folder and the segments defined on it.
///
/// Keyed by its name, which defaults to the folder name.
#[derive(Debug)]
pub struct OpticsMeasurement {
    name: String,
    /// Optics-measurement folder.
    pub measurement_dir: PathBuf,
    /// Associated model folder.
    pub model_dir: Option<PathBuf>,
    /// Where segment-by-segment writes its results.
    pub output_dir: PathBuf,
    /// Accelerator metadata.
    pub info: AcceleratorInfo,
    segments: UniqueKeyedCollection<Segment>,
}

impl OpticsMeasurement {
    /// Creates a measurement for `measurement_dir` with no metadata.
    pub fn new(measurement_dir: impl Into<PathBuf>) -> Self {
        let measurement_dir = measurement_dir.into();
        let name = measurement_dir.file_name().map_or_else(
            || measurement_dir.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        Self {
            name,
            output_dir: measurement_dir.join(DEFAULT_OUTPUT_DIR),
            measurement_dir,
            model_dir: None,
            info: AcceleratorInfo::default(),
            segments: UniqueKeyedCollection::new(),
        }
    }

    /// Sets the model folder.
    #[must_use]
    pub fn with_model_dir(mut self, model_dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(model_dir.into());
        self
    }

    /// Sets the output folder.
    #[must_use]
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Sets the accelerator metadata.
    #[must_use]
    pub fn with_info(mut self, info: AcceleratorInfo) -> Self {
        self.info = info;
        self
    }

    /// Display name and key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optics-measurement folder.
    pub fn measurement_dir(&self) -> &Path {
        &self.measurement_dir
    }

    /// Segments defined on this measurement.
    pub fn segments(&self) -> &UniqueKeyedCollection<Segment> {
        &self.segments
    }

    /// Mutable access for adding, removing and re-keying segments.
    pub fn segments_mut(&mut self) -> &mut UniqueKeyedCollection<Segment> {
        &mut self.segments
    }

    /// Names of metadata fields that still need to be filled in.
    pub fn missing_metadata(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.model_dir.is_none() {
            missing.push("model directory");
        }
        match self.info.accel.as_deref() {
            None => missing.push("accelerator"),
            Some("lhc") => {
                if self.info.beam.is_none() {
                    missing.push("beam");
                }
                if self.info.year.is_none() {
                    missing.push("year");
                }
            }
            Some("psb") if self.info.ring.is_none() => missing.push("ring"),
            Some(_) => {}
        }
        missing
    }

    /// Multi-line "label: value" description, skipping unknown values.
    pub fn summary(&self) -> String {
        let model = self.model_dir.as_ref().map(|p| p.display().to_string());
        let beam = self.info.beam.map(|b| b.to_string());
        let ring = self.info.ring.map(|r| r.to_string());
        let parts = [
            ("Optics Measurement", Some(self.measurement_dir.display().to_string())),
            ("Model", model),
            ("Accelerator", self.info.accel.clone()),
            ("Beam", beam),
            ("Year", self.info.year.clone()),
            ("Ring", ring),
            ("Output", Some(self.output_dir.display().to_string())),
        ];
        let width = parts.iter().map(|(label, _)| label.len()).max().unwrap_or(0);

        let mut summary = String::new();
        for (label, value) in parts {
            if let Some(value) = value {
                if !summary.is_empty() {
                    summary.push('\n');
                }
                let _ = write!(summary, "{label:width$}: {value}");
            }
        }
        summary
    }

    /// Owned copy of everything needed to run segment-by-segment on this
    /// measurement, safe to hand to a worker thread.
    ///
    /// With no `names`, every enabled segment is included; otherwise the
    /// named segments, of which disabled ones are skipped.
    ///
    /// # Errors
    /// - [`Error::IncompleteMeasurement`] if model folder or accelerator is unset.
    /// - [`Error::Core`] (not found) naming segments that do not exist.
    /// - [`Error::NoSegments`] if nothing is left to run.
    pub fn snapshot<S: AsRef<str>>(&self, names: &[S]) -> Result<SbsInput> {
        let incomplete = |field| Error::IncompleteMeasurement {
            measurement: self.name.clone(),
            field,
        };
        let model_dir = self.model_dir.clone().ok_or_else(|| incomplete("model directory"))?;
        let accel = self.info.accel.clone().ok_or_else(|| incomplete("accelerator"))?;

        let chosen: Vec<&Segment> = if names.is_empty() {
            self.segments.iter().collect()
        } else {
            let mut missing = Vec::new();
            let found = names
                .iter()
                .filter_map(|name| {
                    let segment = self.segments.get(name.as_ref());
                    if segment.is_none() {
                        missing.push(name.as_ref().to_string());
                    }
                    segment
                })
                .collect();
            if !missing.is_empty() {
                return Err(sbs_core::Error::NotFound { keys: missing }.into());
            }
            found
        };

        let segments: Vec<String> = chosen
            .into_iter()
            .filter(|segment| {
                if !segment.enabled {
                    log::debug!("Skipping disabled segment '{segment}' of '{}'", self.name);
                }
                segment.enabled
            })
            .map(Segment::to_input_string)
            .collect();
        if segments.is_empty() {
            return Err(Error::NoSegments(self.name.clone()));
        }

        Ok(SbsInput {
            measurement: self.name.clone(),
            measurement_dir: self.measurement_dir.clone(),
            model_dir,
            accel,
            output_dir: self.output_dir.clone(),
            year: self.info.year.clone(),
            beam: self.info.beam,
            ring: self.info.ring,
            segments,
        })
    }
}

impl Keyed for OpticsMeasurement {
    fn key(&self) -> &str {
        &self.name
    }

    fn set_key(&mut self, key: String) {
        self.name = key;
    }
}

impl fmt::Display for OpticsMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
