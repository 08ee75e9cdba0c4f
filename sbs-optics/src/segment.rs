//! Segment definitions and segment files.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use sbs_core::Keyed;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Name given to segments created from scratch.
pub const NEW_SEGMENT_NAME: &str = "New Segment";

/// Suffix appended to the name of a copied segment.
pub const COPY_SUFFIX: &str = " - Copy";

/// Default LHC segments around the interaction points: `(name, start, end)`.
///
/// Start and end are BPM names without the beam suffix.
pub const DEFAULT_LHC_SEGMENTS: [(&str, &str, &str); 8] = [
    ("IP1", "BPM.12L1", "BPM.12R1"),
    ("IP2", "BPM.12L2", "BPM.12R2"),
    ("IP3", "BPM.12L3", "BPM.12R3"),
    ("IP4", "BPM.12L4", "BPM.12R4"),
    ("IP5", "BPM.12L5", "BPM.12R5"),
    ("IP6", "BPM.12L6", "BPM.12R6"),
    ("IP7", "BPM.12L7", "BPM.12R7"),
    ("IP8", "BPM.12L8", "BPM.12R8"),
];

/// A named lattice range, or a single element when start or end is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Segment name, unique within one measurement.
    pub name: String,
    /// First element of the range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Last element of the range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Disabled segments are kept but not run.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Segment {
    /// A single-element segment.
    pub fn element(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            end: None,
            enabled: true,
        }
    }

    /// A segment spanning `start` to `end`.
    pub fn range(name: impl Into<String>, start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Some(start.into()),
            end: Some(end.into()),
            enabled: true,
        }
    }

    /// True if this segment denotes a single element rather than a range.
    pub fn is_element(&self) -> bool {
        self.start.is_none() || self.end.is_none()
    }

    /// Representation used on the segment-by-segment command line:
    /// `name` for elements, `name,start,end` for ranges.
    pub fn to_input_string(&self) -> String {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => format!("{},{start},{end}", self.name),
            _ => self.name.clone(),
        }
    }

    /// Checks that name, start and end are not blank.
    ///
    /// # Errors
    /// [`Error::InvalidSegment`] with the offending definition.
    pub fn validate(&self) -> Result<()> {
        let blank = |value: &str| value.trim().is_empty();
        if blank(&self.name)
            || self.start.as_deref().is_some_and(blank)
            || self.end.as_deref().is_some_and(blank)
        {
            return Err(Error::InvalidSegment(self.to_input_string()));
        }
        Ok(())
    }

    /// Enabled duplicate named `"<name> - Copy"`.
    #[must_use]
    pub fn copy_named(&self) -> Self {
        Self {
            name: format!("{}{COPY_SUFFIX}", self.name),
            start: self.start.clone(),
            end: self.end.clone(),
            enabled: true,
        }
    }

    /// Appends the LHC beam suffix (`.B1`, `.B2`) to start and end.
    #[must_use]
    pub fn with_beam_suffix(mut self, beam: u8) -> Self {
        for bound in [&mut self.start, &mut self.end].into_iter().flatten() {
            bound.push_str(&format!(".B{beam}"));
        }
        self
    }
}

impl Keyed for Segment {
    fn key(&self) -> &str {
        &self.name
    }

    fn set_key(&mut self, key: String) {
        self.name = key;
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for Segment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(Error::InvalidSegment(s.to_string()));
        }
        match parts.as_slice() {
            [name] => Ok(Self::element(*name)),
            [name, start, end] => Ok(Self::range(*name, *start, *end)),
            _ => Err(Error::InvalidSegment(s.to_string())),
        }
    }
}

/// Default LHC segments for `beam`.
pub fn default_segments(beam: u8) -> Vec<Segment> {
    DEFAULT_LHC_SEGMENTS
        .iter()
        .map(|(name, start, end)| Segment::range(*name, *start, *end).with_beam_suffix(beam))
        .collect()
}

/// Reads segments from a JSON array file.
///
/// # Errors
/// Returns an error if the file cannot be opened, is not valid JSON, or
/// holds a segment with a blank name, start or end.
pub fn read_segments(path: &Path) -> Result<Vec<Segment>> {
    let reader = BufReader::new(File::open(path)?);
    let segments: Vec<Segment> = serde_json::from_reader(reader)?;
    for segment in &segments {
        segment.validate()?;
    }
    log::debug!("Read {} segments from {}", segments.len(), path.display());
    Ok(segments)
}

/// Writes segments to a JSON array file, overwriting it.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_segments<'a, I>(path: &Path, segments: I) -> Result<()>
where
    I: IntoIterator<Item = &'a Segment>,
{
    let segments: Vec<&Segment> = segments.into_iter().collect();
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &segments)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    log::debug!("Wrote {} segments to {}", segments.len(), path.display());
    Ok(())
}
