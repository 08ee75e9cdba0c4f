//! Error types for sbs-optics.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for measurement, segment and session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while editing sessions or invoking segment-by-segment.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Segment or configuration file could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Collection or job error.
    #[error(transparent)]
    Core(#[from] sbs_core::Error),

    /// A segment definition could not be parsed.
    #[error("invalid segment definition '{0}': expected 'name' or 'name,start,end'")]
    InvalidSegment(String),

    /// A measurement was renamed to an empty name.
    #[error("measurement name must not be empty")]
    EmptyMeasurementName,

    /// An operation on selected measurements was requested without selection.
    #[error("no measurement selected")]
    NoSelection,

    /// Measurement metadata required to run is missing.
    #[error("measurement '{measurement}' has no {field}; adjust it manually")]
    IncompleteMeasurement {
        measurement: String,
        field: &'static str,
    },

    /// Nothing to run for a measurement.
    #[error("measurement '{0}' has no enabled segments to run")]
    NoSegments(String),

    /// The external segment-by-segment program failed.
    #[error("'{}' exited with {status}: {stderr}", program.display())]
    Command {
        program: PathBuf,
        status: String,
        stderr: String,
    },
}
