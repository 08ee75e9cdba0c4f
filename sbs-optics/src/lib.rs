//! sbs-optics: Measurements, segments and the segment-by-segment session.
//!
//! This crate provides the domain records shown in the measurement list
//! and segment table, the seam to the external segment-by-segment
//! computation, and a headless controller implementing the user actions.
//!

mod error;
pub mod measurement;
pub mod runner;
pub mod segment;
pub mod session;

pub use error::{Error, Result};
pub use measurement::{lhc_model_year, AcceleratorInfo, OpticsMeasurement};
pub use runner::{CommandRunner, RunnerConfig, SbsInput, SegmentBySegment};
pub use segment::{default_segments, read_segments, write_segments, Segment};
pub use session::Session;
