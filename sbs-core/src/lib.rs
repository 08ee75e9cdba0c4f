//! sbs-core: Keyed collections and background jobs for segment-by-segment sessions.
//!
//! This crate provides the two building blocks every front end shares:
//! an ordered collection that keeps items unique by key and notifies
//! subscribers per batch, and a job wrapper that runs one fallible task on
//! its own worker thread.
//!

pub mod collection;
pub mod error;
pub mod job;

pub use collection::{Change, ChangeKind, Keyed, SubscriptionId, UniqueKeyedCollection};
pub use error::{Error, Result};
pub use job::{BackgroundJob, JobFailure, JobReport, JobState, RunningJobs};
