//! Headless session controller.
//!
//! Holds the loaded measurements, the current selection and the running
//! jobs, and implements the user actions of the segment-by-segment window
//! on top of them. Errors are logged where they occur and returned, so a
//! front end only has to decide how to surface them.

use std::sync::Arc;

use sbs_core::{BackgroundJob, Change, RunningJobs, SubscriptionId, UniqueKeyedCollection};

use crate::measurement::OpticsMeasurement;
use crate::runner::SegmentBySegment;
use crate::segment::{default_segments, Segment, NEW_SEGMENT_NAME};
use crate::{Error, Result};

/// Loaded measurements, selection and background jobs of one user session.
pub struct Session {
    measurements: UniqueKeyedCollection<OpticsMeasurement>,
    selected: Vec<String>,
    jobs: RunningJobs,
    runner: Arc<dyn SegmentBySegment>,
}

impl Session {
    /// Creates an empty session running segment-by-segment via `runner`.
    pub fn new(runner: Arc<dyn SegmentBySegment>) -> Self {
        Self {
            measurements: UniqueKeyedCollection::new(),
            selected: Vec::new(),
            jobs: RunningJobs::new(),
            runner,
        }
    }

    /// Loaded measurements.
    pub fn measurements(&self) -> &UniqueKeyedCollection<OpticsMeasurement> {
        &self.measurements
    }

    /// Registers a view to be told about changes to the measurement list.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&Change) + 'static,
    {
        self.measurements.subscribe(callback)
    }

    /// Removes a view registered with [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.measurements.unsubscribe(id)
    }

    /// Adds measurements, rejecting duplicates by name.
    ///
    /// Incomplete metadata and duplicates are logged as errors. The newly
    /// added measurements become the selection; their names are returned.
    pub fn load_measurements<I>(&mut self, measurements: I) -> Vec<String>
    where
        I: IntoIterator<Item = OpticsMeasurement>,
    {
        let before = self.measurements.len();
        let measurements = measurements.into_iter().inspect(|m| {
            log::debug!("Adding measurement {}", m.measurement_dir().display());
            let missing = m.missing_metadata();
            if !missing.is_empty() {
                log::error!(
                    "Info for measurement '{}' is incomplete (missing {}). Adjust manually!",
                    m.name(),
                    missing.join(", ")
                );
            }
        });
        if let Err(e) = self.measurements.add_all(measurements) {
            log::error!("{e}");
        }

        let added: Vec<String> = self
            .measurements
            .keys()
            .skip(before)
            .map(str::to_string)
            .collect();
        if !added.is_empty() {
            self.selected.clone_from(&added);
        }
        added
    }

    /// Removes measurements and drops them from the selection.
    ///
    /// # Errors
    /// Names every measurement that was not loaded.
    pub fn remove_measurements<I, K>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let result = self.measurements.remove_all(names);
        let measurements = &self.measurements;
        self.selected.retain(|name| measurements.contains(name));
        result.map_err(|e| {
            log::error!("{e}");
            e.into()
        })
    }

    /// Renames a measurement, keeping it selected if it was.
    ///
    /// # Errors
    /// Unknown measurement, empty or already used new name.
    pub fn rename_measurement(&mut self, old: &str, new: &str) -> Result<()> {
        if new.trim().is_empty() {
            return Err(Error::EmptyMeasurementName);
        }
        self.measurements.re_key(old, new)?;
        for name in &mut self.selected {
            if name == old {
                *name = new.to_string();
            }
        }
        Ok(())
    }

    /// Replaces the selection.
    ///
    /// # Errors
    /// Names every measurement that is not loaded; the selection is kept.
    pub fn select<I, K>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.measurements.contains(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(sbs_core::Error::NotFound { keys: missing }.into());
        }
        log::debug!("Selected {} measurements", names.len());
        self.selected = names;
        Ok(())
    }

    /// Names of the selected measurements.
    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    /// Adds a segment named "New Segment" to every selected measurement.
    ///
    /// # Errors
    /// [`Error::NoSelection`], or the first per-measurement failure.
    pub fn new_segment(&mut self) -> Result<()> {
        log::debug!("Creating new segment");
        self.for_each_selected(|m| {
            m.segments_mut()
                .add(Segment::element(NEW_SEGMENT_NAME))
                .map_err(Error::from)
        })
    }

    /// Adds the given segment definitions to every selected measurement,
    /// e.g. after reading them from a segment file.
    ///
    /// # Errors
    /// [`Error::NoSelection`], an invalid definition, or names already
    /// taken in a measurement.
    pub fn add_segments(&mut self, segments: &[Segment]) -> Result<()> {
        log::debug!("Adding {} segments", segments.len());
        for segment in segments {
            segment.validate()?;
        }
        self.for_each_selected(|m| {
            m.segments_mut().add_all(segments.iter().cloned())?;
            Ok(())
        })
    }

    /// Adds a copy of the given segments to every selected measurement.
    ///
    /// # Errors
    /// [`Error::NoSelection`], or the first per-measurement failure
    /// (missing source segment, copy name already taken).
    pub fn copy_segments<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        log::debug!("Copying {} segments", names.len());
        self.for_each_selected(|m| {
            let copies = names
                .iter()
                .map(|name| {
                    m.segments()
                        .get(name.as_ref())
                        .map(Segment::copy_named)
                        .ok_or_else(|| sbs_core::Error::NotFound {
                            keys: vec![name.as_ref().to_string()],
                        })
                })
                .collect::<sbs_core::Result<Vec<_>>>()?;
            m.segments_mut().add_all(copies)?;
            Ok(())
        })
    }

    /// Adds the default LHC segments to every selected measurement.
    ///
    /// Measurements without a beam are skipped with an error message.
    ///
    /// # Errors
    /// [`Error::NoSelection`], or duplicates in one of the measurements.
    pub fn add_default_segments(&mut self) -> Result<()> {
        log::debug!("Adding default segments");
        self.for_each_selected(|m| {
            let Some(beam) = m.info.beam else {
                log::error!(
                    "No beam found in measurement {}. Cannot add default segments.",
                    m.name()
                );
                return Ok(());
            };
            m.segments_mut().add_all(default_segments(beam))?;
            Ok(())
        })
    }

    /// Removes the given segments from every selected measurement.
    ///
    /// # Errors
    /// [`Error::NoSelection`], or segments absent from a measurement.
    pub fn remove_segments<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        log::debug!("Removing {} segments", names.len());
        self.for_each_selected(|m| {
            m.segments_mut().remove_all(names)?;
            Ok(())
        })
    }

    /// Renames a segment of one measurement.
    ///
    /// # Errors
    /// Unknown measurement or segment, empty `new`, or `new` already in use.
    pub fn rename_segment(&mut self, measurement: &str, old: &str, new: &str) -> Result<()> {
        if new.trim().is_empty() {
            return Err(Error::InvalidSegment(new.to_string()));
        }
        self.measurements.try_modify(measurement, |m| {
            m.segments_mut().re_key(old, new).map_err(Error::from)
        })
    }

    /// Changes start and end of a segment of one measurement.
    ///
    /// # Errors
    /// Unknown measurement or segment, or an empty start or end.
    pub fn set_segment_range(
        &mut self,
        measurement: &str,
        name: &str,
        start: Option<String>,
        end: Option<String>,
    ) -> Result<()> {
        let mut range = Segment::element(name);
        range.start = start;
        range.end = end;
        range.validate()?;
        self.measurements.try_modify(measurement, |m| {
            m.segments_mut()
                .modify(name, |segment| {
                    segment.start = range.start;
                    segment.end = range.end;
                })
                .map_err(Error::from)
        })
    }

    /// Flips the enabled flag of a segment and returns the new value.
    ///
    /// # Errors
    /// Unknown measurement or segment.
    pub fn toggle_segment(&mut self, measurement: &str, name: &str) -> Result<bool> {
        self.measurements.try_modify(measurement, |m| {
            m.segments_mut()
                .modify(name, |segment| {
                    segment.enabled = !segment.enabled;
                    segment.enabled
                })
                .map_err(Error::from)
        })
    }

    /// Starts one background job per selected measurement.
    ///
    /// With no `names`, every enabled segment of each measurement runs.
    /// Each job works on a snapshot, so the session stays editable while
    /// jobs run. Returns the number of jobs started.
    ///
    /// # Errors
    /// [`Error::NoSelection`], or the first failure if no job could start.
    pub fn run_segments<S: AsRef<str>>(&mut self, names: &[S]) -> Result<usize> {
        let selected = self.require_selection()?;
        let mut started = 0;
        let mut first_error = None;

        for key in &selected {
            let submitted = self
                .measurements
                .get(key)
                .ok_or_else(|| sbs_core::Error::NotFound {
                    keys: vec![key.clone()],
                })
                .map_err(Error::from)
                .and_then(|m| m.snapshot(names))
                .and_then(|input| {
                    let runner = Arc::clone(&self.runner);
                    let job = BackgroundJob::new(
                        format!("segment-by-segment {}", input.measurement),
                        move || {
                            runner.run(&input)?;
                            Ok(())
                        },
                    );
                    self.jobs.submit(job).map_err(Error::from)
                });
            match submitted {
                Ok(()) => started += 1,
                Err(e) => {
                    log::error!("Cannot run segment-by-segment on '{key}': {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if started == 0 => Err(e),
            _ => Ok(started),
        }
    }

    /// Reaps jobs that finished since the last call.
    pub fn poll_jobs(&mut self) -> Vec<BackgroundJob> {
        self.jobs.poll()
    }

    /// Blocks until every running job finished and returns them.
    pub fn wait_jobs(&mut self) -> Vec<BackgroundJob> {
        self.jobs.wait_all()
    }

    /// Number of jobs still running.
    pub fn running_jobs(&self) -> usize {
        self.jobs.running_count()
    }

    /// "Ready" or "N tasks running...".
    pub fn status_text(&self) -> String {
        self.jobs.status_text()
    }

    fn require_selection(&self) -> Result<Vec<String>> {
        if self.selected.is_empty() {
            log::error!("Please select at least one measurement.");
            return Err(Error::NoSelection);
        }
        Ok(self.selected.clone())
    }

    /// Applies `edit` to every selected measurement, continuing past
    /// failures, and returns the first one. Views are notified once.
    fn for_each_selected<F>(&mut self, edit: F) -> Result<()>
    where
        F: FnMut(&mut OpticsMeasurement) -> Result<()>,
    {
        let selected = self.require_selection()?;
        let failures = self.measurements.modify_each(&selected, edit);
        let mut first_error = None;
        for (key, e) in failures {
            log::error!("{key}: {e}");
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }
}
