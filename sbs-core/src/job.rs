//! Background jobs for long-running, fallible work.
//!
//! A [`BackgroundJob`] runs one task on its own worker thread. The worker
//! reports back over a channel; the thread that started the job picks the
//! outcome up with [`BackgroundJob::poll`] (interactive loops) or
//! [`BackgroundJob::wait`] (headless use), and the registered callbacks run
//! there, never on the worker.
//!
//! State machine: `Created -> Running -> {Completed, Failed}`. There is no
//! cancellation; a started job runs until its task returns.

use std::any::Any;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Lifecycle state of a [`BackgroundJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Constructed, not yet started.
    Created,
    /// Task is executing on the worker thread.
    Running,
    /// Task returned `Ok`.
    Completed,
    /// Task returned an error or panicked.
    Failed,
}

impl JobState {
    /// Returns true for `Completed` and `Failed`.
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Created => write!(f, "created"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Passed to completion callbacks.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Name of the job.
    pub job: String,
    /// Wall time between start and completion.
    pub elapsed: Duration,
}

/// Passed to failure callbacks and kept on the failed job.
#[derive(Debug, Clone)]
pub struct JobFailure {
    /// Name of the job.
    pub job: String,
    /// Full error description, including the error's cause chain.
    pub message: String,
    /// Wall time between start and failure.
    pub elapsed: Duration,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job '{}' failed: {}", self.job, self.message)
    }
}

type Task = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;
type CompletedCallback = Box<dyn FnMut(&JobReport)>;
type FailedCallback = Box<dyn FnMut(&JobFailure)>;

/// Message sent from the worker thread back to the job.
enum Outcome {
    Completed,
    Failed(String),
}

/// One unit of work executed on a dedicated worker thread.
///
/// The job itself is not `Send`: callbacks run on the thread that owns it.
pub struct BackgroundJob {
    name: String,
    task: Option<Task>,
    state: JobState,
    started: Option<Instant>,
    failure: Option<JobFailure>,
    rx: Option<Receiver<Outcome>>,
    handle: Option<JoinHandle<()>>,
    on_completed: Vec<CompletedCallback>,
    on_failed: Vec<FailedCallback>,
}

impl fmt::Debug for BackgroundJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundJob")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

impl BackgroundJob {
    /// Wraps `task` into a job in the `Created` state.
    pub fn new<F>(name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            task: Some(Box::new(task)),
            state: JobState::Created,
            started: None,
            failure: None,
            rx: None,
            handle: None,
            on_completed: Vec::new(),
            on_failed: Vec::new(),
        }
    }

    /// Registers a callback run once when the task returns `Ok`.
    #[must_use]
    pub fn on_completed<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&JobReport) + 'static,
    {
        self.on_completed.push(Box::new(callback));
        self
    }

    /// Registers a callback run once when the task fails.
    #[must_use]
    pub fn on_failed<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&JobFailure) + 'static,
    {
        self.on_failed.push(Box::new(callback));
        self
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, as of the last `poll`/`wait`.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Failure details once the job is `Failed`.
    pub fn failure(&self) -> Option<&JobFailure> {
        self.failure.as_ref()
    }

    /// Starts the task on a new worker thread.
    ///
    /// # Errors
    /// - [`Error::InvalidState`] if the job was started before.
    /// - [`Error::Spawn`] if the OS refused to create the thread; the job
    ///   is then `Failed` and its task is gone.
    pub fn start(&mut self) -> Result<()> {
        let task = match (self.state, self.task.take()) {
            (JobState::Created, Some(task)) => task,
            (state, _) => {
                return Err(Error::InvalidState {
                    job: self.name.clone(),
                    state,
                })
            }
        };

        let (tx, rx) = channel();
        let spawned = thread::Builder::new()
            .name(self.name.replace('\0', ""))
            .spawn(move || {
                let outcome = match task() {
                    Ok(()) => Outcome::Completed,
                    Err(e) => Outcome::Failed(format!("{e:#}")),
                };
                // The receiver is gone only if the job was dropped.
                let _ = tx.send(outcome);
            });

        let started = Instant::now();
        self.started = Some(started);
        match spawned {
            Ok(handle) => {
                log::info!("Started background job '{}'", self.name);
                self.state = JobState::Running;
                self.rx = Some(rx);
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                log::error!("Could not start background job '{}': {e}", self.name);
                self.state = JobState::Failed;
                self.failure = Some(JobFailure {
                    job: self.name.clone(),
                    message: e.to_string(),
                    elapsed: started.elapsed(),
                });
                Err(Error::Spawn(e))
            }
        }
    }

    /// Checks for an outcome without blocking and fires callbacks if one
    /// arrived. Returns the (possibly updated) state.
    pub fn poll(&mut self) -> JobState {
        if self.state != JobState::Running {
            return self.state;
        }
        let outcome = match self.rx.as_ref().map(Receiver::try_recv) {
            Some(Ok(outcome)) => Some(outcome),
            Some(Err(TryRecvError::Empty)) => return self.state,
            Some(Err(TryRecvError::Disconnected)) | None => None,
        };
        self.finish(outcome);
        self.state
    }

    /// Blocks until the task finishes, then fires callbacks.
    pub fn wait(&mut self) -> JobState {
        if self.state != JobState::Running {
            return self.state;
        }
        let outcome = self.rx.as_ref().and_then(|rx| rx.recv().ok());
        self.finish(outcome);
        self.state
    }

    /// Records the outcome. `None` means the worker hung up without
    /// reporting, i.e. the task panicked.
    fn finish(&mut self, outcome: Option<Outcome>) {
        self.rx = None;
        let joined = self.handle.take().map(JoinHandle::join);
        let elapsed = self.started.map_or(Duration::ZERO, |s| s.elapsed());

        let outcome = match (outcome, joined) {
            (Some(outcome), _) => outcome,
            (None, Some(Err(payload))) => {
                Outcome::Failed(format!("worker panicked: {}", panic_message(&*payload)))
            }
            (None, _) => Outcome::Failed("worker exited without reporting".to_string()),
        };

        match outcome {
            Outcome::Completed => {
                self.state = JobState::Completed;
                log::info!(
                    "Background job '{}' completed in {:.2}s",
                    self.name,
                    elapsed.as_secs_f64()
                );
                let report = JobReport {
                    job: self.name.clone(),
                    elapsed,
                };
                for callback in &mut self.on_completed {
                    callback(&report);
                }
            }
            Outcome::Failed(message) => {
                self.state = JobState::Failed;
                log::error!("Background job '{}' failed: {message}", self.name);
                let failure = JobFailure {
                    job: self.name.clone(),
                    message,
                    elapsed,
                };
                for callback in &mut self.on_failed {
                    callback(&failure);
                }
                self.failure = Some(failure);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

/// Jobs started by one owner and not yet reaped.
///
/// Backs the "N tasks running..." indicator of an interactive front end.
#[derive(Debug, Default)]
pub struct RunningJobs {
    jobs: Vec<BackgroundJob>,
}

impl RunningJobs {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `job` and keeps track of it.
    ///
    /// # Errors
    /// Whatever [`BackgroundJob::start`] returns; the job is not tracked.
    pub fn submit(&mut self, mut job: BackgroundJob) -> Result<()> {
        job.start()?;
        self.jobs.push(job);
        Ok(())
    }

    /// Polls every job and returns those that finished since the last call.
    pub fn poll(&mut self) -> Vec<BackgroundJob> {
        for job in &mut self.jobs {
            job.poll();
        }
        self.reap()
    }

    /// Waits for every tracked job and returns all of them.
    pub fn wait_all(&mut self) -> Vec<BackgroundJob> {
        for job in &mut self.jobs {
            job.wait();
        }
        self.reap()
    }

    /// Number of jobs still running.
    pub fn running_count(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true when nothing is running.
    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty()
    }

    /// User-facing status line.
    pub fn status_text(&self) -> String {
        match self.jobs.len() {
            0 => "Ready".to_string(),
            1 => "1 task running...".to_string(),
            n => format!("{n} tasks running..."),
        }
    }

    fn reap(&mut self) -> Vec<BackgroundJob> {
        let (finished, running) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|job| job.state().is_finished());
        self.jobs = running;
        finished
    }
}
