//! The capability set every sorting backend implements.

use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::backends::BackendDescriptor;
use crate::error::ExecutionCause;
use crate::params::RunConfig;
use crate::recording::GroupSignal;

/// Output of one backend run, in the shape the backend produces it.
/// Only the normalizer reads this.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    /// One row per detected event
    LabeledEvents(Vec<LabeledEvent>),
    /// One spike train per backend label
    LabelTrains(Vec<(i64, Vec<i64>)>),
}

impl RawOutput {
    pub fn num_events(&self) -> usize {
        match self {
            Self::LabeledEvents(events) => events.len(),
            Self::LabelTrains(trains) => trains.iter().map(|(_, t)| t.len()).sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabeledEvent {
    /// Position of the channel inside the group
    pub channel: usize,
    pub sample: i64,
    pub label: i64,
}

/// Everything an adapter needs besides the signal itself
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub config: &'a RunConfig,
    pub timeout: Option<Duration>,
    /// Scratch directory owned by this group run
    pub work_dir: &'a Path,
}

impl RunContext<'_> {
    pub fn check_deadline(&self, started: Instant) -> Result<(), ExecutionCause> {
        match self.timeout {
            Some(limit) if started.elapsed() > limit => Err(ExecutionCause::Timeout(limit)),
            _ => Ok(()),
        }
    }
}

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    Execution(#[from] ExecutionCause),

    /// The backend refused a schema-valid configuration
    #[error("{0}")]
    Rejected(String),
}

/// A pluggable sorting backend
pub trait SorterAdapter: Send + Sync {
    fn descriptor(&self) -> &'static BackendDescriptor;

    fn is_installed(&self) -> bool {
        self.descriptor().is_installed()
    }

    /// Sort one channel group. Must not touch anything outside `ctx.work_dir`.
    fn run(&self, signal: &GroupSignal, ctx: &RunContext<'_>) -> Result<RawOutput, AdapterError>;
}

/// Run an external command to completion, killing it once `timeout` passes.
///
/// stdout and stderr go to `backend.log` / `backend.err` inside `work_dir` so a
/// chatty backend cannot block on a full pipe.
pub fn run_process(
    mut command: Command,
    timeout: Option<Duration>,
    work_dir: &Path,
) -> Result<(), ExecutionCause> {
    let stdout_path = work_dir.join("backend.log");
    let stderr_path = work_dir.join("backend.err");

    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(File::create(&stdout_path)?))
        .stderr(Stdio::from(File::create(&stderr_path)?));

    log::info!("Executing backend command: {:?}", command);
    let start = Instant::now();
    let mut child = command.spawn().map_err(ExecutionCause::Spawn)?;

    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if let Some(limit) = timeout {
                    if start.elapsed() > limit {
                        if let Err(e) = child.kill() {
                            log::warn!("Failed to kill backend process {}: {}", child.id(), e);
                        }
                        if let Err(e) = child.wait() {
                            log::warn!("Failed to reap backend process {}: {}", child.id(), e);
                        }
                        log::error!("Backend process killed after {:?}", limit);
                        return Err(ExecutionCause::Timeout(limit));
                    }
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    };

    log::info!(
        "Backend process finished in {:.2}s",
        start.elapsed().as_secs_f64()
    );

    if !status.success() {
        let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(20)..].join("\n");
        log::error!("Backend failed with status: {}", status);
        log::error!("stderr: {}", tail);
        return Err(ExecutionCause::ExitStatus {
            status: status.to_string(),
            stderr: tail,
        });
    }

    Ok(())
}
