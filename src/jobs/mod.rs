//! Job control: the job table, process launching, reaping, foreground and
//! background transitions, signal relay and retention of finished jobs.
//!
//! All job state lives in one [`JobManager`] owned by the control thread.
//! Child status changes and terminal signals arrive from the reaper thread
//! as [`JobEvent`]s over a channel and are applied by the manager itself,
//! either in [`JobManager::poll`] or while it waits for a foreground job.

mod foreground;
mod launcher;
mod reaper;
mod registry;

pub use foreground::ForegroundOutcome;
pub use reaper::{ChildChange, ChildEvent, JobEvent};
pub use registry::{Job, JobId, JobRegistry, JobStatus};

use crate::config::JobConfig;
use crate::env::Environment;
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::Pid;
use reaper::Reaper;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{program}: {}", launch_reason(.source))]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("empty command")]
    EmptyCommand,
    #[error("%{0}: no such job")]
    UnknownJob(JobId),
    #[error("no such job")]
    NoCurrentJob,
    #[error("invalid pid/job: {0}")]
    InvalidToken(String),
    #[error("({pid}) - no such process")]
    ProcessLookup { pid: Pid },
    #[error("%{0}: job has terminated")]
    JobFinished(JobId),
    #[error("lost contact with the reaper thread")]
    ReaperDisconnected,
    #[error("failed to install signal handlers: {0}")]
    Setup(#[from] std::io::Error),
    #[error(transparent)]
    Signal(#[from] Errno),
}

fn launch_reason(source: &std::io::Error) -> String {
    if source.kind() == std::io::ErrorKind::NotFound {
        "command not found".to_string()
    } else {
        source.to_string()
    }
}

/// Argument of `kill`: a bare pid or a `%N` job reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillTarget {
    Pid(Pid),
    Job(JobId),
}

impl FromStr for KillTarget {
    type Err = JobError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let invalid = || JobError::InvalidToken(token.to_string());
        match token.strip_prefix('%') {
            Some(id) => id
                .parse::<u32>()
                .ok()
                .filter(|&id| id > 0)
                .map(|id| KillTarget::Job(JobId(id)))
                .ok_or_else(invalid),
            None => token
                .parse::<i32>()
                .ok()
                .filter(|&pid| pid > 0)
                .map(|pid| KillTarget::Pid(Pid::from_raw(pid)))
                .ok_or_else(invalid),
        }
    }
}

/// Result of [`JobManager::launch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Background { job: JobId, pid: Pid },
    Foreground(ForegroundOutcome),
}

/// Owner of the job table and the foreground slot.
pub struct JobManager {
    registry: JobRegistry,
    foreground: Option<Pid>,
    events: Receiver<JobEvent>,
    config: JobConfig,
    _reaper: Option<Reaper>,
}

impl JobManager {
    /// Create the manager and start the reaper thread.
    ///
    /// Also ignores SIGTTOU and SIGTTIN so that terminal arbitration never
    /// stops the shell. Children inherit the ignored disposition.
    pub fn new(config: JobConfig) -> Result<Self, JobError> {
        // SAFETY: installing SIG_IGN does not run any handler code.
        unsafe {
            signal::signal(Signal::SIGTTOU, SigHandler::SigIgn)?;
            signal::signal(Signal::SIGTTIN, SigHandler::SigIgn)?;
        }
        let (tx, rx) = mpsc::channel();
        let reaper = Reaper::spawn(tx)?;
        let mut manager = Self::with_events(config, rx);
        manager._reaper = Some(reaper);
        Ok(manager)
    }

    /// A manager fed from an arbitrary event source, with no reaper thread.
    pub fn with_events(config: JobConfig, events: Receiver<JobEvent>) -> Self {
        Self {
            registry: JobRegistry::new(),
            foreground: None,
            events,
            config,
            _reaper: None,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Pid currently occupying the foreground slot.
    pub fn foreground(&self) -> Option<Pid> {
        self.foreground
    }

    /// Spawn `argv` in its own process group.
    ///
    /// A background job is registered as `Running` right away. A foreground
    /// process is only registered if it stops.
    ///
    /// Pending events are applied first, while the foreground slot is still
    /// empty, so a terminal signal received at the prompt is dropped instead
    /// of reaching the new process.
    pub fn launch(
        &mut self,
        argv: &[String],
        background: bool,
        env: &Environment,
    ) -> Result<LaunchOutcome, JobError> {
        self.poll();
        let pid = launcher::spawn_in_new_group(argv, env)?;
        let command_line = argv.join(" ");
        if background {
            let job = self.registry.register(pid, command_line, JobStatus::Running);
            tracing::debug!(%job, %pid, "background job started");
            Ok(LaunchOutcome::Background { job, pid })
        } else {
            self.wait_in_foreground(pid, None, &command_line)
                .map(LaunchOutcome::Foreground)
        }
    }

    /// Apply every queued event without blocking.
    pub fn poll(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Snapshot of every job in insertion order, after applying pending events.
    pub fn list_jobs(&mut self) -> Vec<Job> {
        self.poll();
        self.registry.iter().cloned().collect()
    }

    /// Send SIGTERM to a pid or to a job's process group.
    pub fn terminate(&mut self, token: &str) -> Result<KillTarget, JobError> {
        let target: KillTarget = token.parse()?;
        self.poll();
        match target {
            KillTarget::Pid(pid) => {
                signal::kill(pid, Signal::SIGTERM).map_err(|errno| self.lookup_failure(pid, errno))?;
            }
            KillTarget::Job(id) => {
                let job = self
                    .registry
                    .lookup_by_id(id)
                    .ok_or(JobError::UnknownJob(id))?;
                if job.status.is_terminal() {
                    return Err(JobError::JobFinished(id));
                }
                let pid = job.pid;
                signal::killpg(pid, Signal::SIGTERM)
                    .map_err(|errno| self.lookup_failure(pid, errno))?;
            }
        }
        tracing::debug!(?target, "sent SIGTERM");
        Ok(target)
    }

    /// Drop finished jobs older than the retention window.
    pub fn prune_expired(&mut self) -> Vec<JobId> {
        self.prune_at(Instant::now())
    }

    pub fn prune_at(&mut self, now: Instant) -> Vec<JobId> {
        let removed = self.registry.prune_older_than(self.config.retention, now);
        if !removed.is_empty() {
            tracing::debug!(?removed, "pruned finished jobs");
        }
        removed
    }

    /// Send SIGTERM to the process group of every live job and forget all
    /// records. Does not wait for the jobs to exit.
    pub fn shutdown(&mut self) {
        self.poll();
        for pid in self.registry.live_pids() {
            if let Err(errno) = signal::killpg(pid, Signal::SIGTERM) {
                tracing::debug!(%pid, %errno, "SIGTERM on shutdown failed");
                continue;
            }
            let stopped = self
                .registry
                .lookup_by_pid(pid)
                .is_some_and(|job| job.status == JobStatus::Stopped);
            if stopped {
                if let Err(errno) = signal::killpg(pid, Signal::SIGCONT) {
                    tracing::debug!(%pid, %errno, "SIGCONT on shutdown failed");
                }
            }
        }
        self.registry.clear();
    }

    fn handle_event(&mut self, event: JobEvent) {
        match event {
            JobEvent::Child(child) => self.apply_child_event(child),
            JobEvent::Relay(signal) => self.relay(signal),
        }
    }

    fn apply_child_event(&mut self, event: ChildEvent) {
        let status = match event.change {
            ChildChange::Exited(code) => JobStatus::Exited(code),
            ChildChange::Signaled(signal) => JobStatus::Signaled(signal),
            ChildChange::Stopped => JobStatus::Stopped,
            ChildChange::Continued => JobStatus::Running,
        };
        if self.registry.update_status(event.pid, status) {
            tracing::debug!(pid = %event.pid, %status, "job status changed");
        }
    }

    /// Forward a terminal signal to the foreground process group. With no
    /// foreground job the signal is dropped and the prompt simply returns.
    fn relay(&self, signal: Signal) {
        let Some(pgid) = self.foreground else {
            tracing::trace!(?signal, "no foreground job, signal dropped");
            return;
        };
        match signal::killpg(pgid, signal) {
            Ok(()) => tracing::debug!(?signal, %pgid, "relayed to foreground job"),
            Err(errno) => tracing::debug!(?signal, %pgid, %errno, "relay failed"),
        }
    }

    /// Map a failed signal to an error. A vanished live job is marked `Done`.
    fn lookup_failure(&mut self, pid: Pid, errno: Errno) -> JobError {
        if errno != Errno::ESRCH {
            tracing::warn!(%pid, %errno, "signal delivery failed");
            return JobError::Signal(errno);
        }
        if let Some(id) = self.registry.lookup_by_pid(pid).map(|job| job.id) {
            self.registry.set_status(id, JobStatus::Done);
        }
        JobError::ProcessLookup { pid }
    }

    /// Pick a job by id, or the most recently inserted one.
    fn select(&self, id: Option<JobId>) -> Result<&Job, JobError> {
        match id {
            Some(id) => self.registry.lookup_by_id(id).ok_or(JobError::UnknownJob(id)),
            None => self.registry.last().ok_or(JobError::NoCurrentJob),
        }
    }
}
