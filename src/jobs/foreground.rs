//! Foreground waits and background resumption.
//!
//! A foreground wait occupies the manager's single foreground slot and blocks
//! on the event channel until the awaited pid exits, is killed or stops.
//! Events for other children are applied along the way, and relayed
//! terminal signals go to the foreground process group.

use super::{ChildChange, JobError, JobEvent, JobId, JobManager, JobStatus};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// How a foreground wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundOutcome {
    Exited(i32),
    Signaled(Signal),
    /// The job stopped and is now tracked (or still tracked) under `job`.
    Stopped { job: JobId, pid: Pid },
}

impl ForegroundOutcome {
    /// Shell-style exit code: the exit status, or 128 + signal number.
    pub fn exit_code(&self) -> i32 {
        match self {
            ForegroundOutcome::Exited(code) => *code,
            ForegroundOutcome::Signaled(signal) => 128 + *signal as i32,
            ForegroundOutcome::Stopped { .. } => 128 + Signal::SIGTSTP as i32,
        }
    }
}

impl JobManager {
    /// Continue a job if it is stopped and wait for it in the foreground.
    ///
    /// Without an id the most recently inserted job is used.
    pub fn bring_to_foreground(&mut self, id: Option<JobId>) -> Result<ForegroundOutcome, JobError> {
        self.poll();
        let job = self.select(id)?;
        let (id, pid, status) = (job.id, job.pid, job.status);
        let command_line = job.command_line.clone();
        if status.is_terminal() {
            return Err(JobError::JobFinished(id));
        }
        if status == JobStatus::Stopped {
            signal::killpg(pid, Signal::SIGCONT).map_err(|errno| self.lookup_failure(pid, errno))?;
        }
        self.registry.set_status(id, JobStatus::Running);
        tracing::debug!(job = %id, %pid, "bringing job to foreground");
        self.wait_in_foreground(pid, Some(id), &command_line)
    }

    /// Continue a job without waiting for it.
    pub fn resume_in_background(&mut self, id: Option<JobId>) -> Result<(JobId, Pid), JobError> {
        self.poll();
        let job = self.select(id)?;
        let (id, pid, status) = (job.id, job.pid, job.status);
        if status.is_terminal() {
            return Err(JobError::JobFinished(id));
        }
        signal::killpg(pid, Signal::SIGCONT).map_err(|errno| self.lookup_failure(pid, errno))?;
        self.registry.set_status(id, JobStatus::Running);
        tracing::debug!(job = %id, %pid, "resumed in background");
        Ok((id, pid))
    }

    /// Block until `pid` exits, is killed or stops.
    ///
    /// `job` is the registry entry for `pid`, if it has one. A process that
    /// was never registered gets an entry only when it stops.
    pub(super) fn wait_in_foreground(
        &mut self,
        pid: Pid,
        job: Option<JobId>,
        command_line: &str,
    ) -> Result<ForegroundOutcome, JobError> {
        self.foreground = Some(pid);
        let result = self.wait_for(pid);
        self.foreground = None;

        let outcome = match result? {
            WaitEnd::Stopped => {
                let job = match job {
                    Some(id) => {
                        self.registry.set_status(id, JobStatus::Stopped);
                        id
                    }
                    None => self.registry.register(pid, command_line, JobStatus::Stopped),
                };
                ForegroundOutcome::Stopped { job, pid }
            }
            WaitEnd::Exited(code) => {
                if let Some(id) = job {
                    self.registry.set_status(id, JobStatus::Exited(code));
                }
                ForegroundOutcome::Exited(code)
            }
            WaitEnd::Signaled(signal) => {
                if let Some(id) = job {
                    self.registry.set_status(id, JobStatus::Signaled(signal));
                }
                ForegroundOutcome::Signaled(signal)
            }
        };
        tracing::debug!(%pid, ?outcome, "foreground wait finished");
        Ok(outcome)
    }

    fn wait_for(&mut self, pid: Pid) -> Result<WaitEnd, JobError> {
        loop {
            let event = self
                .events
                .recv()
                .map_err(|_| JobError::ReaperDisconnected)?;
            let child = match event {
                JobEvent::Relay(signal) => {
                    self.relay(signal);
                    continue;
                }
                JobEvent::Child(child) => child,
            };
            self.apply_child_event(child);
            if child.pid != pid {
                continue;
            }
            match child.change {
                ChildChange::Exited(code) => return Ok(WaitEnd::Exited(code)),
                ChildChange::Signaled(signal) => return Ok(WaitEnd::Signaled(signal)),
                ChildChange::Stopped => return Ok(WaitEnd::Stopped),
                ChildChange::Continued => {}
            }
        }
    }
}

enum WaitEnd {
    Exited(i32),
    Signaled(Signal),
    Stopped,
}
