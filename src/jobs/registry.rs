//! Job table: insertion-ordered job records plus a pid index of live jobs.

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Small positive job number shown to the user as `[N]` or `%N`.
///
/// Ids start at 1 and are never reused for the lifetime of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u32);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
    /// Exited normally with the given code.
    Exited(i32),
    /// Killed by the given signal.
    Signaled(Signal),
    /// Gone, cause unknown.
    Done,
}

impl JobStatus {
    /// `Running` and `Stopped` jobs are live; everything else is final.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running | JobStatus::Stopped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Stopped => write!(f, "Stopped"),
            JobStatus::Exited(code) => write!(f, "Exited({})", code),
            JobStatus::Signaled(signal) => write!(f, "Signaled({})", *signal as i32),
            JobStatus::Done => write!(f, "Done"),
        }
    }
}

/// One launched process and its process group.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// Leader pid, which is also the process group id.
    pub pid: Pid,
    pub command_line: String,
    pub status: JobStatus,
    pub start_time: Instant,
}

impl Job {
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            JobStatus::Exited(code) => Some(code),
            _ => None,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start_time)
    }
}

/// Ordered collection of jobs.
///
/// The pid index holds an entry exactly for the jobs whose status is not
/// terminal. Every mutation goes through [`JobRegistry::set_status`] or
/// [`JobRegistry::update_status`], which keep the index in sync. None of the
/// operations fail on a missing job; they return `None`/`false` instead.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: Vec<Job>,
    by_pid: HashMap<Pid, JobId>,
    next_id: u32,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            by_pid: HashMap::new(),
            next_id: 1,
        }
    }

    /// Insert a new job and return its freshly allocated id.
    pub fn register(
        &mut self,
        pid: Pid,
        command_line: impl Into<String>,
        status: JobStatus,
    ) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        self.jobs.push(Job {
            id,
            pid,
            command_line: command_line.into(),
            status,
            start_time: Instant::now(),
        });
        if !status.is_terminal() {
            self.by_pid.insert(pid, id);
        }
        id
    }

    pub fn lookup_by_id(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    /// Resolve a pid through the live index. Finished jobs do not resolve.
    pub fn lookup_by_pid(&self, pid: Pid) -> Option<&Job> {
        let id = *self.by_pid.get(&pid)?;
        self.lookup_by_id(id)
    }

    /// Update the live job owning `pid`. Returns `false` if there is none.
    pub fn update_status(&mut self, pid: Pid, status: JobStatus) -> bool {
        match self.by_pid.get(&pid) {
            Some(&id) => self.set_status(id, status),
            None => false,
        }
    }

    /// Update a job by id, adding or removing its pid index entry to match
    /// the new status.
    pub fn set_status(&mut self, id: JobId, status: JobStatus) -> bool {
        let Some(job) = self.jobs.iter_mut().find(|job| job.id == id) else {
            return false;
        };
        job.status = status;
        if status.is_terminal() {
            if self.by_pid.get(&job.pid) == Some(&id) {
                self.by_pid.remove(&job.pid);
            }
        } else {
            self.by_pid.insert(job.pid, id);
        }
        true
    }

    /// Drop the pid index entry; the record stays listed until pruned.
    pub fn retire(&mut self, pid: Pid) -> bool {
        self.by_pid.remove(&pid).is_some()
    }

    /// Remove finished jobs older than `max_age`. Returns the removed ids.
    pub fn prune_older_than(&mut self, max_age: Duration, now: Instant) -> Vec<JobId> {
        let mut removed = Vec::new();
        self.jobs.retain(|job| {
            let expired = job.status.is_terminal() && job.age(now) > max_age;
            if expired {
                removed.push(job.id);
            }
            !expired
        });
        removed
    }

    /// Most recently inserted job, whatever its status.
    pub fn last(&self) -> Option<&Job> {
        self.jobs.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn live_pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.by_pid.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Forget every record and index entry. The id counter keeps counting.
    pub fn clear(&mut self) {
        self.jobs.clear();
        self.by_pid.clear();
    }
}
