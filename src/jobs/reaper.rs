//! Signal thread that reaps children and relays terminal signals.
//!
//! This thread is the only place in the process that calls `waitpid`. It
//! never touches the job table: every status change and every interactive
//! signal is turned into a [`JobEvent`] and sent to the control thread,
//! which applies it. A child's exit status can therefore be consumed only
//! once.

use nix::errno::Errno;
use nix::libc::c_int;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use signal_hook::consts::{SIGCHLD, SIGINT, SIGTSTP};
use signal_hook::iterator::{Handle, Signals};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

/// State change of one child, as reported by `waitpid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildChange {
    Exited(i32),
    Signaled(Signal),
    Stopped,
    Continued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildEvent {
    pub pid: Pid,
    pub change: ChildChange,
}

impl ChildEvent {
    /// Classify a wait status. Returns `None` for statuses that carry no
    /// job state (ptrace stops, `StillAlive`).
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        let (pid, change) = match status {
            WaitStatus::Exited(pid, code) => (pid, ChildChange::Exited(code)),
            WaitStatus::Signaled(pid, signal, _) => (pid, ChildChange::Signaled(signal)),
            WaitStatus::Stopped(pid, _) => (pid, ChildChange::Stopped),
            WaitStatus::Continued(pid) => (pid, ChildChange::Continued),
            _ => return None,
        };
        Some(Self { pid, change })
    }
}

/// Message from the reaper thread to the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Child(ChildEvent),
    /// Interrupt or suspend request from the terminal, to be forwarded to
    /// the foreground job if there is one.
    Relay(Signal),
}

/// Handle to the running reaper thread. Dropping it stops the thread.
pub struct Reaper {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Install handlers for SIGCHLD, SIGINT and SIGTSTP and start the thread.
    pub fn spawn(tx: Sender<JobEvent>) -> std::io::Result<Self> {
        let mut signals = Signals::new([SIGCHLD, SIGINT, SIGTSTP])?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("reaper".into())
            .spawn(move || {
                for sig in signals.forever() {
                    if !dispatch(sig, &tx) {
                        break;
                    }
                }
                tracing::debug!("reaper thread exiting");
            })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Returns `false` once the control thread has hung up.
fn dispatch(sig: c_int, tx: &Sender<JobEvent>) -> bool {
    if sig == SIGCHLD {
        return drain_children(tx);
    }
    match Signal::try_from(sig) {
        Ok(signal) => tx.send(JobEvent::Relay(signal)).is_ok(),
        Err(_) => true,
    }
}

/// Collect every pending child state change without blocking.
pub(crate) fn drain_children(tx: &Sender<JobEvent>) -> bool {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match waitpid(None, Some(flags)) {
            Ok(WaitStatus::StillAlive) => return true,
            Ok(status) => {
                tracing::trace!(?status, "reaped");
                if let Some(event) = ChildEvent::from_wait_status(status) {
                    if tx.send(JobEvent::Child(event)).is_err() {
                        return false;
                    }
                }
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return true,
            Err(errno) => {
                tracing::trace!(%errno, "waitpid failed");
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_wait_statuses() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            ChildEvent::from_wait_status(WaitStatus::Exited(pid, 7)),
            Some(ChildEvent {
                pid,
                change: ChildChange::Exited(7)
            })
        );
        assert_eq!(
            ChildEvent::from_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false))
                .map(|e| e.change),
            Some(ChildChange::Signaled(Signal::SIGKILL))
        );
        assert_eq!(
            ChildEvent::from_wait_status(WaitStatus::Stopped(pid, Signal::SIGTSTP))
                .map(|e| e.change),
            Some(ChildChange::Stopped)
        );
        assert_eq!(
            ChildEvent::from_wait_status(WaitStatus::Continued(pid)).map(|e| e.change),
            Some(ChildChange::Continued)
        );
        assert_eq!(ChildEvent::from_wait_status(WaitStatus::StillAlive), None);
    }

    #[test]
    fn test_drain_returns_without_blocking() {
        let _lock = crate::jobs::tests::lock_processes();
        let (tx, _rx) = std::sync::mpsc::channel();
        // Leftover children of earlier tests may or may not exist; either
        // way the drain must come back instead of waiting.
        assert!(drain_children(&tx));
    }

    #[test]
    fn test_drain_stops_when_receiver_is_gone() {
        let _lock = crate::jobs::tests::lock_processes();
        let (tx, rx) = std::sync::mpsc::channel();
        drop(rx);
        let mut child = std::process::Command::new("/bin/sh")
            .args(["-c", "exit 0"])
            .spawn()
            .expect("spawn sh");
        // Give the child time to exit.
        std::thread::sleep(std::time::Duration::from_millis(300));
        assert!(!drain_children(&tx));
        // Its status went to the reaper, not to the `Child` handle.
        assert!(child.try_wait().is_err());
    }
}
