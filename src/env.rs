use crate::jobs::JobManager;
use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;

/// Variables and working directory handed to every launched job.
///
/// `cd` changes `current_dir`; `exit` raises `should_exit`, which the
/// interactive loop checks after each line.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Variables passed to child processes (PATH, HOME, USER, ...).
    pub vars: HashMap<String, String>,
    pub current_dir: PathBuf,
    pub should_exit: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Snapshot of the variables and working directory of this process.
    pub fn new() -> Self {
        Self {
            vars: stdenv::vars().collect(),
            current_dir: stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            should_exit: false,
        }
    }

    /// Look up `key` in `vars`, then in the process environment.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }
}

/// Everything a command may read or change: the environment and the jobs.
pub struct ShellState {
    pub env: Environment,
    pub jobs: JobManager,
}
