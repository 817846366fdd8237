//! Command-line configuration.

use argh::FromArgs;
use std::time::Duration;

/// Seconds a finished job stays listed before it is pruned.
pub const DEFAULT_RETENTION_SECS: u64 = 60;

#[derive(FromArgs, Debug)]
/// Interactive shell with job control.
pub struct ShellArgs {
    #[argh(option, default = "DEFAULT_RETENTION_SECS")]
    /// seconds to keep finished jobs in the job table (default 60)
    pub retention_secs: u64,

    #[argh(option, default = "String::from(\"warn\")")]
    /// log filter used when RUST_LOG is unset, e.g. "debug" or "job_shell=trace"
    pub log_level: String,

    #[argh(option, short = 'c')]
    /// run a single command line and exit with its status
    pub command: Option<String>,
}

impl ShellArgs {
    pub fn job_config(&self) -> JobConfig {
        JobConfig {
            retention: Duration::from_secs(self.retention_secs),
        }
    }
}

/// Settings of the job manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobConfig {
    /// How long an exited or killed job remains listed.
    pub retention: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = ShellArgs::from_args(&["job_shell"], &[]).unwrap();
        assert_eq!(args.retention_secs, 60);
        assert_eq!(args.log_level, "warn");
        assert!(args.command.is_none());
        assert_eq!(args.job_config(), JobConfig::default());
    }

    #[test]
    fn test_overrides() {
        let args = ShellArgs::from_args(
            &["job_shell"],
            &["--retention-secs", "5", "-c", "sleep 1 &", "--log-level", "debug"],
        )
        .unwrap();
        assert_eq!(args.job_config().retention, Duration::from_secs(5));
        assert_eq!(args.command.as_deref(), Some("sleep 1 &"));
        assert_eq!(args.log_level, "debug");
    }

    #[test]
    fn test_bad_retention_is_rejected() {
        assert!(ShellArgs::from_args(&["job_shell"], &["--retention-secs", "soon"]).is_err());
    }
}
