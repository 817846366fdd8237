use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::env::{Environment, ShellState};
use crate::interpreter::Factory;
use crate::jobs::{ForegroundOutcome, JobError, LaunchOutcome};
use crate::parser::CommandLine;
use anyhow::Result;
use std::borrow::Cow;
use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Exit code reported when a program could not be started.
const COMMAND_NOT_RUN: ExitCode = 127;

/// Command that is not a builtin; launched as a job.
pub struct ExternalCommand {
    argv: Vec<String>,
    background: bool,
}

impl ExternalCommand {
    pub fn new(argv: Vec<String>, background: bool) -> Self {
        Self { argv, background }
    }
}

/// Catch-all factory: anything that is not a builtin is handed to the
/// launcher, which reports a missing executable itself.
impl CommandFactory for Factory<ExternalCommand> {
    fn try_create(
        &self,
        _env: &Environment,
        command: &CommandLine,
    ) -> Option<Box<dyn ExecutableCommand>> {
        Some(Box::new(ExternalCommand::new(
            command.argv.clone(),
            command.background,
        )))
    }
}

impl ExecutableCommand for ExternalCommand {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        let launched = match state.jobs.launch(&self.argv, self.background, &state.env) {
            Ok(launched) => launched,
            Err(e) => {
                writeln!(stdout, "{}", e)?;
                return Ok(match e {
                    JobError::Launch { .. } => COMMAND_NOT_RUN,
                    _ => 1,
                });
            }
        };
        match launched {
            LaunchOutcome::Background { job, pid } => {
                writeln!(stdout, "[{}] {}", job, pid)?;
                Ok(0)
            }
            LaunchOutcome::Foreground(outcome) => {
                if let ForegroundOutcome::Stopped { job, pid } = outcome {
                    writeln!(stdout, "\n[{}] {} Stopped", job, pid)?;
                }
                Ok(outcome.exit_code())
            }
        }
    }
}

/// Resolve a command name to an executable path the way a typical shell would.
///
/// - Absolute paths, `./x` and multi-component relative paths (`bin/tool`)
///   are used as given, relative to the process working directory.
/// - A bare name is looked up in each directory of `search_paths` (PATH);
///   empty PATH entries are skipped.
///
/// Only regular files with an execute bit qualify. The result borrows
/// `path` unless it was found through PATH.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, _) => None,
        (Some(name), None) if !path.is_absolute() => {
            find_in_path(search_paths, name.as_os_str()).map(Cow::Owned)
        }
        _ => is_executable(path).then_some(Cow::Borrowed(path)),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
