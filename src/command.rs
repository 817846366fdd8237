use crate::env::{Environment, ShellState};
use crate::parser::CommandLine;
use anyhow::Result;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Commands killed by a signal report 128 + the signal number.
pub type ExitCode = i32;

/// Object-safe trait for any command that can be executed by the shell.
///
/// This is implemented by built-ins via a blanket impl and by external commands.
pub trait ExecutableCommand {
    /// Executes the command, writing user-visible output to `stdout`.
    fn execute(self: Box<Self>, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a parsed command line.
///
/// Returns `None` when the factory doesn't recognize the command name.
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided command line.
    fn try_create(
        &self,
        env: &Environment,
        command: &CommandLine,
    ) -> Option<Box<dyn ExecutableCommand>>;
}
