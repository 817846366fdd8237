//! A small interactive shell with Unix job control.
//!
//! Commands run as jobs in their own process groups. A background reaper
//! thread collects child status changes and intercepts terminal signals,
//! while the [`JobManager`] owned by the interpreter keeps the job table,
//! performs foreground waits and resumes stopped jobs (`fg`, `bg`, `kill`,
//! `jobs`).
//!
//! The main entry point is [`Interpreter`], which tokenizes and parses a
//! command line and runs it through a set of pluggable factories: built-in
//! commands implemented in Rust and a launcher for external programs.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
mod external;
mod interpreter;
pub mod jobs;
mod lexer;
pub mod logging;
mod parser;

pub use config::{JobConfig, ShellArgs};
/// Just a convenient re-export of the interactive command runner.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::Interpreter;
pub use jobs::{JobError, JobManager};
