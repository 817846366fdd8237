use crate::command::{CommandFactory, ExitCode};
use crate::config::JobConfig;
use crate::env::{Environment, ShellState};
use crate::jobs::JobManager;
use crate::lexer;
use crate::parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;

/// Exit code of a line that could not be tokenized or parsed.
const SYNTAX_ERROR: ExitCode = 2;

/// Factory allows creating instances of ExecutableCommand.
///
/// Only support commands defined in this crate: BuiltinCommand and ExternalCommand.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// Every builtin, followed by the external launcher which accepts anything.
pub(crate) fn default_commands() -> Vec<Box<dyn CommandFactory>> {
    use crate::builtin::*;
    use crate::external::ExternalCommand;
    vec![
        Box::new(Factory::<Pwd>::default()),
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Echo>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<Clear>::default()),
        Box::new(Factory::<Ls>::default()),
        Box::new(Factory::<Cat>::default()),
        Box::new(Factory::<Mkdir>::default()),
        Box::new(Factory::<Rmdir>::default()),
        Box::new(Factory::<Rm>::default()),
        Box::new(Factory::<Touch>::default()),
        Box::new(Factory::<Jobs>::default()),
        Box::new(Factory::<Fg>::default()),
        Box::new(Factory::<Bg>::default()),
        Box::new(Factory::<Kill>::default()),
        Box::new(Factory::<ExternalCommand>::default()),
    ]
}

/// Interactive shell with job control.
///
/// The interpreter owns the [`ShellState`] (environment plus job manager) and
/// a list of [`CommandFactory`] objects queried in order for every line.
///
/// Example
/// ```no_run
/// use job_shell::{Interpreter, JobConfig};
/// let mut sh = Interpreter::with_default_commands(JobConfig::default()).unwrap();
/// let code = sh.run_line("echo hello world", &mut std::io::stdout()).unwrap();
/// assert_eq!(code, 0);
/// sh.shutdown();
/// ```
pub struct Interpreter {
    state: ShellState,
    commands: Vec<Box<dyn CommandFactory>>,
}

impl Interpreter {
    /// Create an interpreter around an existing job manager.
    pub fn new(jobs: JobManager, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            state: ShellState {
                env: Environment::new(),
                jobs,
            },
            commands,
        }
    }

    /// Start the job manager (and its reaper thread) and register every
    /// builtin plus the external launcher.
    pub fn with_default_commands(config: JobConfig) -> anyhow::Result<Self> {
        let jobs = JobManager::new(config)?;
        Ok(Self::new(jobs, default_commands()))
    }

    pub fn should_exit(&self) -> bool {
        self.state.env.should_exit
    }

    /// Tokenize, parse and run one line, then apply pending job events and
    /// drop expired job records.
    ///
    /// Syntax errors are reported on `stdout` and yield exit code 2.
    pub fn run_line(&mut self, line: &str, stdout: &mut dyn Write) -> anyhow::Result<ExitCode> {
        let code = match lexer::split_into_tokens(line)
            .map_err(anyhow::Error::from)
            .and_then(|tokens| Ok(parser::construct_command(tokens)?))
        {
            Ok(Some(command)) => {
                tracing::trace!(argv = ?command.argv, background = command.background, "dispatching");
                let cmd = self
                    .commands
                    .iter()
                    .find_map(|factory| factory.try_create(&self.state.env, &command))
                    .ok_or_else(|| anyhow::anyhow!("{}: command not found", command.name()))?;
                cmd.execute(stdout, &mut self.state)?
            }
            Ok(None) => 0,
            Err(e) => {
                writeln!(stdout, "job_shell: {}", e)?;
                SYNTAX_ERROR
            }
        };
        self.state.jobs.poll();
        self.state.jobs.prune_expired();
        Ok(code)
    }

    /// Like [`Interpreter::run_line`], but a failure is written as one line
    /// and turns into exit code 1 so the interactive loop keeps going.
    fn run_reporting(&mut self, line: &str, stdout: &mut dyn Write) -> ExitCode {
        let result = self
            .run_line(line, stdout)
            .and_then(|code| Ok(stdout.flush().map(|_| code)?));
        result.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "line failed");
            let _ = writeln!(stdout, "job_shell: {}", e);
            1
        })
    }

    /// Read-Eval-Print Loop. Returns on end of input or after `exit`, having
    /// terminated every live job.
    pub fn repl(&mut self) -> anyhow::Result<()> {
        let mut rl = DefaultEditor::new()?;
        let mut stdout = std::io::stdout();

        while !self.should_exit() {
            match rl.readline(&prompt(&self.state.env)) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    let code = self.run_reporting(&line, &mut stdout);
                    tracing::debug!(code, "line finished");
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    self.shutdown();
                    return Err(err.into());
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Terminate every live job and forget all job records.
    pub fn shutdown(&mut self) {
        tracing::debug!(jobs = self.state.jobs.registry().len(), "shutting down");
        self.state.jobs.shutdown();
    }
}

/// `user:dir$ ` where `dir` is the last component of the working directory.
fn prompt(env: &Environment) -> String {
    let user = env.get_var("USER").unwrap_or_default();
    let dir = env
        .current_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string());
    format!("{}:{}$ ", user, dir)
}
