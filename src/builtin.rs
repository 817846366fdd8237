use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::env::{Environment, ShellState};
use crate::interpreter::Factory;
use crate::jobs::{ForegroundOutcome, JobId};
use crate::parser::CommandLine;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Executes the command, writing its output to `stdout`.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        match <T as BuiltinCommand>::execute(*self, stdout, state) {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(stdout, "{}", e)?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, stdout: &mut dyn Write, _state: &mut ShellState) -> Result<ExitCode> {
        stdout.write_all(self.output.as_bytes())?;
        Ok(if self.is_error { 1 } else { 0 })
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(
        &self,
        _env: &Environment,
        command: &CommandLine,
    ) -> Option<Box<dyn ExecutableCommand>> {
        let name = command.name();
        if name != T::name() {
            return None;
        }
        let args: Vec<&str> = command.args().iter().map(String::as_str).collect();
        Some(match T::from_args(&[name], &args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        })
    }
}

/// Run `op` on every operand resolved against the shell's directory,
/// reporting failures as lines and carrying on.
fn for_each_operand(
    name: &str,
    operands: &[String],
    stdout: &mut dyn Write,
    env: &Environment,
    mut op: impl FnMut(&Path, &mut dyn Write) -> Result<()>,
) -> Result<ExitCode> {
    if operands.is_empty() {
        return Err(anyhow::anyhow!("{}: missing operand", name));
    }
    let mut code = 0;
    for operand in operands {
        let path = env.current_dir.join(operand);
        if let Err(e) = op(&path, &mut *stdout) {
            writeln!(stdout, "{}: {}: {}", name, operand, e)?;
            code = 1;
        }
    }
    Ok(code)
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        writeln!(stdout, "{}", state.env.current_dir.to_string_lossy())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to $HOME, or to / when HOME is unset.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => PathBuf::from(state.env.get_var("HOME").unwrap_or_else(|| "/".to_string())),
        };
        let new_dir = state.env.current_dir.join(target);

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: can't canonicalize {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("cd: can't chdir to {}", canonical.display()))?;
        state.env.current_dir = canonical;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Leave the shell, terminating all live jobs.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        state.env.should_exit = true;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(self, stdout: &mut dyn Write, _state: &mut ShellState) -> Result<ExitCode> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(stdout, "{}", s)?;
        } else {
            writeln!(stdout, "{}", s)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Clear the terminal screen.
pub struct Clear {}

impl BuiltinCommand for Clear {
    fn name() -> &'static str {
        "clear"
    }

    fn execute(self, stdout: &mut dyn Write, _state: &mut ShellState) -> Result<ExitCode> {
        write!(stdout, "\x1b[H\x1b[J")?;
        stdout.flush()?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// List directory entries, one name per line, sorted.
pub struct Ls {
    #[argh(positional)]
    /// directory to list; defaults to the current directory.
    pub dir: Option<String>,
}

impl BuiltinCommand for Ls {
    fn name() -> &'static str {
        "ls"
    }

    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        let dir = match &self.dir {
            Some(d) => state.env.current_dir.join(d),
            None => state.env.current_dir.clone(),
        };
        let mut names = fs::read_dir(&dir)
            .and_then(|entries| {
                entries
                    .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
                    .collect::<std::io::Result<Vec<_>>>()
            })
            .map_err(|e| anyhow::anyhow!("ls: {}: {}", dir.display(), e))?;
        names.sort();
        for name in names {
            writeln!(stdout, "{}", name)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// print file(s) to stdout
pub struct Cat {
    #[argh(positional, greedy)]
    /// files to print.
    pub files: Vec<String>,
}

impl BuiltinCommand for Cat {
    fn name() -> &'static str {
        "cat"
    }

    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        for_each_operand("cat", &self.files, stdout, &state.env, |file, out| {
            out.write_all(&fs::read(file)?)?;
            Ok(())
        })
    }
}

#[derive(FromArgs)]
/// Create directories; fails if one already exists.
pub struct Mkdir {
    #[argh(positional, greedy)]
    /// directories to create.
    pub dirs: Vec<String>,
}

impl BuiltinCommand for Mkdir {
    fn name() -> &'static str {
        "mkdir"
    }

    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        for_each_operand("mkdir", &self.dirs, stdout, &state.env, |dir, _| {
            Ok(fs::create_dir(dir)?)
        })
    }
}

#[derive(FromArgs)]
/// Remove empty directories.
pub struct Rmdir {
    #[argh(positional, greedy)]
    /// directories to remove.
    pub dirs: Vec<String>,
}

impl BuiltinCommand for Rmdir {
    fn name() -> &'static str {
        "rmdir"
    }

    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        for_each_operand("rmdir", &self.dirs, stdout, &state.env, |dir, _| {
            Ok(fs::remove_dir(dir)?)
        })
    }
}

#[derive(FromArgs)]
/// Remove files. Directories are refused.
pub struct Rm {
    #[argh(positional, greedy)]
    /// files to remove.
    pub files: Vec<String>,
}

impl BuiltinCommand for Rm {
    fn name() -> &'static str {
        "rm"
    }

    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        for_each_operand("rm", &self.files, stdout, &state.env, |file, _| {
            if fs::symlink_metadata(file)?.is_dir() {
                anyhow::bail!("is a directory");
            }
            Ok(fs::remove_file(file)?)
        })
    }
}

#[derive(FromArgs)]
/// Create files or update their modification time.
pub struct Touch {
    #[argh(positional, greedy)]
    /// files to touch.
    pub files: Vec<String>,
}

impl BuiltinCommand for Touch {
    fn name() -> &'static str {
        "touch"
    }

    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        for_each_operand("touch", &self.files, stdout, &state.env, |file, _| {
            let handle = fs::OpenOptions::new().create(true).append(true).open(file)?;
            handle.set_modified(SystemTime::now())?;
            Ok(())
        })
    }
}

/// Parse `N` or `%N` as used by `fg` and `bg`.
fn parse_job_id(command: &str, spec: Option<&str>) -> Result<Option<JobId>> {
    let Some(spec) = spec else {
        return Ok(None);
    };
    spec.strip_prefix('%')
        .unwrap_or(spec)
        .parse::<u32>()
        .ok()
        .filter(|&id| id > 0)
        .map(|id| Some(JobId(id)))
        .ok_or_else(|| anyhow::anyhow!("{}: bad job id: {}", command, spec))
}

#[derive(FromArgs)]
/// List jobs with their status and age.
pub struct Jobs {}

impl BuiltinCommand for Jobs {
    fn name() -> &'static str {
        "jobs"
    }

    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        let now = Instant::now();
        for job in state.jobs.list_jobs() {
            writeln!(
                stdout,
                "[{}] {} {}\t{} (age {}s)",
                job.id,
                job.pid,
                job.status,
                job.command_line,
                job.age(now).as_secs()
            )?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Resume a job in the foreground and wait for it.
/// Without an argument the most recent job is used.
pub struct Fg {
    #[argh(positional)]
    /// job number, optionally written as %N.
    pub job: Option<String>,
}

impl BuiltinCommand for Fg {
    fn name() -> &'static str {
        "fg"
    }

    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        let id = parse_job_id("fg", self.job.as_deref())?;
        let outcome = state
            .jobs
            .bring_to_foreground(id)
            .map_err(|e| anyhow::anyhow!("fg: {}", e))?;
        if let ForegroundOutcome::Stopped { job, pid } = outcome {
            writeln!(stdout, "\n[{}] {} Stopped", job, pid)?;
        }
        Ok(outcome.exit_code())
    }
}

#[derive(FromArgs)]
/// Resume a stopped job in the background.
/// Without an argument the most recent job is used.
pub struct Bg {
    #[argh(positional)]
    /// job number, optionally written as %N.
    pub job: Option<String>,
}

impl BuiltinCommand for Bg {
    fn name() -> &'static str {
        "bg"
    }

    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        let id = parse_job_id("bg", self.job.as_deref())?;
        let (job, pid) = state
            .jobs
            .resume_in_background(id)
            .map_err(|e| anyhow::anyhow!("bg: {}", e))?;
        writeln!(stdout, "[{}] {} continued in background", job, pid)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Send SIGTERM to processes (PID) or jobs (%N).
pub struct Kill {
    #[argh(positional, greedy)]
    /// process ids or %N job references.
    pub targets: Vec<String>,
}

impl BuiltinCommand for Kill {
    fn name() -> &'static str {
        "kill"
    }

    fn execute(self, stdout: &mut dyn Write, state: &mut ShellState) -> Result<ExitCode> {
        if self.targets.is_empty() {
            return Err(anyhow::anyhow!("kill: missing pid/job"));
        }
        let mut code = 0;
        for token in &self.targets {
            if let Err(e) = state.jobs.terminate(token) {
                writeln!(stdout, "kill: {}", e)?;
                code = 1;
            }
        }
        Ok(code)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::jobs::tests::{fake_manager, seed_job};
    use crate::jobs::{ChildChange, ChildEvent, JobEvent, JobStatus};
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;
    use std::collections::HashMap;
    use std::env as stdenv;
    use std::io;
    use std::sync::{Mutex, MutexGuard, OnceLock};
    use std::time::UNIX_EPOCH;

    pub(crate) fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn test_state(current_dir: PathBuf) -> ShellState {
        let (jobs, _tx) = fake_manager();
        ShellState {
            env: Environment {
                vars: HashMap::new(),
                current_dir,
                should_exit: false,
            },
            jobs,
        }
    }

    fn run<T: BuiltinCommand>(cmd: T, state: &mut ShellState) -> (ExitCode, String) {
        let mut out = Vec::new();
        let code = ExecutableCommand::execute(Box::new(cmd), &mut out, state).unwrap();
        (code, String::from_utf8(out).unwrap())
    }

    fn make_unique_temp_dir() -> io::Result<PathBuf> {
        let mut p = stdenv::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("job_shell_builtin_{}_{}", std::process::id(), nanos));
        fs::create_dir_all(&p)?;
        Ok(p)
    }

    #[test]
    fn test_pwd_prints_current_dir() {
        let cur = stdenv::temp_dir();
        let mut state = test_state(cur.clone());
        let (code, out) = run(Pwd {}, &mut state);
        assert_eq!(code, 0);
        assert_eq!(out, format!("{}\n", cur.to_string_lossy()));
    }

    #[test]
    fn test_echo_with_and_without_newline() {
        let mut state = test_state(stdenv::temp_dir());

        let echo = Echo {
            no_newline: false,
            args: vec!["hello".to_string(), "world".to_string()],
        };
        assert_eq!(run(echo, &mut state), (0, "hello world\n".to_string()));

        let echo = Echo {
            no_newline: true,
            args: vec!["foo".to_string(), "bar".to_string()],
        };
        assert_eq!(run(echo, &mut state), (0, "foo bar".to_string()));
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let temp = make_unique_temp_dir().expect("failed to create temp dir");
        let canonical_temp = fs::canonicalize(&temp).expect("canonicalize failed");
        let orig = stdenv::current_dir().unwrap();
        let mut state = test_state(orig.clone());

        let cmd = Cd {
            target: Some(canonical_temp.to_string_lossy().to_string()),
        };
        let (code, _) = run(cmd, &mut state);
        let new_cwd = fs::canonicalize(stdenv::current_dir().unwrap()).unwrap();
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert_eq!(code, 0);
        assert_eq!(new_cwd, canonical_temp);
        assert_eq!(state.env.current_dir, canonical_temp);
        let _ = fs::remove_dir_all(&temp);
    }

    #[test]
    fn test_cd_to_home_when_none() {
        let _lock = lock_current_dir();
        let temp = make_unique_temp_dir().expect("failed to create temp dir");
        let canonical_temp = fs::canonicalize(&temp).expect("canonicalize failed");
        let orig = stdenv::current_dir().unwrap();
        let mut state = test_state(orig.clone());
        state.env.set_var("HOME", canonical_temp.to_string_lossy().to_string());

        let (code, _) = run(Cd { target: None }, &mut state);
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert_eq!(code, 0);
        assert_eq!(state.env.current_dir, canonical_temp);
        let _ = fs::remove_dir_all(&temp);
    }

    #[test]
    fn test_cd_nonexistent_path_errors() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut state = test_state(orig.clone());

        let name = format!("nonexistent_dir_for_job_shell_test_{}", std::process::id());
        let (code, out) = run(Cd { target: Some(name) }, &mut state);

        assert_eq!(code, 1);
        assert!(out.starts_with("cd: can't canonicalize"));
        assert_eq!(stdenv::current_dir().unwrap(), orig);
        assert_eq!(state.env.current_dir, orig);
    }

    #[test]
    fn test_exit_sets_flag() {
        let mut state = test_state(stdenv::temp_dir());
        let (code, _) = run(Exit { _args: vec![] }, &mut state);
        assert_eq!(code, 0);
        assert!(state.env.should_exit);
    }

    #[test]
    fn test_file_builtins_round_trip() {
        let temp = make_unique_temp_dir().expect("failed to create temp dir");
        let mut state = test_state(temp.clone());
        let dir = temp.join("sub").to_string_lossy().to_string();
        let file = temp.join("sub").join("note.txt").to_string_lossy().to_string();

        assert_eq!(run(Mkdir { dirs: vec![dir.clone()] }, &mut state).0, 0);
        assert_eq!(run(Touch { files: vec![file.clone()] }, &mut state).0, 0);
        fs::write(&file, "hello\nworld\n").unwrap();

        let (code, out) = run(Cat { files: vec![file.clone()] }, &mut state);
        assert_eq!((code, out.as_str()), (0, "hello\nworld\n"));

        let (code, out) = run(Ls { dir: Some("sub".to_string()) }, &mut state);
        assert_eq!((code, out.as_str()), (0, "note.txt\n"));

        // Directory is not empty yet, and rm refuses directories.
        assert_eq!(run(Rmdir { dirs: vec![dir.clone()] }, &mut state).0, 1);
        let (code, out) = run(Rm { files: vec![dir.clone()] }, &mut state);
        assert_eq!(code, 1);
        assert_eq!(out, format!("rm: {}: is a directory\n", dir));

        assert_eq!(run(Rm { files: vec![file.clone()] }, &mut state).0, 0);
        assert_eq!(run(Rmdir { dirs: vec![dir.clone()] }, &mut state).0, 0);
        assert!(!temp.join("sub").exists());
        let _ = fs::remove_dir_all(&temp);
    }

    #[test]
    fn test_mkdir_existing_reports_and_continues() {
        let temp = make_unique_temp_dir().expect("failed to create temp dir");
        let mut state = test_state(temp.clone());
        let existing = temp.to_string_lossy().to_string();
        let fresh = temp.join("fresh").to_string_lossy().to_string();

        let (code, out) = run(Mkdir { dirs: vec![existing.clone(), fresh] }, &mut state);
        assert_eq!(code, 1);
        assert!(out.starts_with(&format!("mkdir: {}: ", existing)));
        assert!(temp.join("fresh").is_dir());
        let _ = fs::remove_dir_all(&temp);
    }

    #[test]
    fn test_cat_without_files_is_an_error() {
        let mut state = test_state(stdenv::temp_dir());
        let (code, out) = run(Cat { files: vec![] }, &mut state);
        assert_eq!((code, out.as_str()), (1, "cat: missing operand\n"));
    }

    #[test]
    fn test_jobs_lists_rows_in_insertion_order() {
        let (mut jobs, tx) = fake_manager();
        seed_job(&mut jobs, 4242, "sleep 100", JobStatus::Stopped);
        let vim = seed_job(&mut jobs, 4343, "vim notes", JobStatus::Running);
        tx.send(JobEvent::Child(ChildEvent {
            pid: Pid::from_raw(4343),
            change: ChildChange::Signaled(Signal::SIGKILL),
        }))
        .unwrap();
        let mut state = test_state(stdenv::temp_dir());
        state.jobs = jobs;

        let (code, out) = run(Jobs {}, &mut state);
        assert_eq!(code, 0);
        assert_eq!(
            out,
            "[1] 4242 Stopped\tsleep 100 (age 0s)\n[2] 4343 Signaled(9)\tvim notes (age 0s)\n"
        );
        assert_eq!(
            state.jobs.registry().lookup_by_id(vim).unwrap().status,
            JobStatus::Signaled(Signal::SIGKILL)
        );
    }

    #[test]
    fn test_fg_on_finished_job() {
        let (mut jobs, _tx) = fake_manager();
        seed_job(&mut jobs, 4242, "true", JobStatus::Exited(0));
        let mut state = test_state(stdenv::temp_dir());
        state.jobs = jobs;
        let (code, out) = run(Fg { job: Some("%1".to_string()) }, &mut state);
        assert_eq!((code, out.as_str()), (1, "fg: %1: job has terminated\n"));
    }

    #[test]
    fn test_fg_and_bg_report_missing_jobs() {
        let mut state = test_state(stdenv::temp_dir());
        let (code, out) = run(Fg { job: None }, &mut state);
        assert_eq!((code, out.as_str()), (1, "fg: no such job\n"));

        let (code, out) = run(Bg { job: Some("%4".to_string()) }, &mut state);
        assert_eq!((code, out.as_str()), (1, "bg: %4: no such job\n"));

        let (code, out) = run(Fg { job: Some("x1".to_string()) }, &mut state);
        assert_eq!((code, out.as_str()), (1, "fg: bad job id: x1\n"));
    }

    #[test]
    fn test_kill_reports_each_bad_token() {
        let mut state = test_state(stdenv::temp_dir());
        let targets = vec!["%1".to_string(), "abc".to_string()];
        let (code, out) = run(Kill { targets }, &mut state);
        assert_eq!(code, 1);
        assert_eq!(out, "kill: %1: no such job\nkill: invalid pid/job: abc\n");
        assert!(state.jobs.registry().is_empty());
    }

    #[test]
    fn test_factory_handles_help_and_bad_args() {
        let state = test_state(stdenv::temp_dir());
        let factory = Factory::<Fg>::default();
        let line = |words: &[&str]| CommandLine {
            argv: words.iter().map(|w| w.to_string()).collect(),
            background: false,
        };

        assert!(factory.try_create(&state.env, &line(&["bg"])).is_none());

        let mut state = state;
        let mut out = Vec::new();
        let cmd = factory.try_create(&state.env, &line(&["fg", "--help"])).unwrap();
        assert_eq!(cmd.execute(&mut out, &mut state).unwrap(), 0);
        assert!(String::from_utf8(out).unwrap().contains("Usage: fg"));

        let mut out = Vec::new();
        let cmd = factory.try_create(&state.env, &line(&["fg", "1", "2"])).unwrap();
        assert_eq!(cmd.execute(&mut out, &mut state).unwrap(), 1);
    }
}
