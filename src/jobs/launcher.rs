use crate::env::Environment;
use crate::external::find_command_path;
use crate::jobs::JobError;
use nix::unistd::Pid;
use std::ffi::OsStr;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

/// Start `argv` as the leader of a new process group and return its pid.
///
/// The `Child` handle is dropped without waiting: the reaper thread owns
/// every `waitpid` in this process.
pub(crate) fn spawn_in_new_group(argv: &[String], env: &Environment) -> Result<Pid, JobError> {
    let (program, args) = argv.split_first().ok_or(JobError::EmptyCommand)?;
    let launch_error = |source: io::Error| JobError::Launch {
        program: program.clone(),
        source,
    };

    let search_paths = env.get_var("PATH").unwrap_or_default();
    let executable = find_command_path(OsStr::new(&search_paths), Path::new(program))
        .ok_or_else(|| launch_error(io::ErrorKind::NotFound.into()))?;

    let child = Command::new(executable.as_ref())
        .args(args)
        .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&env.current_dir)
        .process_group(0)
        .spawn()
        .map_err(launch_error)?;

    let pid = Pid::from_raw(child.id() as i32);
    tracing::debug!(%pid, program = %program, "spawned");
    Ok(pid)
}
