use job_shell::logging::init_logging;
use job_shell::{Interpreter, ShellArgs};

fn main() -> anyhow::Result<()> {
    let args: ShellArgs = argh::from_env();
    init_logging(&args.log_level)?;

    let mut shell = Interpreter::with_default_commands(args.job_config())?;
    match args.command {
        Some(line) => {
            let code = shell.run_line(&line, &mut std::io::stdout());
            shell.shutdown();
            std::process::exit(code?);
        }
        None => shell.repl(),
    }
}
