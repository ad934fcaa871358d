//! Built-in commands: `pwd`, `cd`, `exit`, `?`, `jobs`, `kill`, `bg`, `fg`.
//!
//! Every built-in reads and writes through the real stdio streams (`print!`/
//! `eprintln!`), exactly like `run_command_without_redirections`'s builtin
//! dispatch in the original shell — by the time one of these runs, the
//! executor has already `dup2`-ed any redirections onto fd 0/1/2, so there
//! is nothing extra to wire up here.

use crate::executor::ExecutionAction;
use crate::job_control;
use crate::jobs::JobStatus;
use crate::shell::Shell;

pub type BuiltinFn = fn(&[String], &mut Shell) -> ExecutionAction;

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("pwd", pwd),
    ("cd", cd),
    ("exit", exit),
    ("?", last_status),
    ("jobs", jobs_builtin),
    ("kill", kill_builtin),
    ("bg", bg_builtin),
    ("fg", fg_builtin),
];

/// Looks up a built-in by name. `None` means the executor should treat the
/// command as an external program.
pub fn lookup(name: &str) -> Option<BuiltinFn> {
    BUILTINS
        .iter()
        .find(|(builtin_name, _)| *builtin_name == name)
        .map(|(_, f)| *f)
}

fn pwd(_argv: &[String], _shell: &mut Shell) -> ExecutionAction {
    match std::env::current_dir() {
        Ok(path) => {
            println!("{}", path.display());
            ExecutionAction::Continue(0)
        }
        Err(e) => {
            eprintln!("jsh: pwd: {e}");
            ExecutionAction::Continue(1)
        }
    }
}

fn cd(argv: &[String], _shell: &mut Shell) -> ExecutionAction {
    let target = match argv.get(1) {
        Some(path) => path.clone(),
        None => match std::env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                eprintln!("jsh: cd: HOME not set");
                return ExecutionAction::Continue(1);
            }
        },
    };

    match std::env::set_current_dir(&target) {
        Ok(()) => ExecutionAction::Continue(0),
        Err(e) => {
            eprintln!("jsh: cd: {target}: {e}");
            ExecutionAction::Continue(1)
        }
    }
}

fn exit(argv: &[String], shell: &mut Shell) -> ExecutionAction {
    match argv.get(1) {
        None => ExecutionAction::Exit(shell.last_exit_status),
        Some(s) => match s.parse::<i32>() {
            Ok(code) => ExecutionAction::Exit(code),
            Err(_) => {
                eprintln!("jsh: exit: {s}: numeric argument required");
                ExecutionAction::Exit(2)
            }
        },
    }
}

/// `?` — prints the exit status of the most recently completed pipeline.
/// There is no `$?` variable expansion (no scripting layer at all), so this
/// is the only way to read it back.
fn last_status(_argv: &[String], shell: &mut Shell) -> ExecutionAction {
    println!("{}", shell.last_exit_status);
    ExecutionAction::Continue(0)
}

fn jobs_builtin(_argv: &[String], shell: &mut Shell) -> ExecutionAction {
    for job in shell.jobs.jobs_sorted() {
        eprintln!("{}", job.display_line());
    }
    ExecutionAction::Continue(0)
}

fn kill_builtin(argv: &[String], shell: &mut Shell) -> ExecutionAction {
    let mut signal = libc::SIGTERM;
    let mut rest = &argv[1..];

    if let Some(first) = rest.first() {
        if let Some(stripped) = first.strip_prefix('-') {
            match stripped.parse::<i32>() {
                Ok(n) => {
                    signal = n;
                    rest = &rest[1..];
                }
                Err(_) => {
                    eprintln!("jsh: kill: invalid signal: {first}");
                    return ExecutionAction::Continue(1);
                }
            }
        }
    }

    let Some(id_arg) = rest.first() else {
        eprintln!("jsh: kill: usage: kill [-signal] job_id");
        return ExecutionAction::Continue(1);
    };
    let Some(id) = id_arg.parse::<usize>().ok() else {
        eprintln!("jsh: kill: {id_arg}: no such job");
        return ExecutionAction::Continue(1);
    };
    let Some(job) = shell.jobs.get(id) else {
        eprintln!("jsh: kill: {id}: no such job");
        return ExecutionAction::Continue(1);
    };

    if unsafe { libc::kill(-job.pgid, signal) } != 0 {
        eprintln!("jsh: kill: {}", std::io::Error::last_os_error());
        return ExecutionAction::Continue(1);
    }
    ExecutionAction::Continue(0)
}

fn bg_builtin(argv: &[String], shell: &mut Shell) -> ExecutionAction {
    let id = match argv
        .get(1)
        .and_then(|s| s.parse::<usize>().ok())
        .or_else(|| shell.jobs.most_recent_stopped_id())
    {
        Some(id) => id,
        None => {
            eprintln!("jsh: bg: no stopped jobs");
            return ExecutionAction::Continue(1);
        }
    };

    let Some(job) = shell.jobs.get_mut(id) else {
        eprintln!("jsh: bg: {id}: no such job");
        return ExecutionAction::Continue(1);
    };

    if let Err(e) = job_control::send_continue_to_group(job.pgid) {
        eprintln!("jsh: bg: {e}");
        return ExecutionAction::Continue(1);
    }
    job.status = JobStatus::Running;
    ExecutionAction::Continue(0)
}

fn fg_builtin(argv: &[String], shell: &mut Shell) -> ExecutionAction {
    let id = match argv
        .get(1)
        .and_then(|s| s.parse::<usize>().ok())
        .or_else(|| shell.jobs.most_recent_id())
    {
        Some(id) => id,
        None => {
            eprintln!("jsh: fg: no such job");
            return ExecutionAction::Continue(1);
        }
    };

    let Some(job) = shell.jobs.get(id) else {
        eprintln!("jsh: fg: {id}: no such job");
        return ExecutionAction::Continue(1);
    };
    let pgid = job.pgid;
    let pid = job.pid;

    if let Err(e) = job_control::send_continue_to_group(pgid) {
        eprintln!("jsh: fg: {e}");
        return ExecutionAction::Continue(1);
    }

    let guard = job_control::ForegroundTerminalGuard::new(pgid).ok();
    let outcome = job_control::wait_for_pid(pid);
    drop(guard);

    match outcome {
        Ok(job_control::WaitOutcome::Stopped) => {
            if let Some(job) = shell.jobs.get_mut(id) {
                job.status = JobStatus::Stopped;
            }
            ExecutionAction::Continue(0)
        }
        Ok(job_control::WaitOutcome::Exited(code)) => {
            shell.jobs.remove(id);
            ExecutionAction::Continue(code)
        }
        _ => {
            shell.jobs.remove(id);
            ExecutionAction::Continue(1)
        }
    }
}
