//! Turns a parsed [`PipelineList`] into processes.
//!
//! This is the raw-`fork`/`exec` analogue of `run_pipeline_list`/
//! `run_pipeline`/`run_command` in the original shell. Unlike an approach
//! built on `std::process::Command` plus a thread per built-in pipeline
//! stage, every stage here is a real process: a built-in only ever runs
//! in-process as the *last* stage of a pipeline (or as a lone command), so
//! there is never a pipe-buffer deadlock to route around with a thread.
//!
//! The three shapes below all share the same per-command core
//! ([`run_single_stage`]/[`run_stage_already_forked`]):
//!   - a single foreground command forks once, waits, and may hand the
//!     terminal to the child;
//!   - a foreground pipeline of N commands forks N-1 children wired to each
//!     other by pipes and runs the last command in the current process;
//!   - a background pipeline forks exactly once more, and that child plays
//!     the "current process" role for the pipeline above, so the real shell
//!     never blocks on it.

use std::ffi::CString;
use std::io;

use crate::builtins;
use crate::job_control;
use crate::jobs::JobStatus;
use crate::parser::{self, Argument, Channel, RedirMode, RedirectTarget};
use crate::redirect;
use crate::shell::Shell;

/// What a completed pipeline (or the whole input line) tells the read loop
/// to do next.
#[derive(Debug, Clone, Copy)]
pub enum ExecutionAction {
    /// Keep reading lines; this is the new `$?`-equivalent status.
    Continue(i32),
    /// The `exit` built-in was invoked at the top level: stop reading.
    Exit(i32),
}

/// A fully resolved redirection: process substitutions have already been
/// turned into `/proc/self/fd/<n>` paths.
struct PreparedRedirection {
    channel: Channel,
    mode: RedirMode,
    path: String,
}

/// What running one command in "this process" produced: either a built-in
/// already ran to completion, or an external program was forked and is
/// still out there waiting to be `wait`ed on.
enum StageOutcome {
    Builtin(ExecutionAction),
    Forked { pid: libc::pid_t },
}

/// Runs every pipeline in the list, left to right, threading the exit
/// status forward. Stops early (without running the remaining pipelines)
/// if `exit` was invoked.
pub fn execute_pipeline_list(list: parser::PipelineList, shell: &mut Shell) -> ExecutionAction {
    let mut status = shell.last_exit_status;
    for pipeline in list.pipelines {
        match execute_pipeline(pipeline, shell) {
            ExecutionAction::Continue(code) => {
                status = code;
                shell.last_exit_status = code;
            }
            ExecutionAction::Exit(code) => return ExecutionAction::Exit(code),
        }
    }
    ExecutionAction::Continue(status)
}

fn execute_pipeline(pipeline: parser::Pipeline, shell: &mut Shell) -> ExecutionAction {
    if pipeline.to_job {
        execute_background(pipeline, shell)
    } else if pipeline.commands.len() == 1 {
        run_single_foreground(pipeline, shell)
    } else {
        run_multi_foreground(pipeline, shell)
    }
}

// ---------------------------------------------------------------------
// Foreground: a single command.
// ---------------------------------------------------------------------

fn run_single_foreground(pipeline: parser::Pipeline, shell: &mut Shell) -> ExecutionAction {
    let command_text = pipeline.to_string();
    match run_single_stage(&pipeline.commands[0], shell, None) {
        Err(code) => ExecutionAction::Continue(code),
        Ok(StageOutcome::Builtin(action)) => action,
        Ok(StageOutcome::Forked { pid }) => {
            let guard = ForegroundGuard::take(pid);
            let outcome = job_control::wait_for_pid(pid);
            drop(guard);
            finish_foreground_wait(outcome, pid, pid, pipeline, command_text, shell)
        }
    }
}

// ---------------------------------------------------------------------
// Foreground: a pipeline of two or more commands.
// ---------------------------------------------------------------------

fn run_multi_foreground(pipeline: parser::Pipeline, shell: &mut Shell) -> ExecutionAction {
    let command_text = pipeline.to_string();

    // The chain below points the shell's own fd 0 at the last pipe's read
    // end so the last stage can run directly in this process; save the
    // real stdin first and restore it once that stage has been launched,
    // or the shell itself would be left reading from a spent pipe.
    let saved_stdin = match redirect::SavedStdin::save() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("jsh: {e}");
            return ExecutionAction::Continue(1);
        }
    };
    let (effective_pgid, prior_pids, last_stage) = run_pipeline_chain(&pipeline, shell, None);
    saved_stdin.restore();

    let guard = ForegroundGuard::take(effective_pgid);

    match last_stage {
        Err(code) => {
            reap_all(&prior_pids);
            drop(guard);
            ExecutionAction::Continue(code)
        }
        Ok(StageOutcome::Builtin(action)) => {
            reap_all(&prior_pids);
            drop(guard);
            action
        }
        Ok(StageOutcome::Forked { pid }) => {
            let outcome = job_control::wait_for_pid(pid);
            reap_all(&prior_pids);
            drop(guard);
            finish_foreground_wait(outcome, pid, effective_pgid, pipeline, command_text, shell)
        }
    }
}

fn finish_foreground_wait(
    outcome: io::Result<job_control::WaitOutcome>,
    pid: libc::pid_t,
    pgid: libc::pid_t,
    pipeline: parser::Pipeline,
    command_text: String,
    shell: &mut Shell,
) -> ExecutionAction {
    match outcome {
        Ok(job_control::WaitOutcome::Stopped) => {
            let id = shell
                .jobs
                .add_with_status(pid, pgid, pipeline, JobStatus::Stopped);
            eprintln!("[{id}]  + {pid} stopped   {command_text}");
            ExecutionAction::Continue(0)
        }
        Ok(job_control::WaitOutcome::Exited(code)) => ExecutionAction::Continue(code),
        Ok(_) => ExecutionAction::Continue(0),
        Err(e) => {
            eprintln!("jsh: waitpid: {e}");
            ExecutionAction::Continue(1)
        }
    }
}

/// Forks the N-1 non-last stages of a pipeline, wires them together with
/// pipes, and runs the last stage in the current process. Returns the
/// pipeline's process-group id, the pids of the pre-forked stages (still
/// needing a `wait`), and the outcome of running the last stage.
///
/// `pgid_seed` fixes the group's pgid up front instead of letting it default
/// to the first forked stage's own pid. A foreground pipeline passes `None`
/// (the shell process itself never joins the group, so the first stage may
/// as well lead it). A backgrounded pipeline passes `Some(leader_pid)`: the
/// leader already set its own pgid to its own pid before calling in here, and
/// every stage must join *that* group, or `kill`/`fg`/`bg` targeting the job's
/// registered pgid would miss every real worker process.
fn run_pipeline_chain(
    pipeline: &parser::Pipeline,
    shell: &mut Shell,
    pgid_seed: Option<libc::pid_t>,
) -> (libc::pid_t, Vec<libc::pid_t>, Result<StageOutcome, i32>) {
    let n = pipeline.commands.len();
    let mut pipes: Vec<(i32, i32)> = Vec::with_capacity(n - 1);
    for _ in 0..n - 1 {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            eprintln!("jsh: failed to create pipe: {}", io::Error::last_os_error());
            return (0, Vec::new(), Err(1));
        }
        pipes.push((fds[0], fds[1]));
    }

    let mut child_pids = Vec::with_capacity(n - 1);
    let mut pgid: Option<libc::pid_t> = pgid_seed;

    for i in 0..n - 1 {
        match unsafe { libc::fork() } {
            -1 => {
                eprintln!("fork: error to create a process");
                for &(r, w) in &pipes {
                    unsafe {
                        libc::close(r);
                        libc::close(w);
                    }
                }
                reap_all(&child_pids);
                return (pgid.unwrap_or(0), Vec::new(), Err(1));
            }
            0 => {
                job_control::reset_child_signals();
                if i > 0 {
                    unsafe { libc::dup2(pipes[i - 1].0, libc::STDIN_FILENO) };
                }
                unsafe { libc::dup2(pipes[i].1, libc::STDOUT_FILENO) };
                for &(r, w) in &pipes {
                    unsafe {
                        libc::close(r);
                        libc::close(w);
                    }
                }
                unsafe { libc::setpgid(0, pgid.unwrap_or(0)) };
                let status = run_stage_already_forked(&pipeline.commands[i], shell);
                std::process::exit(status);
            }
            child_pid => {
                unsafe { libc::setpgid(child_pid, pgid.unwrap_or(child_pid)) };
                pgid.get_or_insert(child_pid);
                child_pids.push(child_pid);
            }
        }
    }

    if let Some(&(read_end, _)) = pipes.last() {
        unsafe { libc::dup2(read_end, libc::STDIN_FILENO) };
    }
    for &(r, w) in &pipes {
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    let effective_pgid = pgid.unwrap_or(0);
    let last_stage = run_single_stage(
        pipeline.commands.last().unwrap(),
        shell,
        Some(effective_pgid),
    );
    (effective_pgid, child_pids, last_stage)
}

// ---------------------------------------------------------------------
// Background pipelines.
// ---------------------------------------------------------------------

fn execute_background(pipeline: parser::Pipeline, shell: &mut Shell) -> ExecutionAction {
    match unsafe { libc::fork() } {
        -1 => {
            eprintln!("fork: error to create a process");
            ExecutionAction::Continue(1)
        }
        0 => {
            job_control::reset_child_signals();
            let own_pid = unsafe { libc::getpid() };
            unsafe { libc::setpgid(0, 0) };
            let status = run_pipeline_in_current_process(&pipeline, shell, Some(own_pid));
            std::process::exit(status);
        }
        pid => {
            unsafe { libc::setpgid(pid, pid) };
            shell.jobs.add(pid, pid, pipeline);
            ExecutionAction::Continue(0)
        }
    }
}

/// Runs a pipeline's full fork/pipe/exec chain treating "this process" as
/// the pipeline's owner, with no terminal handoff and no job promotion.
/// Used inside a backgrounded leader and inside process-substitution
/// children, both of which just need the pipeline's final status.
///
/// `pgid_seed` is `Some(leader_pid)` when called from a backgrounded leader
/// (so every forked stage joins the leader's own, already-registered
/// process group) and `None` from a process-substitution child (whose
/// pgid is never observed by job control, so it doesn't matter).
fn run_pipeline_in_current_process(
    pipeline: &parser::Pipeline,
    shell: &mut Shell,
    pgid_seed: Option<libc::pid_t>,
) -> i32 {
    if pipeline.commands.len() == 1 {
        // A lone command never needs a pipe-connected sibling, so there is
        // no group-membership concern here: run it directly in this
        // process (exec in place for an external program) rather than
        // forking yet another child that would have to rejoin the group.
        return run_stage_already_forked(&pipeline.commands[0], shell);
    }

    let (_pgid, prior_pids, last_stage) = run_pipeline_chain(pipeline, shell, pgid_seed);
    reap_all(&prior_pids);
    match last_stage {
        Ok(StageOutcome::Builtin(action)) => match action {
            ExecutionAction::Continue(c) | ExecutionAction::Exit(c) => c,
        },
        Ok(StageOutcome::Forked { pid }) => match job_control::wait_for_pid(pid) {
            Ok(job_control::WaitOutcome::Exited(c)) => c,
            Ok(_) => 0,
            Err(_) => 1,
        },
        Err(code) => code,
    }
}

// ---------------------------------------------------------------------
// Per-command core.
// ---------------------------------------------------------------------

/// Runs one command as the "current process" host: a built-in runs
/// in-place (with fds saved/restored around it); an external program forks
/// a fresh child, which the caller is responsible for waiting on.
fn run_single_stage(
    cmd: &parser::Command,
    shell: &mut Shell,
    pgid_join: Option<libc::pid_t>,
) -> Result<StageOutcome, i32> {
    if cmd.is_empty() {
        return Ok(StageOutcome::Builtin(ExecutionAction::Continue(
            shell.last_exit_status,
        )));
    }

    let name = cmd.name.clone().unwrap();
    let (argv, redirs, sub_fds) = prepare_command(cmd, shell)?;

    if let Some(dispatch) = builtins::lookup(&name) {
        let saved = match redirect::SavedStdio::save() {
            Ok(s) => s,
            Err(e) => {
                eprintln!("jsh: {e}");
                close_fds(&sub_fds);
                return Err(1);
            }
        };
        let action = match apply_prepared(&redirs) {
            Ok(()) => dispatch(&argv, shell),
            Err(code) => ExecutionAction::Continue(code),
        };
        saved.restore();
        close_fds(&sub_fds);
        return Ok(StageOutcome::Builtin(action));
    }

    match unsafe { libc::fork() } {
        -1 => {
            eprintln!("fork: error to create a process");
            close_fds(&sub_fds);
            Err(1)
        }
        0 => {
            job_control::reset_child_signals();
            unsafe { libc::setpgid(0, pgid_join.unwrap_or(0)) };
            if let Err(code) = apply_prepared(&redirs) {
                std::process::exit(code);
            }
            exec_argv(&argv);
        }
        pid => {
            close_fds(&sub_fds);
            unsafe { libc::setpgid(pid, pgid_join.unwrap_or(pid)) };
            Ok(StageOutcome::Forked { pid })
        }
    }
}

/// Runs one command in a process that has already been forked for it (a
/// non-last pipeline stage). A built-in runs and its status is returned for
/// the caller to `exit` with; an external program `execvp`s directly in
/// place, with no further fork.
fn run_stage_already_forked(cmd: &parser::Command, shell: &mut Shell) -> i32 {
    if cmd.is_empty() {
        return shell.last_exit_status;
    }
    let name = cmd.name.clone().unwrap();
    let (argv, redirs, sub_fds) = match prepare_command(cmd, shell) {
        Ok(v) => v,
        Err(code) => return code,
    };

    if let Err(code) = apply_prepared(&redirs) {
        close_fds(&sub_fds);
        return code;
    }

    if let Some(dispatch) = builtins::lookup(&name) {
        let action = dispatch(&argv, shell);
        close_fds(&sub_fds);
        return match action {
            ExecutionAction::Continue(c) | ExecutionAction::Exit(c) => c,
        };
    }

    exec_argv(&argv);
}

fn prepare_command(
    cmd: &parser::Command,
    shell: &mut Shell,
) -> Result<(Vec<String>, Vec<PreparedRedirection>, Vec<i32>), i32> {
    let mut argv = Vec::with_capacity(cmd.argv.len());
    let mut sub_fds = Vec::new();

    for arg in &cmd.argv {
        match arg {
            Argument::Literal(s) => argv.push(s.clone()),
            Argument::Substitution(p) => match spawn_substitution(p, shell) {
                Ok(fd) => {
                    argv.push(format!("/proc/self/fd/{fd}"));
                    sub_fds.push(fd);
                }
                Err(e) => {
                    eprintln!("jsh: process substitution: {e}");
                    close_fds(&sub_fds);
                    return Err(1);
                }
            },
        }
    }

    let mut redirs = Vec::with_capacity(cmd.redirections.len());
    for r in &cmd.redirections {
        let path = match &r.target {
            RedirectTarget::File(f) => f.clone(),
            RedirectTarget::Substitution(p) => match spawn_substitution(p, shell) {
                Ok(fd) => {
                    sub_fds.push(fd);
                    format!("/proc/self/fd/{fd}")
                }
                Err(e) => {
                    eprintln!("jsh: process substitution: {e}");
                    close_fds(&sub_fds);
                    return Err(1);
                }
            },
        };
        redirs.push(PreparedRedirection {
            channel: r.channel,
            mode: r.mode,
            path,
        });
    }

    Ok((argv, redirs, sub_fds))
}

fn apply_prepared(redirs: &[PreparedRedirection]) -> Result<(), i32> {
    for r in redirs {
        if let Err(e) = redirect::apply(r.channel, r.mode, &r.path) {
            eprintln!("jsh: {e}");
            return Err(1);
        }
    }
    Ok(())
}

fn close_fds(fds: &[i32]) {
    for &fd in fds {
        unsafe { libc::close(fd) };
    }
}

fn reap_all(pids: &[libc::pid_t]) {
    for &pid in pids {
        let mut status: libc::c_int = 0;
        unsafe { libc::waitpid(pid, &mut status, 0) };
    }
}

/// Forks to run `pipeline`'s stdout into a pipe, returning the read end
/// (left open, non-close-on-exec, so the outer command can reach it at
/// `/proc/self/fd/<n>`). Mirrors a plain background fork, except the child
/// writes to the pipe instead of inheriting the shell's stdout.
fn spawn_substitution(pipeline: &parser::Pipeline, shell: &mut Shell) -> io::Result<i32> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);

    match unsafe { libc::fork() } {
        -1 => {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(read_fd);
                libc::close(write_fd);
            }
            Err(err)
        }
        0 => {
            unsafe { libc::close(read_fd) };
            job_control::reset_child_signals();
            unsafe { libc::dup2(write_fd, libc::STDOUT_FILENO) };
            if write_fd != libc::STDOUT_FILENO {
                unsafe { libc::close(write_fd) };
            }
            let status = run_pipeline_in_current_process(pipeline, shell, None);
            std::process::exit(status);
        }
        _pid => {
            unsafe { libc::close(write_fd) };
            Ok(read_fd)
        }
    }
}

/// Moves the terminal to a target process group for the duration of a
/// foreground wait, best-effort: a failure to do so (e.g. not running
/// attached to a tty) is reported once and otherwise ignored.
struct ForegroundGuard(Option<job_control::ForegroundTerminalGuard>);

impl ForegroundGuard {
    fn take(target_pgid: libc::pid_t) -> Self {
        if target_pgid <= 0 {
            return ForegroundGuard(None);
        }
        match job_control::ForegroundTerminalGuard::new(target_pgid) {
            Ok(guard) => ForegroundGuard(Some(guard)),
            Err(_) => ForegroundGuard(None),
        }
    }
}

fn exec_argv(argv: &[String]) -> ! {
    let program = CString::new(argv[0].as_str()).unwrap_or_default();
    let cargs: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(a.as_str()).unwrap_or_default())
        .collect();
    let mut raw: Vec<*const libc::c_char> = cargs.iter().map(|c| c.as_ptr()).collect();
    raw.push(std::ptr::null());

    unsafe { libc::execvp(program.as_ptr(), raw.as_ptr()) };

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ENOENT) {
        eprintln!("jsh: command not found: {}", argv[0]);
        std::process::exit(127);
    }
    eprintln!("jsh: {}: {err}", argv[0]);
    std::process::exit(err.raw_os_error().unwrap_or(126));
}
