#[cfg(unix)]
use std::io;
#[cfg(unix)]
use std::sync::atomic::{AtomicBool, Ordering};

/// Set by the `SIGCHLD` handler, polled by the main loop between lines so
/// a background job's completion can be reported without the handler
/// itself touching the job table (which is not async-signal-safe).
#[cfg(unix)]
pub static CHILD_STATE_CHANGED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_sigchld(_signo: libc::c_int) {
    CHILD_STATE_CHANGED.store(true, Ordering::SeqCst);
}

/// Returns `true` and clears the flag if a `SIGCHLD` has arrived since the
/// last check.
#[cfg(unix)]
pub fn take_child_state_changed() -> bool {
    CHILD_STATE_CHANGED.swap(false, Ordering::SeqCst)
}

/// Installs the shell's top-level signal policy: the job-control signals
/// that would otherwise stop or kill an interactive shell are ignored at
/// the prompt (a foreground job gets them back via
/// [`reset_child_signals`] right before it execs), and `SIGCHLD` is wired
/// to the wake flag above.
#[cfg(unix)]
pub fn install_shell_signal_policy() -> io::Result<()> {
    for signal in [
        libc::SIGINT,
        libc::SIGTERM,
        libc::SIGTSTP,
        libc::SIGTTIN,
        libc::SIGTTOU,
    ] {
        if unsafe { libc::signal(signal, libc::SIG_IGN) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }

    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_sigchld as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = libc::SA_RESTART;
        if libc::sigaction(libc::SIGCHLD, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Restores default dispositions for the job-control signals. Every
/// forked child calls this before running a builtin or `execvp`, so jobs
/// are not born with their controlling signals ignored.
#[cfg(unix)]
pub fn reset_child_signals() {
    unsafe {
        for signal in [
            libc::SIGINT,
            libc::SIGTERM,
            libc::SIGTSTP,
            libc::SIGTTIN,
            libc::SIGTTOU,
            libc::SIGPIPE,
            libc::SIGCHLD,
        ] {
            libc::signal(signal, libc::SIG_DFL);
        }
    }
}

#[cfg(unix)]
pub(crate) enum WaitOutcome {
    Exited(i32),
    /// Terminated by a signal; carries the shell exit code (`128 + signal`).
    Killed(i32),
    Stopped,
    Continued,
    /// The child is no longer ours to wait on (reparented away or already
    /// reaped elsewhere); the original shell calls this "detached".
    Gone,
}

#[cfg(unix)]
pub(crate) fn send_continue_to_group(pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    loop {
        let rc = unsafe { libc::kill(-pgid, libc::SIGCONT) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

#[cfg(unix)]
pub(crate) struct ForegroundTerminalGuard {
    tty_fd: Option<libc::c_int>,
    shell_pgid: libc::pid_t,
}

#[cfg(unix)]
impl ForegroundTerminalGuard {
    pub(crate) fn new(target_pgid: libc::pid_t) -> io::Result<Self> {
        let tty_fd = if unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
            Some(libc::STDIN_FILENO)
        } else {
            None
        };

        let shell_pgid = unsafe { libc::getpgrp() };
        let guard = Self { tty_fd, shell_pgid };

        if let Some(fd) = guard.tty_fd {
            set_terminal_foreground(fd, target_pgid)?;
        }

        Ok(guard)
    }
}

#[cfg(unix)]
impl Drop for ForegroundTerminalGuard {
    fn drop(&mut self) {
        if let Some(fd) = self.tty_fd {
            let _ = set_terminal_foreground(fd, self.shell_pgid);
        }
    }
}

#[cfg(unix)]
pub(crate) fn wait_for_pid(pid: libc::pid_t) -> io::Result<WaitOutcome> {
    let mut raw_status: libc::c_int = 0;

    loop {
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, libc::WUNTRACED) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        if unsafe { libc::WIFSTOPPED(raw_status) } {
            return Ok(WaitOutcome::Stopped);
        }

        if let Some(code) = crate::status::exit_code_from_wait_status(raw_status) {
            return Ok(WaitOutcome::Exited(code));
        }
    }
}

/// Non-blocking poll of a single pid's status, mirroring
/// `update_status_of_job`: `WNOHANG|WUNTRACED|WCONTINUED`, with `ECHILD`
/// mapped to `Gone` instead of an error. Returns `None` if the process is
/// still running with no status change to report.
#[cfg(unix)]
pub(crate) fn poll_pid(pid: libc::pid_t) -> io::Result<Option<WaitOutcome>> {
    let mut raw_status: libc::c_int = 0;
    loop {
        let rc = unsafe {
            libc::waitpid(
                pid,
                &mut raw_status,
                libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
            )
        };
        if rc == 0 {
            return Ok(None);
        }
        if rc < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => return Ok(Some(WaitOutcome::Gone)),
                _ => return Err(err),
            }
        }

        if unsafe { libc::WIFSTOPPED(raw_status) } {
            return Ok(Some(WaitOutcome::Stopped));
        }
        if unsafe { libc::WIFCONTINUED(raw_status) } {
            return Ok(Some(WaitOutcome::Continued));
        }
        if unsafe { libc::WIFSIGNALED(raw_status) } {
            let signal = unsafe { libc::WTERMSIG(raw_status) };
            return Ok(Some(WaitOutcome::Killed(128 + signal)));
        }
        if unsafe { libc::WIFEXITED(raw_status) } {
            return Ok(Some(WaitOutcome::Exited(unsafe {
                libc::WEXITSTATUS(raw_status)
            })));
        }
        return Ok(None);
    }
}

#[cfg(unix)]
struct SignalIgnoreGuard {
    signal: libc::c_int,
    previous: libc::sighandler_t,
}

#[cfg(unix)]
impl SignalIgnoreGuard {
    fn ignore(signal: libc::c_int) -> io::Result<Self> {
        let previous = unsafe { libc::signal(signal, libc::SIG_IGN) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { signal, previous })
    }
}

#[cfg(unix)]
impl Drop for SignalIgnoreGuard {
    fn drop(&mut self) {
        unsafe {
            libc::signal(self.signal, self.previous);
        }
    }
}

#[cfg(unix)]
fn set_terminal_foreground(fd: libc::c_int, pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    let _sigttou = SignalIgnoreGuard::ignore(libc::SIGTTOU)?;
    loop {
        let rc = unsafe { libc::tcsetpgrp(fd, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}
