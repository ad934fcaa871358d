//! The shell's execution context: the interpreter state that used to live
//! in globals (`last_command_exit_value`, the `jobs` array, the prompt
//! string) is carried here instead, so the read loop and the test suite can
//! each own a private instance.

use std::io;

use crate::job_control;
use crate::jobs::JobTable;

pub struct Shell {
    pub last_exit_status: i32,
    pub jobs: JobTable,
}

impl Shell {
    /// Installs the shell's signal policy and returns a fresh context. Only
    /// one of these should be live per process — the signal policy is
    /// process-global.
    pub fn new() -> io::Result<Self> {
        job_control::install_shell_signal_policy()?;
        Ok(Shell {
            last_exit_status: 0,
            jobs: JobTable::new(),
        })
    }

    /// The prompt string, recomputed from the live working directory and
    /// job count on every call rather than cached and invalidated.
    pub fn prompt(&self) -> String {
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "?".to_string());
        let n = self.jobs.len();
        if n == 0 {
            format!("jsh:{cwd}> ")
        } else {
            format!("jsh:{cwd} [{n} job{}]> ", if n == 1 { "" } else { "s" })
        }
    }

    /// Non-blocking job-table maintenance, run once before each line is
    /// read. Skips the reap pass entirely unless `SIGCHLD` has fired since
    /// the last check, so an idle prompt loop isn't calling `waitpid` on
    /// every job on every line for no reason.
    pub fn poll_jobs(&mut self) {
        if job_control::take_child_state_changed() {
            self.jobs.reap();
        }
    }
}
