//! Applies [`parser::Redirection`]s to the three standard streams.
//!
//! This is the raw-fd analogue of `run_command`'s redirection block in the
//! original shell: open the target, `dup2` it onto the channel, close the
//! now-unused fd. The non-overwrite/overwrite split on stdout/stderr is
//! this shell's own convention (`>` fails if the file exists, `>|` always
//! truncates) rather than the usual POSIX one.

use std::ffi::CString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::parser::{Channel, RedirMode};

/// A redirection failure the caller can report and recover from (the
/// pipeline keeps running with the next command, as the original shell
/// does) as opposed to one that should abort the whole process.
#[derive(Debug)]
pub enum RedirectError {
    /// Stdin source does not exist.
    NotFound(String),
    /// `>` target already exists.
    AlreadyExists(String),
    /// Anything else `open`/`dup2`/`close` reported.
    Os(String, std::io::Error),
}

impl fmt::Display for RedirectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectError::NotFound(path) => write!(f, "{path}: No such file or directory"),
            RedirectError::AlreadyExists(path) => {
                write!(f, "{path}: cannot overwrite existing file")
            }
            RedirectError::Os(path, err) => write!(f, "{path}: {err}"),
        }
    }
}

/// The three standard fds, saved before a command's redirections are
/// applied and dup'd back afterward so the shell's own streams are
/// untouched once the command returns.
pub struct SavedStdio {
    stdin: i32,
    stdout: i32,
    stderr: i32,
}

impl SavedStdio {
    pub fn save() -> std::io::Result<Self> {
        let stdin = dup_checked(libc::STDIN_FILENO)?;
        let stdout = dup_checked(libc::STDOUT_FILENO)?;
        let stderr = dup_checked(libc::STDERR_FILENO)?;
        Ok(SavedStdio {
            stdin,
            stdout,
            stderr,
        })
    }

    /// Restore the saved fds onto 0/1/2 and close the saved copies.
    pub fn restore(self) {
        unsafe {
            libc::dup2(self.stdin, libc::STDIN_FILENO);
            libc::dup2(self.stdout, libc::STDOUT_FILENO);
            libc::dup2(self.stderr, libc::STDERR_FILENO);
            libc::close(self.stdin);
            libc::close(self.stdout);
            libc::close(self.stderr);
        }
    }
}

fn dup_checked(fd: i32) -> std::io::Result<i32> {
    let copy = unsafe { libc::dup(fd) };
    if copy < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(copy)
}

fn channel_fd(channel: Channel) -> i32 {
    match channel {
        Channel::Stdin => libc::STDIN_FILENO,
        Channel::Stdout => libc::STDOUT_FILENO,
        Channel::Stderr => libc::STDERR_FILENO,
    }
}

fn open_flags(channel: Channel, mode: RedirMode) -> i32 {
    match channel {
        Channel::Stdin => libc::O_RDONLY,
        Channel::Stdout | Channel::Stderr => {
            let mut flags = libc::O_WRONLY | libc::O_CREAT;
            flags |= match mode {
                RedirMode::Append => libc::O_APPEND,
                RedirMode::NoOverwrite => libc::O_EXCL,
                RedirMode::Overwrite => libc::O_TRUNC,
                RedirMode::None => unreachable!("stdout/stderr never use RedirMode::None"),
            };
            flags
        }
    }
}

/// Opens `path` with the flags implied by `channel`/`mode` and `dup2`s it
/// onto the channel's fd, closing the intermediate descriptor. Returns a
/// [`RedirectError`] for the conditions the shell treats as recoverable
/// (missing stdin source, pre-existing no-overwrite target); anything else
/// bubbles up as `Os`.
pub fn apply(channel: Channel, mode: RedirMode, path: &str) -> Result<(), RedirectError> {
    let c_path = CString::new(Path::new(path).as_os_str().as_bytes())
        .map_err(|_| RedirectError::Os(path.to_string(), std::io::Error::from_raw_os_error(libc::EINVAL)))?;
    let flags = open_flags(channel, mode);
    let fd = unsafe { libc::open(c_path.as_ptr(), flags, 0o666) };
    if fd < 0 {
        let err = std::io::Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::ENOENT) if channel == Channel::Stdin => {
                RedirectError::NotFound(path.to_string())
            }
            Some(libc::EEXIST) => RedirectError::AlreadyExists(path.to_string()),
            _ => RedirectError::Os(path.to_string(), err),
        });
    }

    let target = channel_fd(channel);
    if fd != target && unsafe { libc::dup2(fd, target) } < 0 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(RedirectError::Os(path.to_string(), err));
    }
    if fd != target {
        unsafe { libc::close(fd) };
    }
    Ok(())
}

/// A lone saved copy of stdin. The multi-command pipeline wiring points the
/// shell's own fd 0 at a pipe's read end for the duration of the last
/// stage; this is what lets it point back at the terminal afterward instead
/// of leaving the shell reading from an exhausted pipe.
pub struct SavedStdin(i32);

impl SavedStdin {
    pub fn save() -> std::io::Result<Self> {
        Ok(SavedStdin(dup_checked(libc::STDIN_FILENO)?))
    }

    pub fn restore(self) {
        unsafe {
            libc::dup2(self.0, libc::STDIN_FILENO);
            libc::close(self.0);
        }
    }
}
