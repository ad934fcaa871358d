#[cfg(unix)]
use std::io::Write;
#[cfg(unix)]
use std::process::{Command, Stdio};
#[cfg(unix)]
use std::time::Duration;

#[cfg(unix)]
fn run_shell(lines: &[&str]) -> std::process::Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_jsh"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn jsh");

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
        writeln!(stdin, "exit").expect("write exit");
    }

    child.wait_with_output().expect("wait output")
}

#[cfg(unix)]
#[test]
fn pipeline_sigpipe_does_not_abort_shell() {
    // yes writes indefinitely; head -1 exits after one line, closing the read end.
    // yes receives SIGPIPE (SIG_DFL in the forked child) and terminates; the
    // shell itself only resets SIGPIPE to default in forked children, so it
    // survives untouched and keeps processing the next line normally.
    let output = run_shell(&["yes | head -1", "echo ALIVE", "?"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(stdout.trim_end().ends_with('0'), "stdout was: {stdout:?}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[cfg(unix)]
#[test]
fn shell_ignores_sigtstp_sent_directly_to_it() {
    // Deliver SIGTSTP to the shell's own pid from outside, the way a
    // terminal would on a Ctrl-Z at the prompt. With the job-control
    // signals ignored at the top level, the shell must not stop.
    let mut child = Command::new(env!("CARGO_BIN_EXE_jsh"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn jsh");

    let pid = child.id() as libc::pid_t;
    std::thread::sleep(Duration::from_millis(50));
    unsafe {
        libc::kill(pid, libc::SIGTSTP);
    }
    std::thread::sleep(Duration::from_millis(50));

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        writeln!(stdin, "echo ALIVE").expect("write line");
        writeln!(stdin, "exit").expect("write exit");
    }

    let output = child.wait_with_output().expect("wait output");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}

#[cfg(unix)]
#[test]
fn shell_ignores_sigterm_sent_directly_to_it() {
    // A bare SIGTERM is in the shell's own ignore set (alongside SIGINT,
    // SIGTSTP, SIGTTIN, SIGTTOU), so it must not kill the shell.
    let mut child = Command::new(env!("CARGO_BIN_EXE_jsh"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn jsh");

    let pid = child.id() as libc::pid_t;
    std::thread::sleep(Duration::from_millis(50));
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    std::thread::sleep(Duration::from_millis(50));

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        writeln!(stdin, "echo ALIVE").expect("write line");
        writeln!(stdin, "exit").expect("write exit");
    }

    let output = child.wait_with_output().expect("wait output");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ALIVE"), "stdout was: {stdout}");
    assert!(output.status.success(), "shell did not exit cleanly");
}
