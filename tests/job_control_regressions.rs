use std::io::Write;
use std::process::{Command, Stdio};

// This shell has no quoting (see the grammar's Non-goals), so any multi-word
// script handed to `sh` has to live in a file on disk rather than behind a
// `-c '...'` argument.

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

struct TempScript(std::path::PathBuf);

impl TempScript {
    fn new(label: &str, body: &str) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "jsh_jobctl_{label}_{}_{}",
            std::process::id(),
            label.len()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("script.sh");
        std::fs::write(&path, body).unwrap();
        TempScript(path)
    }

    fn path(&self) -> &std::path::Path {
        &self.0
    }
}

impl Drop for TempScript {
    fn drop(&mut self) {
        if let Some(dir) = self.0.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

#[cfg(unix)]
#[test]
fn background_job_is_registered_and_announced() {
    let output = run_shell(&["sleep 5 &", "jobs"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[1]"), "stderr was: {stderr}");
    assert!(stderr.contains("running"), "stderr was: {stderr}");
}

#[cfg(unix)]
#[test]
fn kill_transitions_job_to_killed_and_it_is_reaped_on_next_poll() {
    // the poll happens at the top of the read loop, before the next prompt,
    // so a line after `kill 1` is what observes the transition.
    let output = run_shell(&["sleep 30 &", "kill 1", "jobs"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("killed"), "stderr was: {stderr}");
}

#[cfg(unix)]
#[test]
fn fg_waits_for_background_job_and_preserves_its_exit_status() {
    let script = TempScript::new("exit7", "sleep 1\nexit 7\n");
    let cmd = format!("sh {} &", script.path().display());
    let output = run_shell(&[cmd.as_str(), "fg", "?"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim_end().ends_with('7'), "stdout was: {stdout:?}");
}

#[cfg(unix)]
#[test]
fn fg_preserves_signal_exit_code() {
    let script = TempScript::new("selfint", "sleep 1\nkill -INT $$\n");
    let cmd = format!("sh {} &", script.path().display());
    let output = run_shell(&[cmd.as_str(), "fg", "?"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim_end().ends_with("130"), "stdout was: {stdout:?}");
}

#[cfg(unix)]
#[test]
fn fg_on_unknown_job_id_is_a_recoverable_error() {
    let output = run_shell(&["fg 99999"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no such job"), "stderr was: {stderr}");
}
