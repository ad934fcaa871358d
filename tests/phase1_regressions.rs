use std::io::Write;
use std::process::{Command, Stdio};

// This shell has no quoting (see the grammar's Non-goals), so every command
// line below is built from bare, space-free words -- exactly what a real
// interactive session without quoting support would have to look like.

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

#[test]
fn external_to_external_pipeline_outputs() {
    let output = run_shell(&["echo hello | sort"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("hello"), "stdout was: {stdout}");
}

#[test]
fn builtin_stdin_redirection_is_accepted() {
    let temp_dir = std::env::temp_dir().join(format!("jsh_builtin_stdin_{}", std::process::id()));
    std::fs::create_dir_all(&temp_dir).unwrap();
    let input_path = temp_dir.join("input.txt");
    std::fs::write(&input_path, "ignored").unwrap();

    let cmd = format!("pwd < {}", input_path.display());
    let output = run_shell(&[cmd.as_str(), "?"]);

    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "shell did not exit cleanly");
    assert!(!stderr.contains("No such file"), "stderr was: {stderr}");

    let _ = std::fs::remove_dir_all(&temp_dir);
}

#[cfg(unix)]
#[test]
fn stderr_redirection_keeps_it_out_of_the_pipe() {
    let dir = std::env::temp_dir().join(format!("jsh_stderr_redir_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let script = dir.join("script.sh");
    std::fs::write(&script, "echo out\necho bad 1>&2\n").unwrap();
    let errfile = dir.join("err.txt");

    let cmd = format!("sh {} 2>| {}", script.display(), errfile.display());
    let output = run_shell(&[cmd.as_str()]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("out"), "stdout was: {stdout}");
    assert!(!stdout.contains("bad"), "stdout was: {stdout}");

    let captured = std::fs::read_to_string(&errfile).unwrap_or_default();
    assert!(captured.contains("bad"), "captured stderr was: {captured}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn pipeline_of_three_commands_runs_last_stage_with_correct_status() {
    let output = run_shell(&["printf a\\nb\\nc\\n | grep b | wc -l"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.trim().ends_with('1'), "stdout was: {stdout:?}");
}

// The multi-command pipeline protocol runs its last stage directly in the
// shell process with fd 0 pointed at the previous stage's pipe; if that
// original stdin is never restored, the shell's own input is left attached
// to a spent pipe and the next read sees EOF. `run_shell` writes every
// line up front, so a `BufReader` can read them all in one syscall before
// fd 0 is ever clobbered -- it would not catch this. Feeding lines one at a
// time, and only after the prior command's output has actually appeared,
// forces the read loop to go back to the real pipe for the next line.
#[test]
fn shell_keeps_reading_after_a_multi_command_pipeline_fed_one_line_at_a_time() {
    use std::io::{BufRead, BufReader};

    let mut child = Command::new(env!("CARGO_BIN_EXE_jsh"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn jsh");

    let mut stdout = BufReader::new(child.stdout.take().expect("stdout"));

    writeln!(
        child.stdin.as_mut().expect("stdin"),
        "printf a\\nb\\n | wc -l"
    )
    .expect("write pipeline line");

    let mut pipeline_output = String::new();
    stdout
        .read_line(&mut pipeline_output)
        .expect("read pipeline output");
    assert_eq!(
        pipeline_output.trim(),
        "2",
        "pipeline output was: {pipeline_output:?}"
    );

    {
        let stdin = child.stdin.as_mut().expect("stdin");
        writeln!(stdin, "echo STILL_ALIVE").expect("write second line");
        writeln!(stdin, "exit").expect("write exit");
    }

    let mut second_output = String::new();
    stdout
        .read_line(&mut second_output)
        .expect("read second command's output");
    assert_eq!(
        second_output.trim(),
        "STILL_ALIVE",
        "second command's output was: {second_output:?}"
    );

    let _ = child.wait();
}

#[test]
fn redirection_without_filename_is_a_parse_error() {
    let output = run_shell(&["echo hi >"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("jsh: parse error"), "stderr was: {stderr}");
}

#[cfg(unix)]
#[test]
fn process_substitution_exposes_proc_self_fd_path() {
    let output = run_shell(&["diff <(printf a\\n) <(printf a\\n)", "?"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    // identical inputs, so diff reports no differences (status 0)
    assert!(stdout.trim_end().ends_with('0'), "stdout was: {stdout:?}");
}
