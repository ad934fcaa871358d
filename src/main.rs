mod builtins;
mod executor;
mod job_control;
mod jobs;
mod parser;
mod redirect;
mod shell;
mod status;

use std::io::{self, BufRead, Write};

use executor::ExecutionAction;
use shell::Shell;

fn main() {
    let mut shell = match Shell::new() {
        Ok(shell) => shell,
        Err(e) => {
            eprintln!("jsh: failed to initialize: {e}");
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        shell.poll_jobs();

        eprint!("{}", shell.prompt());
        let _ = io::stderr().flush();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                eprintln!("jsh: error reading input: {e}");
                break;
            }
            None => break,
        };

        match parser::PipelineList::parse(&line) {
            Ok(list) => match executor::execute_pipeline_list(list, &mut shell) {
                ExecutionAction::Continue(code) => shell.last_exit_status = code,
                ExecutionAction::Exit(code) => {
                    shell.last_exit_status = code;
                    break;
                }
            },
            Err(message) => {
                eprintln!("{message}");
                shell.last_exit_status = 1;
            }
        }
    }

    std::process::exit(shell.last_exit_status);
}
