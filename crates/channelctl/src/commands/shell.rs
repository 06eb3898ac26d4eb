use anyhow::Result;
use command_channel::{ErrorSource, RunnerEvent};
use std::io::BufRead;
use std::sync::Arc;
use std::sync::mpsc;

use super::Context;

/// Run `command` interactively until it exits or stdin ends
pub fn run(context: &Context, target: &str, command: &str) -> Result<i32> {
    let connection = context.connect(target)?;
    let (exit_tx, exit_rx) = mpsc::channel();

    let handle = connection.begin_execute_async_command(
        command,
        true,
        Arc::new(move |event: RunnerEvent| match event {
            RunnerEvent::Output(line) => println!("{}", line),
            RunnerEvent::Chunk(bytes) => print!("{}", String::from_utf8_lossy(&bytes)),
            RunnerEvent::Error {
                source: ErrorSource::Stderr,
                detail,
            } => eprintln!("{}", detail),
            RunnerEvent::Error {
                source: ErrorSource::Fault,
                detail,
            } => {
                eprintln!("Connection failed: {}", detail);
                let _ = exit_tx.send(1);
            }
            RunnerEvent::Closed { exit_code } => {
                let _ = exit_tx.send(exit_code);
            }
        }),
    )?;

    // Forward input from a separate thread so the command's exit ends the session.
    let input = handle.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if !input.is_running() {
                break;
            }
            input.write_line(&line);
        }
    });

    let code = exit_rx.recv().unwrap_or(1);
    handle.close();
    Ok(code)
}
