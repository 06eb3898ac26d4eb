use anyhow::Result;
use command_channel::{NoOpWaitReporter, run_with_wait};
use std::time::Duration;

use super::Context;

pub fn run(context: &Context, target: &str, command: &str, timeout_ms: u64) -> Result<i32> {
    let connection = context.connect(target)?;
    let timeout = Duration::from_millis(timeout_ms);

    let result = run_with_wait(&NoOpWaitReporter, command, || {
        connection.execute_command(command, timeout)
    })?;

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    if result.timed_out() {
        eprintln!("Command timed out after {:?}", timeout);
    }
    Ok(result.exit_code)
}
