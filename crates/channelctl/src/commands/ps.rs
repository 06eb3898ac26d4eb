use anyhow::Result;

use super::Context;

pub fn run(context: &Context, target: &str) -> Result<i32> {
    let processes = context.connect(target)?.list_processes()?;
    println!("{:>8}  {:<12} COMMAND", "PID", "USER");
    for process in processes {
        println!("{:>8}  {:<12} {}", process.pid, process.user, process.command_line);
    }
    Ok(0)
}
