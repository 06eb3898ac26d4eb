use anyhow::{Context as _, Result};
use command_channel::{NoOpWaitReporter, run_with_wait};
use std::path::Path;
use std::time::Duration;

use super::Context;

pub fn run(context: &Context, target: &str, source: &Path, destination: &str, timeout: Option<u64>) -> Result<i32> {
    let connection = context.connect(target)?;
    let message = format!("Copying {} to {}", source.display(), destination);

    run_with_wait(&NoOpWaitReporter, &message, || {
        connection.copy_file_with_timeout(source, destination, timeout.map(Duration::from_secs))
    })
    .with_context(|| format!("Failed to copy to {}", connection.describe()))?;

    println!("✓ Copied {} to {}:{}", source.display(), target, destination);
    Ok(0)
}
