use anyhow::{Context as _, Result};

use super::Context;

pub fn run(context: &Context, target: &str, path: &str) -> Result<i32> {
    let connection = context.connect(target)?;
    let resolved = connection
        .make_directory(path)
        .with_context(|| format!("Failed to create {} on {}", path, connection.describe()))?;
    println!("{}", resolved);
    Ok(0)
}
