use anyhow::{Context, Result};

use conduit_types::resolve;

/// Execute the `resolve` command: print stage descriptors as a JSON array.
pub fn execute(stream: &str, group: Option<&str>) -> Result<()> {
    let descriptors = resolve(stream, group).context("Failed to resolve stream")?;
    println!("{}", serde_json::to_string_pretty(&descriptors)?);
    Ok(())
}
