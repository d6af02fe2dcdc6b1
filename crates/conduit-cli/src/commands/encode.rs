use anyhow::{Context, Result};

use conduit_types::{resolve, Action, DeploymentRequest};

/// Execute the `encode` command: print one wire request per stage.
pub fn execute(stream: &str, group: Option<&str>, undeploy: bool) -> Result<()> {
    let action = if undeploy {
        Action::Undeploy
    } else {
        Action::Deploy
    };
    let descriptors = resolve(stream, group).context("Failed to resolve stream")?;
    for descriptor in descriptors {
        let bytes = DeploymentRequest::new(descriptor, action).encode()?;
        println!("{}", String::from_utf8(bytes)?);
    }
    Ok(())
}
