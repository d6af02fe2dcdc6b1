use anyhow::Result;

use conduit_engine::ModuleCatalog;

/// Execute the `modules` command: list built-in module kinds.
pub fn execute() -> Result<()> {
    let catalog = ModuleCatalog::builtin();
    for (kind, types) in catalog.kinds() {
        let types: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
        println!("{kind:<12} {}", types.join(", "));
    }
    Ok(())
}
