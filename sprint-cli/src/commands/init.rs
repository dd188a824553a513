//! Write a default configuration file.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;

/// Run the init command.
pub fn run(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    Config::default().save(path)?;

    println!("Config written to {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the [session] section to match your workout");
    println!("  2. Check it: sprint-sync plan");
    println!("  3. Try it:   sprint-sync simulate");

    Ok(())
}
