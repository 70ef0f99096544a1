//! List command handler

use anyhow::Result;
use crashme_cli::{canonical, Narrator, ProbeConfig};

pub fn handle(config: &ProbeConfig) -> Result<()> {
    Narrator::list(&canonical(config.rounds));
    println!();
    println!("  Invocations per scenario: {}", config.rounds);
    Ok(())
}
