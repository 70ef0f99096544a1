//! Child command handler: one scenario per process, report on stdout

use super::lifecycle_manager;
use anyhow::Result;
use crashme_cli::isolation::report_line;
use crashme_cli::scenario::select;
use crashme_cli::{Narrator, ProbeConfig, ScenarioRunner};
use tracing::debug;

pub fn handle(config: &ProbeConfig, name: &str) -> Result<()> {
    let scenario = select(config.rounds, &[name.to_string()])?.remove(0);
    debug!(scenario = %scenario.name, pid = std::process::id(), "Running isolated scenario");

    let runner = ScenarioRunner::new(lifecycle_manager(config), Narrator::stdout());
    let report = runner.run(&scenario)?;

    // Only reached when the runtime did not abort the process.
    println!("{}", report_line(&report)?);
    Ok(())
}
