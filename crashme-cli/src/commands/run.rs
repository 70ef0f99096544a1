//! Run command handler

use super::lifecycle_manager;
use anyhow::Result;
use colored::Colorize;
use crashme_cli::scenario::select;
use crashme_cli::{run_battery, IsolatedRunner, Narrator, ProbeConfig, ScenarioRunner};
use tracing::info;

pub fn handle(config: &ProbeConfig, names: &[String], isolate: bool) -> Result<()> {
    let scenarios = select(config.rounds, names)?;
    let narrator = Narrator::stdout();

    println!("{} CrashMe thread-affinity probe", "→".cyan().bold());
    println!("  Scenarios:       {}", scenarios.len().to_string().cyan());
    println!("  Rounds:          {}", config.rounds.to_string().cyan());
    println!("  Foreign use:     {}", config.policy.foreign_use.to_string().cyan());
    println!("  Foreign destroy: {}", config.policy.foreign_destroy.to_string().cyan());
    let mode = if isolate {
        "isolated (one process per scenario)"
    } else {
        "in-process"
    };
    println!("  Mode:            {}", mode.cyan());
    println!();

    let battery = if isolate {
        let executor = IsolatedRunner::for_current_exe(config, narrator)?;
        run_battery(&executor, &scenarios, narrator)?
    } else {
        let runner = ScenarioRunner::new(lifecycle_manager(config), narrator);
        info!(runtime = ?runner.manager().runtime().info(), "Running in-process");
        run_battery(&runner, &scenarios, narrator)?
    };

    if let Some(name) = &battery.halted_by {
        anyhow::bail!("scenario {} failed during setup or teardown", name);
    }

    if battery.crashes() > 0 {
        println!(
            "{} {} scenario(s) crashed their process",
            "!".yellow().bold(),
            battery.crashes()
        );
    }
    Ok(())
}
