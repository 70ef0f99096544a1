//! Human-readable narration of a probing run.
//!
//! Lines are written to stdout as steps happen, from whichever thread
//! performs them, so a run that aborts still shows how far it got.

use crate::runner::{BatteryReport, Outcome, ScenarioReport, Step, StepRecord, StepResult};
use crate::scenario::{Role, Scenario};
use colored::Colorize;
use crashme_enclave::ThreadIdentity;

const SEPARATOR_WIDTH: usize = 78;

#[derive(Debug, Clone, Copy)]
pub struct Narrator {
    enabled: bool,
}

impl Narrator {
    pub fn stdout() -> Self {
        Self { enabled: true }
    }

    pub fn silent() -> Self {
        Self { enabled: false }
    }

    /// Pass through a narration line produced by a child process
    pub fn forward(&self, line: &str) {
        if self.enabled {
            println!("{}", line);
        }
    }

    pub fn separator(&self) {
        if self.enabled {
            println!();
            println!("{}", "-".repeat(SEPARATOR_WIDTH).dimmed());
            println!();
        }
    }

    pub fn scenario_started(&self, scenario: &Scenario) {
        if !self.enabled {
            return;
        }
        println!(
            "{} Running {}: {}",
            "→".cyan().bold(),
            scenario.name.cyan().bold(),
            scenario.description
        );
        println!(
            "  Roles:      create={} use={} destroy={}",
            scenario.creator.to_string().cyan(),
            scenario.user.to_string().cyan(),
            scenario.destroyer.to_string().cyan()
        );
        println!("  Expecting:  {}", scenario.expectation.to_string().cyan());
    }

    pub fn stage_started(&self, roles: &[Role], thread: &ThreadIdentity) {
        if !self.enabled {
            return;
        }
        let roles: Vec<String> = roles.iter().map(Role::to_string).collect();
        println!(
            "{} {} in thread {}",
            "→".dimmed(),
            roles.join(" + "),
            thread.to_string().cyan()
        );
    }

    pub fn step(&self, record: &StepRecord) {
        if !self.enabled {
            return;
        }
        let label = match record.step {
            Step::Create => "Enclave created and service loaded".to_string(),
            Step::Use { index } => format!("Call #{}", index),
            Step::Destroy => "Enclave destroyed".to_string(),
        };
        match &record.result {
            StepResult::Ok { response: Some(response) } => println!(
                "  {} {} in thread {}: {}",
                "✓".green().bold(),
                label,
                record.thread,
                response.green()
            ),
            StepResult::Ok { response: None } => {
                println!("  {} {} in thread {}", "✓".green().bold(), label, record.thread)
            }
            StepResult::Failed { kind, message } => println!(
                "  {} {} in thread {} failed ({}): {}",
                "✗".red().bold(),
                label,
                record.thread,
                kind.to_string().red(),
                message.red()
            ),
        }
    }

    pub fn scenario_finished(&self, report: &ScenarioReport) {
        if !self.enabled {
            return;
        }
        let verdict = if report.matches_expectation {
            "as expected".green()
        } else {
            "UNEXPECTED".red().bold()
        };
        println!(
            "{} {} finished: {} ({})",
            outcome_marker(&report.outcome),
            report.scenario.bold(),
            outcome_label(&report.outcome),
            verdict
        );
        if let Some(message) = &report.worker_panic {
            println!("  {} worker panic: {}", "!".yellow().bold(), message.yellow());
        }
    }

    pub fn summary(&self, battery: &BatteryReport) {
        if !self.enabled {
            return;
        }
        println!();
        println!(
            "  {:<18} {:<22} {:<22} {:<10}",
            "SCENARIO".bold(),
            "EXPECTED".bold(),
            "OUTCOME".bold(),
            "VERDICT".bold()
        );
        println!("  {}", "-".repeat(SEPARATOR_WIDTH - 2));
        for report in &battery.reports {
            let verdict = if report.matches_expectation {
                "ok".green()
            } else {
                "mismatch".red()
            };
            println!(
                "  {:<18} {:<22} {:<22} {:<10}",
                report.scenario.cyan(),
                report.expectation.to_string(),
                outcome_label(&report.outcome),
                verdict
            );
        }
        if let Some(name) = &battery.halted_by {
            println!();
            println!(
                "{} Run halted after {}: setup/teardown failure",
                "✗".red().bold(),
                name.red()
            );
        }
    }

    /// Print the scenario catalogue, regardless of whether narration is on
    pub fn list(scenarios: &[Scenario]) {
        println!("{} Canonical scenarios:", "→".cyan().bold());
        println!();
        println!(
            "  {:<18} {:<10} {:<10} {:<10} {:<22}",
            "NAME".bold(),
            "CREATE".bold(),
            "USE".bold(),
            "DESTROY".bold(),
            "EXPECTED".bold()
        );
        println!("  {}", "-".repeat(SEPARATOR_WIDTH - 2));
        for scenario in scenarios {
            println!(
                "  {:<18} {:<10} {:<10} {:<10} {:<22}",
                scenario.name.cyan(),
                scenario.creator.to_string(),
                scenario.user.to_string(),
                scenario.destroyer.to_string(),
                scenario.expectation.to_string()
            );
            println!("  {:<18} {}", "", scenario.description.dimmed());
        }
    }
}

fn outcome_marker(outcome: &Outcome) -> colored::ColoredString {
    match outcome {
        Outcome::Success { .. } => "✓".green().bold(),
        Outcome::RecoverableFailure { .. } => "!".yellow().bold(),
        Outcome::Crash { .. } => "✗".red().bold(),
    }
}

fn outcome_label(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success { responses } => format!("success ({} responses)", responses.len()),
        Outcome::RecoverableFailure { kind, .. } => format!("failure: {}", kind),
        Outcome::Crash { detail } => format!("crash: {}", detail),
    }
}
