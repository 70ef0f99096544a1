//! Process isolation for crash-prone scenarios.
//!
//! A runtime abort cannot be caught inside the process that triggers it.
//! [`IsolatedRunner`] therefore re-executes the probe binary once per
//! scenario and reads the child's exit status: a child that writes a report
//! line and exits cleanly produced that report; a child that dies without one
//! crashed.

use crate::config::ProbeConfig;
use crate::narration::Narrator;
use crate::runner::{ScenarioExecutor, ScenarioReport};
use crate::scenario::{Scenario, ScenarioError};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, warn};

/// Prefix of the stdout line carrying a child's JSON report
pub const REPORT_PREFIX: &str = "CRASHME-REPORT ";

/// Format the report line a child writes on stdout
pub fn report_line(report: &ScenarioReport) -> Result<String, ScenarioError> {
    let json = serde_json::to_string(report)
        .map_err(|e| ScenarioError::Isolation(format!("failed to encode report: {}", e)))?;
    Ok(format!("{}{}", REPORT_PREFIX, json))
}

/// Human-readable description of an abnormal exit
pub fn describe_exit(status: &ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            let core = if status.core_dumped() { " (core dumped)" } else { "" };
            return format!("terminated by signal {}{}", signal, core);
        }
    }
    match status.code() {
        Some(code) => format!("exited with status {}", code),
        None => "terminated abnormally".to_string(),
    }
}

/// Runs each scenario in its own child process
pub struct IsolatedRunner {
    executable: PathBuf,
    child_args: Vec<String>,
    narrator: Narrator,
}

impl IsolatedRunner {
    pub fn new(executable: impl Into<PathBuf>, child_args: Vec<String>, narrator: Narrator) -> Self {
        Self {
            executable: executable.into(),
            child_args,
            narrator,
        }
    }

    /// Isolated runner re-executing the current binary
    pub fn for_current_exe(config: &ProbeConfig, narrator: Narrator) -> Result<Self, ScenarioError> {
        let executable = std::env::current_exe().map_err(|e| {
            ScenarioError::Isolation(format!("cannot locate current executable: {}", e))
        })?;
        Ok(Self::new(executable, config.child_args(), narrator))
    }
}

impl ScenarioExecutor for IsolatedRunner {
    fn execute(&self, scenario: &Scenario) -> Result<ScenarioReport, ScenarioError> {
        debug!(scenario = %scenario.name, executable = %self.executable.display(), "Launching isolated child");

        let output = Command::new(&self.executable)
            .arg("child")
            .arg("--scenario")
            .arg(&scenario.name)
            .args(&self.child_args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|e| {
                ScenarioError::Isolation(format!(
                    "failed to launch {}: {}",
                    self.executable.display(),
                    e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut report = None;
        for line in stdout.lines() {
            match line.strip_prefix(REPORT_PREFIX) {
                Some(json) => {
                    let parsed: ScenarioReport = serde_json::from_str(json).map_err(|e| {
                        ScenarioError::Isolation(format!("malformed child report: {}", e))
                    })?;
                    report = Some(parsed);
                }
                None => self.narrator.forward(line),
            }
        }

        match report {
            Some(report) if output.status.success() => Ok(report),
            _ if !output.status.success() => {
                let detail = describe_exit(&output.status);
                warn!(scenario = %scenario.name, %detail, "Isolated scenario crashed");
                Ok(ScenarioReport::crashed(scenario, detail))
            }
            _ => Err(ScenarioError::Isolation(format!(
                "child for {} exited cleanly without a report",
                scenario.name
            ))),
        }
    }
}
