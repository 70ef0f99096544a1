//! # CrashMe
//!
//! Thread-affinity probe for enclave runtimes. Runs a fixed battery of
//! scenarios that vary which thread creates, uses and destroys an enclave,
//! and classifies each one as a success, a recoverable failure or a crash.
//!
//! - [`scenario`]: role placements and the canonical battery
//! - [`dispatcher`]: run work on the main thread or a joined worker
//! - [`runner`]: in-process execution, step records and outcomes
//! - [`isolation`]: one child process per scenario, so aborts become data

pub mod config;
pub mod dispatcher;
pub mod isolation;
pub mod narration;
pub mod runner;
pub mod scenario;

pub use config::{ProbeConfig, ProbeOverrides};
pub use dispatcher::{DispatchError, Dispatcher};
pub use isolation::IsolatedRunner;
pub use narration::Narrator;
pub use runner::{
    run_battery, BatteryReport, Outcome, ScenarioExecutor, ScenarioReport, ScenarioRunner, Step,
    StepRecord, StepResult,
};
pub use scenario::{canonical, Expectation, Placement, Role, Scenario, ScenarioError};
