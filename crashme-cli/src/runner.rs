//! Scenario runner.
//!
//! Executes a scenario stage by stage through the [`Dispatcher`], handing the
//! loaded [`ServiceHandle`] from one stage to the next as an owned token.
//! Every create, use and destroy step is recorded individually.

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::narration::Narrator;
use crate::scenario::{Expectation, Placement, Role, Scenario, ScenarioError};
use crashme_enclave::{EnclaveError, ErrorKind, LifecycleManager, ServiceHandle, ThreadIdentity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// One recorded step of a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Create,
    Use { index: usize },
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepResult {
    Ok { response: Option<String> },
    Failed { kind: ErrorKind, message: String },
}

impl StepResult {
    fn failed(err: &EnclaveError) -> Self {
        StepResult::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StepResult::Ok { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            StepResult::Ok { .. } => None,
            StepResult::Failed { kind, .. } => Some(*kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub placement: Placement,
    pub thread: ThreadIdentity,
    pub result: StepResult,
}

/// Classified result of a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success { responses: Vec<String> },
    RecoverableFailure { kind: ErrorKind, responses: Vec<String> },
    /// The process running the scenario terminated abnormally
    Crash { detail: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn is_crash(&self) -> bool {
        matches!(self, Outcome::Crash { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub expectation: Expectation,
    pub steps: Vec<StepRecord>,
    pub outcome: Outcome,
    pub worker_panic: Option<String>,
    pub matches_expectation: bool,
}

impl ScenarioReport {
    /// Classify recorded steps into an outcome and check the expectation
    pub fn from_steps(scenario: &Scenario, steps: Vec<StepRecord>, worker_panic: Option<String>) -> Self {
        let responses: Vec<String> = steps
            .iter()
            .filter_map(|record| match &record.result {
                StepResult::Ok { response: Some(response) } => Some(response.clone()),
                _ => None,
            })
            .collect();

        let first_failure = steps.iter().find_map(|record| record.result.error_kind());
        let outcome = match (&worker_panic, first_failure) {
            (Some(_), _) => Outcome::RecoverableFailure {
                kind: ErrorKind::WorkerPanic,
                responses,
            },
            (None, Some(kind)) => Outcome::RecoverableFailure { kind, responses },
            (None, None) => Outcome::Success { responses },
        };

        let mut report = Self {
            scenario: scenario.name.clone(),
            expectation: scenario.expectation,
            steps,
            outcome,
            worker_panic,
            matches_expectation: false,
        };
        report.matches_expectation = report.evaluate();
        report
    }

    /// Report for a scenario whose process terminated abnormally
    pub fn crashed(scenario: &Scenario, detail: impl Into<String>) -> Self {
        let mut report = Self {
            scenario: scenario.name.clone(),
            expectation: scenario.expectation,
            steps: Vec::new(),
            outcome: Outcome::Crash {
                detail: detail.into(),
            },
            worker_panic: None,
            matches_expectation: false,
        };
        report.matches_expectation = report.evaluate();
        report
    }

    /// First failed setup or teardown step; such a failure ends the run
    pub fn fatal_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|record| {
            record
                .result
                .error_kind()
                .map(|kind| kind.is_fatal())
                .unwrap_or(false)
        })
    }

    fn uses(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|record| matches!(record.step, Step::Use { .. }))
    }

    fn evaluate(&self) -> bool {
        match self.expectation {
            Expectation::Success => self.outcome.is_success(),
            Expectation::NotSuccess => !self.outcome.is_success(),
            Expectation::InvocationRejected => {
                let lifecycle_ok = [Step::Create, Step::Destroy].iter().all(|step| {
                    self.steps
                        .iter()
                        .any(|record| record.step == *step && record.result.is_ok())
                });
                let mut uses = self.uses().peekable();
                let all_rejected = uses.peek().is_some()
                    && uses.all(|record| record.result.error_kind() == Some(ErrorKind::Invocation));
                lifecycle_ok && all_rejected && self.worker_panic.is_none()
            }
        }
    }
}

/// Reports of a battery run, in execution order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatteryReport {
    pub reports: Vec<ScenarioReport>,
    /// Scenario whose setup or teardown failure stopped the run
    pub halted_by: Option<String>,
}

impl BatteryReport {
    pub fn all_as_expected(&self) -> bool {
        self.reports.iter().all(|report| report.matches_expectation)
    }

    pub fn crashes(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| report.outcome.is_crash())
            .count()
    }
}

/// Something that can execute one scenario and report on it
pub trait ScenarioExecutor {
    fn execute(&self, scenario: &Scenario) -> Result<ScenarioReport, ScenarioError>;
}

/// Run scenarios strictly in order, stopping after a setup or teardown
/// failure.
pub fn run_battery(
    executor: &dyn ScenarioExecutor,
    scenarios: &[Scenario],
    narrator: Narrator,
) -> Result<BatteryReport, ScenarioError> {
    let mut battery = BatteryReport::default();

    for (index, scenario) in scenarios.iter().enumerate() {
        if index > 0 {
            narrator.separator();
        }

        let report = executor.execute(scenario)?;
        narrator.scenario_finished(&report);

        let fatal = report.fatal_step().is_some();
        battery.reports.push(report);
        if fatal {
            warn!(scenario = %scenario.name, "Setup/teardown failure; halting run");
            battery.halted_by = Some(scenario.name.clone());
            break;
        }
    }

    narrator.summary(&battery);
    Ok(battery)
}

/// Token handed from stage to stage
struct StageToken {
    service: Option<ServiceHandle>,
    halted: bool,
}

struct StageContext {
    manager: Arc<LifecycleManager>,
    journal: Arc<Mutex<Vec<StepRecord>>>,
    narrator: Narrator,
    placement: Placement,
    roles: Vec<Role>,
    invocations: usize,
}

impl StageContext {
    fn execute(self, mut token: StageToken) -> StageToken {
        let thread = ThreadIdentity::current();
        self.narrator.stage_started(&self.roles, &thread);

        for role in &self.roles {
            if token.halted {
                break;
            }
            match role {
                Role::Create => match self.manager.create_and_load() {
                    Ok(service) => {
                        token.service = Some(service);
                        self.record(Step::Create, &thread, StepResult::Ok { response: None });
                    }
                    Err(err) => {
                        self.record(Step::Create, &thread, StepResult::failed(&err));
                        token.halted = true;
                    }
                },
                Role::Use => {
                    let Some(service) = token.service.as_ref() else {
                        token.halted = true;
                        continue;
                    };
                    for index in 0..self.invocations {
                        let request = self.request(index);
                        // Failures here are per call and never end the stage.
                        let result = match service.invoke(&request) {
                            Ok(response) => StepResult::Ok {
                                response: Some(response),
                            },
                            Err(err) => StepResult::failed(&err),
                        };
                        self.record(Step::Use { index }, &thread, result);
                    }
                }
                Role::Destroy => match self.manager.destroy_current() {
                    Ok(()) => self.record(Step::Destroy, &thread, StepResult::Ok { response: None }),
                    Err(err) => {
                        self.record(Step::Destroy, &thread, StepResult::failed(&err));
                        token.halted = true;
                    }
                },
            }
        }
        token
    }

    fn request(&self, index: usize) -> String {
        match self.placement {
            Placement::Main => format!("Hello {}", index),
            Placement::Worker(_) => format!("Hello from thread {}", index),
        }
    }

    fn record(&self, step: Step, thread: &ThreadIdentity, result: StepResult) {
        let record = StepRecord {
            step,
            placement: self.placement,
            thread: thread.clone(),
            result,
        };
        self.narrator.step(&record);
        self.journal.lock().push(record);
    }
}

/// In-process scenario runner sharing one lifecycle manager across scenarios
pub struct ScenarioRunner {
    manager: Arc<LifecycleManager>,
    dispatcher: Dispatcher,
    narrator: Narrator,
}

impl ScenarioRunner {
    pub fn new(manager: Arc<LifecycleManager>, narrator: Narrator) -> Self {
        Self {
            manager,
            dispatcher: Dispatcher::new("crashme-worker"),
            narrator,
        }
    }

    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn run(&self, scenario: &Scenario) -> Result<ScenarioReport, ScenarioError> {
        let stages = scenario.stages()?;
        info!(scenario = %scenario.name, stages = stages.len(), "Running scenario");
        self.narrator.scenario_started(scenario);

        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut token = StageToken {
            service: None,
            halted: false,
        };
        let mut worker_panic = None;

        for stage in stages {
            if token.halted {
                break;
            }
            let context = StageContext {
                manager: Arc::clone(&self.manager),
                journal: Arc::clone(&journal),
                narrator: self.narrator,
                placement: stage.placement,
                roles: stage.roles,
                invocations: scenario.invocations,
            };

            match self
                .dispatcher
                .run(stage.placement, move || context.execute(token))
            {
                Ok(next) => token = next,
                Err(DispatchError::Spawn { source, .. }) => return Err(ScenarioError::Spawn(source)),
                Err(DispatchError::Panicked { placement, message }) => {
                    warn!(scenario = %scenario.name, %placement, %message, "Stage panicked");
                    worker_panic = Some(message);
                    break;
                }
            }
        }

        let steps = std::mem::take(&mut *journal.lock());
        let report = ScenarioReport::from_steps(scenario, steps, worker_panic);
        info!(
            scenario = %scenario.name,
            as_expected = report.matches_expectation,
            "Scenario finished"
        );
        Ok(report)
    }
}

impl ScenarioExecutor for ScenarioRunner {
    fn execute(&self, scenario: &Scenario) -> Result<ScenarioReport, ScenarioError> {
        self.run(scenario)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::canonical;
    use crashme_enclave::{
        AffinityPolicy, EnclaveRuntime, EnclaveState, ForeignDestroy, ForeignUse, MockEnclave,
        MockEnclaveBuilder,
    };

    fn runner_with(policy: AffinityPolicy) -> (Arc<MockEnclave>, ScenarioRunner) {
        let mock = Arc::new(MockEnclaveBuilder::new("runner").policy(policy).build());
        let runtime: Arc<dyn EnclaveRuntime> = mock.clone();
        let manager = Arc::new(LifecycleManager::new(runtime));
        (mock, ScenarioRunner::new(manager, Narrator::silent()))
    }

    fn scenario(name: &str) -> Scenario {
        canonical(5)
            .into_iter()
            .find(|scenario| scenario.name == name)
            .unwrap()
    }

    #[test]
    fn test_same_thread_succeeds() {
        let (mock, runner) = runner_with(AffinityPolicy::default());
        let report = runner.run(&scenario("same-thread")).unwrap();

        assert!(report.matches_expectation);
        match &report.outcome {
            Outcome::Success { responses } => {
                assert_eq!(responses.len(), 5);
                assert_eq!(responses[0], "0 olleH");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(report.steps.iter().all(|step| step.thread.is_current()));
        assert_eq!(mock.live_instances(), 0);
        assert_eq!(runner.dispatcher().workers_spawned(), 0);
    }

    #[test]
    fn test_foreign_use_rejects_every_call() {
        let (mock, runner) = runner_with(AffinityPolicy::default());
        let report = runner.run(&scenario("foreign-use")).unwrap();

        assert!(report.matches_expectation);
        assert!(matches!(
            report.outcome,
            Outcome::RecoverableFailure { kind: ErrorKind::Invocation, .. }
        ));
        assert_eq!(report.uses().count(), 5);
        assert!(report.uses().all(|record| !record.thread.is_current()));
        assert!(report.fatal_step().is_none());
        assert_eq!(mock.live_instances(), 0);
        assert_eq!(runner.dispatcher().workers_spawned(), 1);
    }

    #[test]
    fn test_foreign_use_allowed_by_runtime() {
        let (_mock, runner) =
            runner_with(AffinityPolicy::default().with_foreign_use(ForeignUse::Allow));
        let report = runner.run(&scenario("foreign-use")).unwrap();

        assert!(report.outcome.is_success());
        assert!(!report.matches_expectation);
        match &report.outcome {
            Outcome::Success { responses } => assert_eq!(responses[0], "0 daerht morf olleH"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_worker_lifecycle_succeeds() {
        let (mock, runner) = runner_with(AffinityPolicy::default());
        let report = runner.run(&scenario("worker-lifecycle")).unwrap();

        assert!(report.outcome.is_success());
        assert!(report.matches_expectation);
        let worker = &report.steps[0].thread;
        assert!(!worker.is_current());
        assert!(report.steps.iter().all(|step| step.thread.same_thread(worker)));
        assert_eq!(mock.live_instances(), 0);
    }

    #[test]
    fn test_foreign_destroy_rejected_is_not_success() {
        let (mock, runner) =
            runner_with(AffinityPolicy::default().with_foreign_destroy(ForeignDestroy::Reject));
        let report = runner.run(&scenario("foreign-destroy")).unwrap();

        assert!(!report.outcome.is_success());
        assert!(report.matches_expectation);
        assert!(matches!(
            report.outcome,
            Outcome::RecoverableFailure { kind: ErrorKind::Destruction, .. }
        ));
        assert_eq!(report.fatal_step().map(|record| record.step), Some(Step::Destroy));
        assert_eq!(mock.live_instances(), 1);
        assert_eq!(
            runner.manager().current().map(|handle| handle.state()),
            Some(EnclaveState::Running)
        );
    }

    #[test]
    fn test_battery_halts_on_destruction_error() {
        let (_mock, runner) =
            runner_with(AffinityPolicy::default().with_foreign_destroy(ForeignDestroy::Reject));
        let mut scenarios = canonical(3);
        scenarios.push(scenario("same-thread"));

        let battery = run_battery(&runner, &scenarios, Narrator::silent()).unwrap();

        assert_eq!(battery.reports.len(), 4);
        assert_eq!(battery.halted_by.as_deref(), Some("foreign-destroy"));
        assert!(battery.all_as_expected());
        assert_eq!(battery.crashes(), 0);
    }

    #[test]
    fn test_creation_failure_halts_scenario() {
        let mock = Arc::new(MockEnclaveBuilder::new("full").max_live_instances(0).build());
        let runtime: Arc<dyn EnclaveRuntime> = mock;
        let runner = ScenarioRunner::new(Arc::new(LifecycleManager::new(runtime)), Narrator::silent());

        let report = runner.run(&scenario("same-thread")).unwrap();

        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.fatal_step().map(|record| record.step), Some(Step::Create));
        assert!(matches!(
            report.outcome,
            Outcome::RecoverableFailure { kind: ErrorKind::Creation, .. }
        ));
    }

    #[test]
    fn test_invalid_scenario_is_rejected() {
        let (_mock, runner) = runner_with(AffinityPolicy::default());
        let split = Scenario::new("split", "worker resumes")
            .roles(Placement::Worker(1), Placement::Main, Placement::Worker(1));

        assert!(matches!(runner.run(&split), Err(ScenarioError::SplitWorker { .. })));
    }

    #[test]
    fn test_report_serializes_for_isolation() {
        let (_mock, runner) = runner_with(AffinityPolicy::default());
        let report = runner.run(&scenario("same-thread")).unwrap();

        let json = serde_json::to_string(&report).unwrap();
        let back: ScenarioReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.outcome, report.outcome);
        assert_eq!(back.steps.len(), report.steps.len());
        assert_eq!(back.steps[1].step, Step::Use { index: 0 });
    }

    #[test]
    fn test_crash_report_satisfies_not_success() {
        let report = ScenarioReport::crashed(&scenario("foreign-destroy"), "killed by signal 6");
        assert!(report.matches_expectation);
        assert!(report.outcome.is_crash());

        let report = ScenarioReport::crashed(&scenario("same-thread"), "killed by signal 6");
        assert!(!report.matches_expectation);
    }
}
