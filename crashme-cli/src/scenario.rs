//! Scenario definitions.
//!
//! A scenario assigns the create, use and destroy roles to threads. Roles
//! always execute in that order; consecutive roles with the same placement
//! form one stage, and each stage runs to completion (joined) before the next
//! one starts, so at most one worker thread is alive at a time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a role executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// The thread driving the scenario
    Main,
    /// A spawned worker; equal ids share one thread
    Worker(u8),
}

impl std::fmt::Display for Placement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Placement::Main => write!(f, "main"),
            Placement::Worker(id) => write!(f, "worker-{}", id),
        }
    }
}

/// Lifecycle role within a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Create the enclave and load the probe service
    Create,
    /// Invoke the probe service
    Use,
    /// Destroy the enclave
    Destroy,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Create => write!(f, "create"),
            Role::Use => write!(f, "use"),
            Role::Destroy => write!(f, "destroy"),
        }
    }
}

/// What a scenario is expected to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// Every step succeeds
    Success,
    /// Every use call is rejected; create and destroy succeed
    InvocationRejected,
    /// Anything but success: an error or a crash
    NotSuccess,
}

impl std::fmt::Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expectation::Success => write!(f, "success"),
            Expectation::InvocationRejected => write!(f, "invocations rejected"),
            Expectation::NotSuccess => write!(f, "not success"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Scenario {scenario}: {placement} is assigned non-adjacent roles")]
    SplitWorker { scenario: String, placement: Placement },

    #[error("Scenario {0} performs no invocations")]
    NoInvocations(String),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Isolated run failed: {0}")]
    Isolation(String),
}

/// A contiguous run of roles executed on one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub placement: Placement,
    pub roles: Vec<Role>,
}

/// A fixed assignment of lifecycle roles to threads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub creator: Placement,
    pub user: Placement,
    pub destroyer: Placement,
    pub invocations: usize,
    pub expectation: Expectation,
}

impl Scenario {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            creator: Placement::Main,
            user: Placement::Main,
            destroyer: Placement::Main,
            invocations: 5,
            expectation: Expectation::Success,
        }
    }

    pub fn roles(mut self, creator: Placement, user: Placement, destroyer: Placement) -> Self {
        self.creator = creator;
        self.user = user;
        self.destroyer = destroyer;
        self
    }

    pub fn invocations(mut self, invocations: usize) -> Self {
        self.invocations = invocations;
        self
    }

    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.expectation = expectation;
        self
    }

    /// Placement of a role
    pub fn placement(&self, role: Role) -> Placement {
        match role {
            Role::Create => self.creator,
            Role::Use => self.user,
            Role::Destroy => self.destroyer,
        }
    }

    /// Split the roles into stages, rejecting a worker whose roles are not
    /// adjacent (a joined worker cannot be resumed).
    pub fn stages(&self) -> Result<Vec<Stage>, ScenarioError> {
        if self.invocations == 0 {
            return Err(ScenarioError::NoInvocations(self.name.clone()));
        }

        let mut stages: Vec<Stage> = Vec::new();
        for role in [Role::Create, Role::Use, Role::Destroy] {
            let placement = self.placement(role);
            match stages.last_mut() {
                Some(stage) if stage.placement == placement => stage.roles.push(role),
                _ => {
                    if let Placement::Worker(_) = placement {
                        if stages.iter().any(|stage| stage.placement == placement) {
                            return Err(ScenarioError::SplitWorker {
                                scenario: self.name.clone(),
                                placement,
                            });
                        }
                    }
                    stages.push(Stage {
                        placement,
                        roles: vec![role],
                    });
                }
            }
        }
        Ok(stages)
    }
}

/// The four canonical scenarios, in execution order
pub fn canonical(invocations: usize) -> Vec<Scenario> {
    let worker = Placement::Worker(1);
    vec![
        Scenario::new(
            "same-thread",
            "Create, use and destroy the enclave on the main thread",
        )
        .roles(Placement::Main, Placement::Main, Placement::Main)
        .invocations(invocations)
        .expect(Expectation::Success),
        Scenario::new(
            "foreign-use",
            "Create enclave on the main thread, use it from another thread, destroy on the main thread",
        )
        .roles(Placement::Main, worker, Placement::Main)
        .invocations(invocations)
        .expect(Expectation::InvocationRejected),
        Scenario::new(
            "worker-lifecycle",
            "Create, use and destroy the enclave on one spawned thread",
        )
        .roles(worker, worker, worker)
        .invocations(invocations)
        .expect(Expectation::Success),
        Scenario::new(
            "foreign-destroy",
            "Create and use the enclave on a spawned thread, destroy it on the main thread",
        )
        .roles(worker, worker, Placement::Main)
        .invocations(invocations)
        .expect(Expectation::NotSuccess),
    ]
}

/// Select canonical scenarios by name, keeping the requested order.
/// An empty selection means the whole battery.
pub fn select(invocations: usize, names: &[String]) -> Result<Vec<Scenario>, ScenarioError> {
    let battery = canonical(invocations);
    if names.is_empty() {
        return Ok(battery);
    }

    names
        .iter()
        .map(|name| {
            battery
                .iter()
                .find(|scenario| &scenario.name == name)
                .cloned()
                .ok_or_else(|| ScenarioError::UnknownScenario(name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_battery_order() {
        let names: Vec<_> = canonical(5).into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec!["same-thread", "foreign-use", "worker-lifecycle", "foreign-destroy"]
        );
    }

    #[test]
    fn test_stages_same_thread() {
        let stages = canonical(5)[0].stages().unwrap();
        assert_eq!(
            stages,
            vec![Stage {
                placement: Placement::Main,
                roles: vec![Role::Create, Role::Use, Role::Destroy],
            }]
        );
    }

    #[test]
    fn test_stages_foreign_use() {
        let stages = canonical(5)[1].stages().unwrap();
        let placements: Vec<_> = stages.iter().map(|s| s.placement).collect();
        assert_eq!(
            placements,
            vec![Placement::Main, Placement::Worker(1), Placement::Main]
        );
        assert_eq!(stages[1].roles, vec![Role::Use]);
    }

    #[test]
    fn test_stages_foreign_destroy() {
        let stages = canonical(5)[3].stages().unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].placement, Placement::Worker(1));
        assert_eq!(stages[0].roles, vec![Role::Create, Role::Use]);
        assert_eq!(stages[1].roles, vec![Role::Destroy]);
    }

    #[test]
    fn test_split_worker_rejected() {
        let scenario = Scenario::new("split", "worker resumes after main")
            .roles(Placement::Worker(1), Placement::Main, Placement::Worker(1));
        assert!(matches!(
            scenario.stages(),
            Err(ScenarioError::SplitWorker { placement: Placement::Worker(1), .. })
        ));
    }

    #[test]
    fn test_distinct_workers_allowed() {
        let scenario = Scenario::new("relay", "each role on its own worker").roles(
            Placement::Worker(1),
            Placement::Worker(2),
            Placement::Worker(3),
        );
        assert_eq!(scenario.stages().unwrap().len(), 3);
    }

    #[test]
    fn test_zero_invocations_rejected() {
        let scenario = Scenario::new("idle", "nothing to do").invocations(0);
        assert!(matches!(scenario.stages(), Err(ScenarioError::NoInvocations(_))));
    }

    #[test]
    fn test_select_by_name() {
        let picked = select(2, &["foreign-destroy".to_string(), "same-thread".to_string()]).unwrap();
        assert_eq!(picked[0].name, "foreign-destroy");
        assert_eq!(picked[1].name, "same-thread");
        assert_eq!(picked[0].invocations, 2);

        assert_eq!(select(2, &[]).unwrap().len(), 4);
        assert!(matches!(
            select(2, &["bogus".to_string()]),
            Err(ScenarioError::UnknownScenario(_))
        ));
    }
}
