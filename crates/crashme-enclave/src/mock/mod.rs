//! Mock enclave runtime for development and testing.
//!
//! The MockEnclave simulates an enclave runtime in-process. It provides:
//! - Instance allocation with a live-instance limit
//! - Service-loader style lookup of registered capabilities
//! - Thread-affinity enforcement following an [`AffinityPolicy`]
//!
//! With the default policy it behaves like the runtimes this probe targets:
//! calls from a non-owner thread are rejected, and destroying an instance
//! from a non-owner thread aborts the whole process.

use crate::{
    capability::{Capability, ReverseEcho},
    error::{EnclaveError, EnclaveResult},
    handle::EnclaveState,
    thread::ThreadIdentity,
    traits::{EnclaveConfig, EnclaveInfo, EnclavePlatform, EnclaveRuntime, InstanceId},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Reaction to an invocation from a thread other than the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignUse {
    /// Fail the call with an invocation error
    Reject,
    /// Serve the call as if it came from the owner
    Allow,
}

/// Reaction to a destroy from a thread other than the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignDestroy {
    /// Abort the process
    Abort,
    /// Fail with a destruction error and leave the instance running
    Reject,
    /// Destroy the instance
    Allow,
}

#[derive(Debug, Error)]
#[error("unknown {kind} policy '{value}' (expected one of: {expected})")]
pub struct PolicyParseError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl FromStr for ForeignUse {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(ForeignUse::Reject),
            "allow" => Ok(ForeignUse::Allow),
            _ => Err(PolicyParseError {
                kind: "foreign-use",
                value: s.to_string(),
                expected: "reject, allow",
            }),
        }
    }
}

impl FromStr for ForeignDestroy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(ForeignDestroy::Abort),
            "reject" => Ok(ForeignDestroy::Reject),
            "allow" => Ok(ForeignDestroy::Allow),
            _ => Err(PolicyParseError {
                kind: "foreign-destroy",
                value: s.to_string(),
                expected: "abort, reject, allow",
            }),
        }
    }
}

impl std::fmt::Display for ForeignUse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForeignUse::Reject => write!(f, "reject"),
            ForeignUse::Allow => write!(f, "allow"),
        }
    }
}

impl std::fmt::Display for ForeignDestroy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForeignDestroy::Abort => write!(f, "abort"),
            ForeignDestroy::Reject => write!(f, "reject"),
            ForeignDestroy::Allow => write!(f, "allow"),
        }
    }
}

/// Thread-affinity behavior of the simulated runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityPolicy {
    pub foreign_use: ForeignUse,
    pub foreign_destroy: ForeignDestroy,
}

impl Default for AffinityPolicy {
    fn default() -> Self {
        Self {
            foreign_use: ForeignUse::Reject,
            foreign_destroy: ForeignDestroy::Abort,
        }
    }
}

impl AffinityPolicy {
    /// No affinity checks at all
    pub fn permissive() -> Self {
        Self {
            foreign_use: ForeignUse::Allow,
            foreign_destroy: ForeignDestroy::Allow,
        }
    }

    pub fn with_foreign_use(mut self, foreign_use: ForeignUse) -> Self {
        self.foreign_use = foreign_use;
        self
    }

    pub fn with_foreign_destroy(mut self, foreign_destroy: ForeignDestroy) -> Self {
        self.foreign_destroy = foreign_destroy;
        self
    }
}

struct InstanceRecord {
    owner: ThreadIdentity,
    state: EnclaveState,
}

/// Simulated enclave runtime
pub struct MockEnclave {
    config: EnclaveConfig,
    policy: AffinityPolicy,
    /// Registered implementations, keyed by contract
    services: HashMap<&'static str, Vec<Arc<dyn Capability>>>,
    instances: Mutex<HashMap<InstanceId, InstanceRecord>>,
    invocation_count: AtomicU64,
}

impl MockEnclave {
    /// Create a mock runtime hosting the echo probe
    pub fn new(config: EnclaveConfig, policy: AffinityPolicy) -> Self {
        let mut services: HashMap<&'static str, Vec<Arc<dyn Capability>>> = HashMap::new();
        services
            .entry(ReverseEcho::CONTRACT)
            .or_default()
            .push(Arc::new(ReverseEcho));
        Self::with_services(config, policy, services)
    }

    fn with_services(
        config: EnclaveConfig,
        policy: AffinityPolicy,
        services: HashMap<&'static str, Vec<Arc<dyn Capability>>>,
    ) -> Self {
        Self {
            config,
            policy,
            services,
            instances: Mutex::new(HashMap::new()),
            invocation_count: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> AffinityPolicy {
        self.policy
    }

    /// Instances created and not yet destroyed, leaked ones included
    pub fn live_instances(&self) -> usize {
        self.instances
            .lock()
            .values()
            .filter(|record| record.state == EnclaveState::Running)
            .count()
    }

    /// Invocations served so far
    pub fn invocation_count(&self) -> u64 {
        self.invocation_count.load(Ordering::Relaxed)
    }

    fn abort_process(&self, instance: &InstanceId, owner: &ThreadIdentity, caller: &ThreadIdentity) -> ! {
        error!(
            instance = %instance,
            owner = %owner,
            thread = %caller,
            "Enclave destroyed from a non-owner thread; aborting process"
        );
        std::process::abort()
    }
}

impl EnclaveRuntime for MockEnclave {
    fn create(&self) -> EnclaveResult<InstanceId> {
        let owner = ThreadIdentity::current();
        let mut instances = self.instances.lock();

        let live = instances
            .values()
            .filter(|record| record.state == EnclaveState::Running)
            .count();
        if live >= self.config.max_live_instances {
            return Err(EnclaveError::Creation(format!(
                "runtime has no free instance slots ({} of {} in use)",
                live, self.config.max_live_instances
            )));
        }

        let instance = InstanceId(format!("{}-{}", self.config.name, uuid::Uuid::new_v4()));
        debug!(instance = %instance, owner = %owner, "Allocated mock instance");
        instances.insert(
            instance.clone(),
            InstanceRecord {
                owner,
                state: EnclaveState::Running,
            },
        );
        Ok(instance)
    }

    fn load(&self, instance: &InstanceId, contract: &str) -> EnclaveResult<Vec<Arc<dyn Capability>>> {
        let instances = self.instances.lock();
        match instances.get(instance) {
            Some(record) if record.state == EnclaveState::Running => {}
            Some(record) => {
                return Err(EnclaveError::Loading(format!(
                    "instance {} is {}",
                    instance, record.state
                )))
            }
            None => return Err(EnclaveError::Loading(format!("unknown instance {}", instance))),
        }

        Ok(self.services.get(contract).cloned().unwrap_or_default())
    }

    fn invoke(
        &self,
        instance: &InstanceId,
        capability: &dyn Capability,
        request: &str,
    ) -> EnclaveResult<String> {
        let caller = ThreadIdentity::current();
        {
            let instances = self.instances.lock();
            let record = instances.get(instance).ok_or_else(|| {
                EnclaveError::Invocation(format!("unknown instance {}", instance))
            })?;

            if record.state != EnclaveState::Running {
                return Err(EnclaveError::Invocation(format!(
                    "instance {} is {}",
                    instance, record.state
                )));
            }

            if !record.owner.same_thread(&caller) {
                match self.policy.foreign_use {
                    ForeignUse::Reject => {
                        warn!(instance = %instance, owner = %record.owner, thread = %caller, "Rejected call from non-owner thread");
                        return Err(EnclaveError::Invocation(format!(
                            "thread {} does not own instance {} (owner: {})",
                            caller, instance, record.owner
                        )));
                    }
                    ForeignUse::Allow => {
                        debug!(instance = %instance, thread = %caller, "Serving call from non-owner thread");
                    }
                }
            }
        }

        let response = capability.invoke(request);
        self.invocation_count.fetch_add(1, Ordering::Relaxed);
        if self.config.enable_debug_logging {
            debug!(instance = %instance, request, response = %response, "Invocation served");
        }
        Ok(response)
    }

    fn destroy(&self, instance: &InstanceId) -> EnclaveResult<()> {
        let caller = ThreadIdentity::current();
        let mut instances = self.instances.lock();
        let record = instances.get_mut(instance).ok_or_else(|| EnclaveError::Destruction {
            state: EnclaveState::Uninitialized,
            reason: format!("unknown instance {}", instance),
        })?;

        if record.state != EnclaveState::Running {
            return Err(EnclaveError::Destruction {
                state: record.state,
                reason: format!("instance {} already destroyed", instance),
            });
        }

        if !record.owner.same_thread(&caller) {
            match self.policy.foreign_destroy {
                ForeignDestroy::Abort => self.abort_process(instance, &record.owner, &caller),
                ForeignDestroy::Reject => {
                    warn!(instance = %instance, owner = %record.owner, thread = %caller, "Rejected destroy from non-owner thread");
                    return Err(EnclaveError::Destruction {
                        state: record.state,
                        reason: format!(
                            "thread {} does not own instance {} (owner: {})",
                            caller, instance, record.owner
                        ),
                    });
                }
                ForeignDestroy::Allow => {}
            }
        }

        record.state = EnclaveState::Destroyed;
        info!(instance = %instance, thread = %caller, "Mock instance released");
        Ok(())
    }

    fn info(&self) -> EnclaveInfo {
        EnclaveInfo {
            name: self.config.name.clone(),
            platform: EnclavePlatform::Mock,
            version: env!("CARGO_PKG_VERSION").to_string(),
            is_simulated: true,
        }
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// Builder for MockEnclave
pub struct MockEnclaveBuilder {
    name: String,
    max_live_instances: usize,
    debug_logging: bool,
    policy: AffinityPolicy,
    services: HashMap<&'static str, Vec<Arc<dyn Capability>>>,
}

impl MockEnclaveBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let mut services: HashMap<&'static str, Vec<Arc<dyn Capability>>> = HashMap::new();
        services
            .entry(ReverseEcho::CONTRACT)
            .or_default()
            .push(Arc::new(ReverseEcho));

        Self {
            name: name.into(),
            max_live_instances: EnclaveConfig::default().max_live_instances,
            debug_logging: false,
            policy: AffinityPolicy::default(),
            services,
        }
    }

    pub fn max_live_instances(mut self, max: usize) -> Self {
        self.max_live_instances = max;
        self
    }

    pub fn debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    pub fn policy(mut self, policy: AffinityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register an additional capability under its contract
    pub fn with_service(mut self, capability: Arc<dyn Capability>) -> Self {
        self.services
            .entry(capability.contract())
            .or_default()
            .push(capability);
        self
    }

    /// Drop every registered capability, the echo probe included
    pub fn without_services(mut self) -> Self {
        self.services.clear();
        self
    }

    pub fn build(self) -> MockEnclave {
        let config = EnclaveConfig {
            name: self.name,
            max_live_instances: self.max_live_instances,
            enable_debug_logging: self.debug_logging,
        };
        MockEnclave::with_services(config, self.policy, self.services)
    }
}
