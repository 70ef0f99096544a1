//! Boundary to the enclave runtime.
//!
//! The runtime is an external collaborator and is treated as untrusted with
//! respect to thread affinity: any call may return an error, or may abort the
//! process without returning at all.

use crate::capability::Capability;
use crate::error::EnclaveResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque handle to a runtime-level enclave instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runtime platform backing an enclave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnclavePlatform {
    /// In-process simulation
    Mock,
}

impl std::fmt::Display for EnclavePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnclavePlatform::Mock => write!(f, "mock"),
        }
    }
}

/// Runtime configuration shared by all backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnclaveConfig {
    /// Prefix for instance identifiers
    pub name: String,
    /// Upper bound on simultaneously live instances, leaked ones included
    pub max_live_instances: usize,
    /// Emit per-call debug events
    pub enable_debug_logging: bool,
}

impl Default for EnclaveConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            max_live_instances: 8,
            enable_debug_logging: false,
        }
    }
}

impl EnclaveConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_live_instances(mut self, max: usize) -> Self {
        self.max_live_instances = max;
        self
    }
}

/// Static information about a runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnclaveInfo {
    pub name: String,
    pub platform: EnclavePlatform,
    pub version: String,
    pub is_simulated: bool,
}

/// Enclave runtime interface.
///
/// Implementations inspect the calling thread themselves; callers cannot
/// vouch for their own identity.
pub trait EnclaveRuntime: Send + Sync {
    /// Allocate a new enclave instance owned by the calling thread
    fn create(&self) -> EnclaveResult<InstanceId>;

    /// Every implementation of `contract` hosted by `instance` (may be empty)
    fn load(&self, instance: &InstanceId, contract: &str) -> EnclaveResult<Vec<Arc<dyn Capability>>>;

    /// Route one request to a loaded capability
    fn invoke(
        &self,
        instance: &InstanceId,
        capability: &dyn Capability,
        request: &str,
    ) -> EnclaveResult<String>;

    /// Release the instance. May abort the process instead of returning.
    fn destroy(&self, instance: &InstanceId) -> EnclaveResult<()>;

    fn info(&self) -> EnclaveInfo;

    fn is_simulated(&self) -> bool {
        self.info().is_simulated
    }
}
