//! Enclave handle lifecycle state machine.
//!
//! ```text
//!   Uninitialized ──start()──▶ Running ──destroy()──▶ Destroyed
//! ```
//!
//! Transitions are one-way. The owner thread is recorded at the
//! `Uninitialized → Running` transition and never changes afterwards. This
//! layer does not check affinity on use or destroy: that is left to the
//! runtime, whose reaction is what the probe observes.

use crate::capability::Capability;
use crate::error::{EnclaveError, EnclaveResult};
use crate::thread::ThreadIdentity;
use crate::traits::{EnclaveRuntime, InstanceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle state of an enclave handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnclaveState {
    Uninitialized,
    Running,
    Destroyed,
}

impl std::fmt::Display for EnclaveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnclaveState::Uninitialized => write!(f, "uninitialized"),
            EnclaveState::Running => write!(f, "running"),
            EnclaveState::Destroyed => write!(f, "destroyed"),
        }
    }
}

struct HandleInner {
    state: EnclaveState,
    instance_id: Option<InstanceId>,
    owner: Option<ThreadIdentity>,
}

/// Host-side handle to a single enclave instance
pub struct EnclaveHandle {
    runtime: Arc<dyn EnclaveRuntime>,
    // Guards memory only; callers are expected to follow the single-writer
    // protocol themselves.
    inner: Mutex<HandleInner>,
}

impl EnclaveHandle {
    /// Create an uninitialized handle bound to a runtime
    pub fn new(runtime: Arc<dyn EnclaveRuntime>) -> Self {
        Self {
            runtime,
            inner: Mutex::new(HandleInner {
                state: EnclaveState::Uninitialized,
                instance_id: None,
                owner: None,
            }),
        }
    }

    /// Create and start an enclave on the calling thread
    pub fn create(runtime: Arc<dyn EnclaveRuntime>) -> EnclaveResult<Arc<Self>> {
        let handle = Arc::new(Self::new(runtime));
        handle.start()?;
        Ok(handle)
    }

    /// Allocate the runtime instance and record the calling thread as owner
    pub fn start(&self) -> EnclaveResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != EnclaveState::Uninitialized {
            return Err(EnclaveError::Creation(format!(
                "handle already started (state: {})",
                inner.state
            )));
        }

        let owner = ThreadIdentity::current();
        info!(thread = %owner, "Starting enclave");

        let instance_id = self.runtime.create()?;
        inner.instance_id = Some(instance_id.clone());
        inner.owner = Some(owner.clone());
        inner.state = EnclaveState::Running;

        info!(instance = %instance_id, owner = %owner, "Enclave running");
        Ok(())
    }

    pub fn state(&self) -> EnclaveState {
        self.inner.lock().state
    }

    /// Thread that started this enclave, once running
    pub fn owner(&self) -> Option<ThreadIdentity> {
        self.inner.lock().owner.clone()
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        self.inner.lock().instance_id.clone()
    }

    /// Load every implementation of `contract` from the running instance
    pub fn load(&self, contract: &str) -> EnclaveResult<Vec<Arc<dyn Capability>>> {
        let instance_id = {
            let inner = self.inner.lock();
            match (inner.state, &inner.instance_id) {
                (EnclaveState::Running, Some(id)) => id.clone(),
                (state, _) => {
                    return Err(EnclaveError::Loading(format!(
                        "enclave is {}, expected running",
                        state
                    )))
                }
            }
        };

        debug!(instance = %instance_id, contract, thread = %ThreadIdentity::current(), "Loading services");
        self.runtime.load(&instance_id, contract)
    }

    /// Forward an invocation to the runtime.
    ///
    /// The handle's own state is not consulted beyond having an instance:
    /// calls against a destroyed instance reach the runtime unchanged.
    pub fn invoke(&self, capability: &dyn Capability, request: &str) -> EnclaveResult<String> {
        let instance_id = self.inner.lock().instance_id.clone().ok_or_else(|| {
            EnclaveError::Invocation("enclave was never started".to_string())
        })?;
        self.runtime.invoke(&instance_id, capability, request)
    }

    /// Destroy the instance from the calling thread.
    ///
    /// Fails with [`EnclaveError::Destruction`] unless the handle is running.
    /// From a thread other than the owner the runtime may abort the process.
    pub fn destroy(&self) -> EnclaveResult<()> {
        let mut inner = self.inner.lock();
        let instance_id = match (inner.state, &inner.instance_id) {
            (EnclaveState::Running, Some(id)) => id.clone(),
            (EnclaveState::Uninitialized, _) | (EnclaveState::Running, None) => {
                return Err(EnclaveError::Destruction {
                    state: inner.state,
                    reason: "enclave was never created".to_string(),
                })
            }
            (EnclaveState::Destroyed, _) => {
                return Err(EnclaveError::Destruction {
                    state: inner.state,
                    reason: "enclave already destroyed".to_string(),
                })
            }
        };

        let caller = ThreadIdentity::current();
        let foreign = inner
            .owner
            .as_ref()
            .map(|owner| !owner.same_thread(&caller))
            .unwrap_or(false);
        if foreign {
            warn!(instance = %instance_id, thread = %caller, "Destroying enclave from a non-owner thread");
        } else {
            info!(instance = %instance_id, thread = %caller, "Destroying enclave");
        }

        self.runtime.destroy(&instance_id)?;
        inner.state = EnclaveState::Destroyed;

        info!(instance = %instance_id, "Enclave destroyed");
        Ok(())
    }
}

impl std::fmt::Debug for EnclaveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EnclaveHandle")
            .field("state", &inner.state)
            .field("instance_id", &inner.instance_id)
            .field("owner", &inner.owner)
            .finish()
    }
}
