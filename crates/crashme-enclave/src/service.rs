//! Service handles obtained from a running enclave.

use crate::capability::Capability;
use crate::error::{EnclaveError, EnclaveResult};
use crate::handle::{EnclaveHandle, EnclaveState};
use crate::thread::ThreadIdentity;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Reference to a capability loaded from an enclave.
///
/// Holds only a weak back-reference to its [`EnclaveHandle`]; it stays
/// callable after the enclave is destroyed, and what happens then is up to
/// the runtime.
#[derive(Clone)]
pub struct ServiceHandle {
    enclave: Weak<EnclaveHandle>,
    capability: Arc<dyn Capability>,
    loaded_by: ThreadIdentity,
}

impl ServiceHandle {
    pub fn new(enclave: &Arc<EnclaveHandle>, capability: Arc<dyn Capability>) -> Self {
        Self {
            enclave: Arc::downgrade(enclave),
            capability,
            loaded_by: ThreadIdentity::current(),
        }
    }

    /// Contract implemented by the underlying capability
    pub fn contract(&self) -> &'static str {
        self.capability.contract()
    }

    /// Thread that loaded this service
    pub fn loaded_by(&self) -> &ThreadIdentity {
        &self.loaded_by
    }

    /// State of the backing enclave, or `None` once the handle was dropped
    pub fn enclave_state(&self) -> Option<EnclaveState> {
        self.enclave.upgrade().map(|handle| handle.state())
    }

    /// Invoke the capability from the calling thread
    pub fn invoke(&self, request: &str) -> EnclaveResult<String> {
        let enclave = self.enclave.upgrade().ok_or_else(|| {
            EnclaveError::Invocation("backing enclave handle was released".to_string())
        })?;

        debug!(
            contract = self.contract(),
            thread = %ThreadIdentity::current(),
            "Invoking service"
        );
        enclave.invoke(self.capability.as_ref(), request)
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("contract", &self.contract())
            .field("loaded_by", &self.loaded_by)
            .field("enclave_state", &self.enclave_state())
            .finish()
    }
}
