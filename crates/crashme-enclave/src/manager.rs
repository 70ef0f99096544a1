//! Lifecycle manager: the single enclave slot.
//!
//! The manager holds at most one current [`EnclaveHandle`]. It does not
//! serialize lifecycle calls across threads: exactly one writer at a time is
//! a protocol the caller follows, not something enforced here. Calling
//! [`LifecycleManager::create_and_load`] while an enclave is still running
//! overwrites the slot and leaks the previous runtime instance.

use crate::capability::ReverseEcho;
use crate::error::{EnclaveError, EnclaveResult};
use crate::handle::{EnclaveHandle, EnclaveState};
use crate::service::ServiceHandle;
use crate::thread::ThreadIdentity;
use crate::traits::EnclaveRuntime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle operation performed through the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOp {
    Create,
    Load,
    Destroy,
}

/// Which thread performed a lifecycle operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub op: LifecycleOp,
    pub thread: ThreadIdentity,
}

pub struct LifecycleManager {
    runtime: Arc<dyn EnclaveRuntime>,
    slot: Mutex<Option<Arc<EnclaveHandle>>>,
    history: Mutex<Vec<LifecycleRecord>>,
}

impl LifecycleManager {
    pub fn new(runtime: Arc<dyn EnclaveRuntime>) -> Self {
        Self {
            runtime,
            slot: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn EnclaveRuntime> {
        &self.runtime
    }

    /// Enclave currently occupying the slot, in whatever state it is
    pub fn current(&self) -> Option<Arc<EnclaveHandle>> {
        self.slot.lock().clone()
    }

    /// Lifecycle operations performed so far, oldest first
    pub fn history(&self) -> Vec<LifecycleRecord> {
        self.history.lock().clone()
    }

    /// Create an enclave on the calling thread and load the echo probe from it
    pub fn create_and_load(&self) -> EnclaveResult<ServiceHandle> {
        self.create_and_load_contract(ReverseEcho::CONTRACT)
    }

    /// Create an enclave on the calling thread and load the first
    /// implementation of `contract`
    pub fn create_and_load_contract(&self, contract: &str) -> EnclaveResult<ServiceHandle> {
        let thread = ThreadIdentity::current();
        self.record(LifecycleOp::Create, &thread);

        let handle = EnclaveHandle::create(Arc::clone(&self.runtime))?;
        {
            let mut slot = self.slot.lock();
            if let Some(previous) = slot.as_ref() {
                if previous.state() == EnclaveState::Running {
                    warn!(
                        instance = ?previous.instance_id(),
                        "Replacing a running enclave without destroying it; its runtime instance leaks"
                    );
                }
            }
            *slot = Some(Arc::clone(&handle));
        }

        info!(contract, thread = %thread, "Loading service");
        self.record(LifecycleOp::Load, &thread);

        let capability = handle
            .load(contract)?
            .into_iter()
            .next()
            .ok_or_else(|| EnclaveError::ServiceNotFound {
                contract: contract.to_string(),
            })?;

        info!(contract, thread = %thread, "Service loaded");
        Ok(ServiceHandle::new(&handle, capability))
    }

    /// Destroy whatever enclave occupies the slot, from the calling thread.
    ///
    /// The destroyed handle stays in the slot, so a second call fails with
    /// [`EnclaveError::Destruction`].
    pub fn destroy_current(&self) -> EnclaveResult<()> {
        let thread = ThreadIdentity::current();
        self.record(LifecycleOp::Destroy, &thread);

        let handle = self.current().ok_or_else(|| EnclaveError::Destruction {
            state: EnclaveState::Uninitialized,
            reason: "no enclave has been created".to_string(),
        })?;
        handle.destroy()
    }

    fn record(&self, op: LifecycleOp, thread: &ThreadIdentity) {
        self.history.lock().push(LifecycleRecord {
            op,
            thread: thread.clone(),
        });
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("runtime", &self.runtime.info())
            .field("current", &self.current())
            .finish()
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::{MockEnclave, MockEnclaveBuilder};

    fn manager_with(mock: MockEnclave) -> (Arc<MockEnclave>, LifecycleManager) {
        let mock = Arc::new(mock);
        let runtime: Arc<dyn EnclaveRuntime> = mock.clone();
        (mock, LifecycleManager::new(runtime))
    }

    #[test]
    fn test_create_use_destroy_same_thread() {
        let (mock, manager) = manager_with(MockEnclaveBuilder::new("mgr").build());

        let service = manager.create_and_load().unwrap();
        assert_eq!(service.invoke("Hello 0").unwrap(), "0 olleH");
        assert_eq!(mock.live_instances(), 1);

        manager.destroy_current().unwrap();
        assert_eq!(mock.live_instances(), 0);
        assert_eq!(
            manager.current().map(|h| h.state()),
            Some(EnclaveState::Destroyed)
        );

        let ops: Vec<_> = manager.history().iter().map(|r| r.op).collect();
        assert_eq!(ops, vec![LifecycleOp::Create, LifecycleOp::Load, LifecycleOp::Destroy]);
        assert!(manager.history().iter().all(|r| r.thread.is_current()));
    }

    #[test]
    fn test_destroy_current_twice_fails() {
        let (_mock, manager) = manager_with(MockEnclaveBuilder::new("mgr").build());
        manager.create_and_load().unwrap();

        manager.destroy_current().unwrap();
        assert!(matches!(
            manager.destroy_current(),
            Err(EnclaveError::Destruction { .. })
        ));
    }

    #[test]
    fn test_destroy_with_empty_slot_fails() {
        let (_mock, manager) = manager_with(MockEnclaveBuilder::new("mgr").build());
        assert!(matches!(
            manager.destroy_current(),
            Err(EnclaveError::Destruction { state: EnclaveState::Uninitialized, .. })
        ));
    }

    #[test]
    fn test_overwrite_leaks_previous_instance() {
        let (mock, manager) = manager_with(MockEnclaveBuilder::new("mgr").build());

        manager.create_and_load().unwrap();
        let first = manager.current().unwrap();
        manager.create_and_load().unwrap();

        assert_eq!(mock.live_instances(), 2);
        assert_eq!(first.state(), EnclaveState::Running);

        manager.destroy_current().unwrap();
        assert_eq!(mock.live_instances(), 1);
    }

    #[test]
    fn test_leak_exhausts_runtime() {
        let (_mock, manager) =
            manager_with(MockEnclaveBuilder::new("mgr").max_live_instances(1).build());

        manager.create_and_load().unwrap();
        assert!(matches!(
            manager.create_and_load(),
            Err(EnclaveError::Creation(_))
        ));
    }

    #[test]
    fn test_unknown_contract() {
        let (_mock, manager) = manager_with(MockEnclaveBuilder::new("mgr").build());
        let err = manager.create_and_load_contract("crashme.unknown").unwrap_err();
        assert!(matches!(err, EnclaveError::ServiceNotFound { .. }));
    }

    #[test]
    fn test_without_services() {
        let (_mock, manager) =
            manager_with(MockEnclaveBuilder::new("mgr").without_services().build());
        assert!(matches!(
            manager.create_and_load(),
            Err(EnclaveError::ServiceNotFound { .. })
        ));
    }
}
