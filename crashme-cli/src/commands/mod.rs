//! Command handlers

pub mod child;
pub mod list;
pub mod run;

use crashme_cli::ProbeConfig;
use crashme_enclave::{EnclaveRuntime, LifecycleManager, MockEnclave};
use std::sync::Arc;

/// Lifecycle manager over the configured runtime, shared by every scenario
/// of one process
pub fn lifecycle_manager(config: &ProbeConfig) -> Arc<LifecycleManager> {
    let runtime: Arc<dyn EnclaveRuntime> =
        Arc::new(MockEnclave::new(config.enclave_config(), config.policy));
    Arc::new(LifecycleManager::new(runtime))
}
