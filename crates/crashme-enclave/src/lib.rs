//! # CrashMe Enclave
//!
//! Host-side lifecycle model of an enclave whose runtime imposes thread
//! affinity: an instance created on one thread may only be used or destroyed
//! from that thread, and violating the rule may abort the process instead of
//! returning an error.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          CrashMe Enclave                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  LifecycleManager (single slot)                                         │
//! │    • create_and_load()  → EnclaveHandle::create() + load(contract)      │
//! │    • destroy_current()  → EnclaveHandle::destroy() from caller thread   │
//! │                │                                                        │
//! │                ▼                                                        │
//! │  EnclaveHandle  Uninitialized → Running → Destroyed (owner recorded)    │
//! │                │                         ▲                              │
//! │                ▼                         │ weak                         │
//! │  ┌─────────────────────────────┐   ServiceHandle ── invoke(request)     │
//! │  │   EnclaveRuntime Trait      │                                        │
//! │  │  • create / load            │                                        │
//! │  │  • invoke / destroy         │                                        │
//! │  └──────────────┬──────────────┘                                        │
//! │                 ▼                                                       │
//! │  ┌─────────────────────────────┐                                        │
//! │  │  MockEnclave (feature mock) │                                        │
//! │  │  • AffinityPolicy           │                                        │
//! │  │  • reject / abort / allow   │                                        │
//! │  └─────────────────────────────┘                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use crashme_enclave::{create_default_enclave, LifecycleManager};
//! use std::sync::Arc;
//!
//! let manager = LifecycleManager::new(Arc::new(create_default_enclave("probe")));
//! let service = manager.create_and_load()?;
//! assert_eq!(service.invoke("Hello 0")?, "0 olleH");
//! manager.destroy_current()?;
//! ```

pub mod capability;
pub mod error;
pub mod handle;
pub mod manager;
pub mod service;
pub mod thread;
pub mod traits;

#[cfg(feature = "mock")]
pub mod mock;

// Re-export main types
pub use capability::{Capability, ReverseEcho};
pub use error::{EnclaveError, EnclaveResult, ErrorKind};
pub use handle::{EnclaveHandle, EnclaveState};
pub use manager::{LifecycleManager, LifecycleOp, LifecycleRecord};
pub use service::ServiceHandle;
pub use thread::ThreadIdentity;
pub use traits::{EnclaveConfig, EnclaveInfo, EnclavePlatform, EnclaveRuntime, InstanceId};

#[cfg(feature = "mock")]
pub use mock::{AffinityPolicy, ForeignDestroy, ForeignUse, MockEnclave, MockEnclaveBuilder};

/// Create the default enclave runtime based on enabled features
#[cfg(feature = "mock")]
pub fn create_default_enclave(name: &str) -> MockEnclave {
    MockEnclave::new(EnclaveConfig::default().with_name(name), AffinityPolicy::default())
}
