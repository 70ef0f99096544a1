//! Thread-or-main dispatcher.
//!
//! Runs a unit of work either inline on the calling thread or on a freshly
//! spawned worker that is joined before returning. Panics on either side are
//! captured and returned instead of unwinding further.

use crate::scenario::Placement;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to spawn {placement}: {source}")]
    Spawn {
        placement: Placement,
        #[source]
        source: std::io::Error,
    },

    #[error("{placement} panicked: {message}")]
    Panicked { placement: Placement, message: String },
}

pub struct Dispatcher {
    name_prefix: String,
    spawned: AtomicUsize,
}

impl Dispatcher {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Worker threads spawned so far
    pub fn workers_spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Run `work` at `placement`, blocking until it has finished
    pub fn run<T, F>(&self, placement: Placement, work: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match placement {
            Placement::Main => panic::catch_unwind(AssertUnwindSafe(work)).map_err(|payload| {
                DispatchError::Panicked {
                    placement,
                    message: panic_message(payload),
                }
            }),
            Placement::Worker(id) => {
                let name = format!("{}-{}", self.name_prefix, id);
                let worker = thread::Builder::new()
                    .name(name.clone())
                    .spawn(work)
                    .map_err(|source| DispatchError::Spawn { placement, source })?;
                self.spawned.fetch_add(1, Ordering::Relaxed);
                debug!(worker = %name, "Spawned worker; joining");

                worker.join().map_err(|payload| DispatchError::Panicked {
                    placement,
                    message: panic_message(payload),
                })
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crashme_enclave::ThreadIdentity;

    #[test]
    fn test_main_runs_inline() {
        let dispatcher = Dispatcher::new("test-worker");
        let identity = dispatcher.run(Placement::Main, ThreadIdentity::current).unwrap();

        assert!(identity.is_current());
        assert_eq!(dispatcher.workers_spawned(), 0);
    }

    #[test]
    fn test_worker_runs_on_named_thread() {
        let dispatcher = Dispatcher::new("test-worker");
        let identity = dispatcher.run(Placement::Worker(7), ThreadIdentity::current).unwrap();

        assert!(!identity.is_current());
        assert_eq!(identity.name.as_deref(), Some("test-worker-7"));
        assert_eq!(dispatcher.workers_spawned(), 1);
    }

    #[test]
    fn test_worker_panic_is_captured() {
        let dispatcher = Dispatcher::new("test-worker");
        let result: Result<(), _> = dispatcher.run(Placement::Worker(1), || panic!("boom"));

        match result {
            Err(DispatchError::Panicked { placement, message }) => {
                assert_eq!(placement, Placement::Worker(1));
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_main_panic_is_captured() {
        let dispatcher = Dispatcher::new("test-worker");
        let result: Result<(), _> =
            dispatcher.run(Placement::Main, || panic!("{} failed", "stage"));

        assert!(matches!(
            result,
            Err(DispatchError::Panicked { placement: Placement::Main, ref message }) if message == "stage failed"
        ));
    }
}
