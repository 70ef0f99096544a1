//! Thread identity captured at each lifecycle step.

use serde::{Deserialize, Serialize};
use std::thread::{self, ThreadId};

/// Identity of an OS thread as seen by the enclave boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadIdentity {
    /// Debug rendering of the std `ThreadId` (e.g. `ThreadId(1)`)
    pub id: String,
    /// Thread name, if the thread was given one
    pub name: Option<String>,
    #[serde(skip)]
    raw: Option<ThreadId>,
}

impl ThreadIdentity {
    /// Identity of the calling thread
    pub fn current() -> Self {
        let current = thread::current();
        Self {
            id: format!("{:?}", current.id()),
            name: current.name().map(str::to_string),
            raw: Some(current.id()),
        }
    }

    /// Whether this identity denotes the calling thread
    pub fn is_current(&self) -> bool {
        self.same_thread(&Self::current())
    }

    /// Compare two identities by thread id
    pub fn same_thread(&self, other: &ThreadIdentity) -> bool {
        match (self.raw, other.raw) {
            (Some(a), Some(b)) => a == b,
            _ => self.id == other.id,
        }
    }
}

impl std::fmt::Display for ThreadIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "<unnamed> ({})", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_identity_is_stable() {
        let a = ThreadIdentity::current();
        let b = ThreadIdentity::current();
        assert!(a.same_thread(&b));
        assert!(a.is_current());
    }

    #[test]
    fn test_other_thread_differs() {
        let here = ThreadIdentity::current();
        let there = thread::Builder::new()
            .name("probe-test".to_string())
            .spawn(ThreadIdentity::current)
            .unwrap()
            .join()
            .unwrap();

        assert!(!here.same_thread(&there));
        assert!(!there.is_current());
        assert_eq!(there.name.as_deref(), Some("probe-test"));
        assert!(there.to_string().starts_with("probe-test ("));
    }
}
