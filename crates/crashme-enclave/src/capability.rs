//! Capability contracts hosted inside an enclave.
//!
//! A capability is the enclave-side implementation of a contract. The host
//! never calls it directly: invocations are routed through the runtime (see
//! [`crate::ServiceHandle`]) so the runtime can apply its thread-affinity rules
//! first.

/// Minimal operation surface an enclave-hosted service exposes
pub trait Capability: Send + Sync {
    /// Contract this implementation satisfies
    fn contract(&self) -> &'static str;

    /// Handle one request
    fn invoke(&self, request: &str) -> String;
}

/// Reference probe payload: returns the request with its characters reversed
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseEcho;

impl ReverseEcho {
    pub const CONTRACT: &'static str = "crashme.echo";
}

impl Capability for ReverseEcho {
    fn contract(&self) -> &'static str {
        Self::CONTRACT
    }

    fn invoke(&self, request: &str) -> String {
        request.chars().rev().collect()
    }
}
