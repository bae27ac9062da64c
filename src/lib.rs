//! logprobe - remote log forwarding test runner
//!
//! Launches a log receiver and a log sender in a deployment, emits a tagged
//! marker on the sender and polls the receiver's syslog until the marker
//! shows up, once per forwarding transport.

pub mod cli;
pub mod commands;
pub mod common;
pub mod deployment;
pub mod probe;
pub mod testing;
pub mod verifier;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use deployment::{Deployment, LifecycleState, ServerHandle};
pub use probe::{ProbeResult, ProbeTarget, RemoteProbe};
pub use testing::{TestCaseRunner, TestReport};
pub use verifier::{LogPropagationVerifier, Transport, VerifierSettings};
