//! Scenario runner
//!
//! Registers named scenarios, one per transport, and runs each through the
//! log propagation verifier, collecting a pass/fail report that never lets
//! one scenario's failure hide the others.

mod config;
mod runner;

pub use config::*;
pub use runner::{ScenarioResult, TestCaseRunner, TestOutcome, TestReport};
