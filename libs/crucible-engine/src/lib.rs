//! Sandboxed code execution engine.
//!
//! Turns `(code, language, optional stdin)` into bounded, isolated
//! execution inside a docker container, and layers an automated test
//! harness on top for grading submissions against ordered test cases.

pub mod config;
pub mod demux;
pub mod docker;
pub mod error;
pub mod executor;
pub mod harness;
pub mod inject;
pub mod language;

mod hijack;

#[cfg(test)]
mod engine_tests;
#[cfg(test)]
mod fault_tests;

pub use config::EngineConfig;
pub use docker::{ContainerHandle, ContainerRegistry};
pub use error::{EngineError, Result};
pub use executor::{ExecutionMode, Executor};
pub use harness::run_tests;
