//! Graph execution: the runner and the results it produces.

pub mod result;
pub mod runner;

pub use result::{NodeError, NodeErrorKind, NodeOutput, RunResult};
pub use runner::{RunEvent, RunOptions, Runner};
