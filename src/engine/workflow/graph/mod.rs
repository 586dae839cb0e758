// SPDX-License-Identifier: MIT

//! Built flows and the executor that drives them
//!
//! A [`Flow`] is the output of the builder: every step wrapped in its layer
//! chain and wired to its successors by routing action. [`FlowExecutor`]
//! walks it one step at a time.

pub mod executor;
mod flow;

pub use executor::{ExecutorConfig, FlowExecutor, RunOutcome};
pub use flow::{Flow, StepInstance};
