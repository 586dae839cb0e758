// SPDX-License-Identifier: MIT

//! stepflow-rs - checkpointed execution engine for step graphs
//!
//! - [`sdk`] is what step authors implement against: the [`sdk::step::Step`]
//!   lifecycle, the metered [`sdk::model::Model`] interface and the error types.
//! - [`engine`] compiles a [`engine::workflow::types::GraphDescription`] into a
//!   wired [`engine::workflow::graph::Flow`] and drives it with retry,
//!   instrumentation and checkpoint-based resume.

pub mod engine;
pub mod sdk;
