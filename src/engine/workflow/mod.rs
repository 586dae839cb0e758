// SPDX-License-Identifier: MIT

pub mod builder;
pub mod catalog;
pub mod checkpoint;
pub mod engine;
pub mod graph;
pub mod layers;
pub mod loader;
pub mod retry;
pub mod state;
pub mod telemetry;
pub mod template;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;
