// SPDX-License-Identifier: MIT

//! State management for flow execution
//!
//! This module provides:
//! - `SharedStore` - the data bus with a namespaced and a reserved region
//! - `ReservedKey` - engine-owned keys and their reducers
//! - `StepContext` - the scoped view a step sees during one invocation

mod context;
mod reserved;
mod store;

pub use context::{Invocation, Scope, StepContext};
pub use reserved::{ReducerType, ReservedKey};
pub use store::SharedStore;
