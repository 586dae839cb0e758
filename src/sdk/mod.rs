// SPDX-License-Identifier: MIT

//! Step development kit
//!
//! This module provides the contracts a step implementation is written against:
//! - `Step` - the prepare / run / finalize lifecycle
//! - `Model` - metered access to LLM-style services
//! - typed errors shared by steps and the engine

pub mod error;
pub mod model;
pub mod step;
