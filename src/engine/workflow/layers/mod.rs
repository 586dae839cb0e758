// SPDX-License-Identifier: MIT

//! Wrapper layers applied to every step
//!
//! The chain is fixed, outermost first:
//! Instrumentation -> Namespacing -> Substitution -> raw step.
//! Each layer forwards the phases it does not intercept.

mod instrumentation;
mod namespacing;
mod substitution;

pub use instrumentation::{InstrumentationConfig, InstrumentationLayer};
pub use namespacing::NamespacingLayer;
pub use substitution::SubstitutionLayer;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::sdk::step::Step;

/// Wrap a raw step in the full layer chain
pub fn compose(
    raw: Arc<dyn Step>,
    known_steps: Arc<BTreeSet<String>>,
    config: &InstrumentationConfig,
) -> Arc<dyn Step> {
    let substituted: Arc<dyn Step> = Arc::new(SubstitutionLayer::new(raw, known_steps));
    let namespaced: Arc<dyn Step> = Arc::new(NamespacingLayer::new(substituted));
    Arc::new(InstrumentationLayer::new(namespaced, config.clone()))
}
