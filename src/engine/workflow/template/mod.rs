// SPDX-License-Identifier: MIT

//! Parameter templates for flow steps
//!
//! References take the form `${root.field[index].subfield}` where `root` is a
//! step id, a batch item alias, or a workflow input.

mod ast;
mod parser;
mod resolver;

pub use ast::{PathSegment, Piece, Reference, Template};
pub use parser::{contains_reference, parse, parse_reference};
pub use resolver::Resolver;
