// SPDX-License-Identifier: MIT

//! Syntax tree for `${...}` templates

use std::fmt;

/// One step along a reference path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// `.field`
    Key(String),
    /// `[index]`
    Index(usize),
}

/// A parsed reference such as `fetch.result.issues[0].title`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Step id, batch alias, or workflow input name
    pub root: String,
    pub path: Vec<PathSegment>,
}

impl Reference {
    /// Render the root plus the first `depth` segments
    pub fn display_prefix(&self, depth: usize) -> String {
        let mut out = self.root.clone();
        for segment in self.path.iter().take(depth) {
            match segment {
                PathSegment::Key(key) => {
                    out.push('.');
                    out.push_str(key);
                }
                PathSegment::Index(index) => {
                    out.push_str(&format!("[{}]", index));
                }
            }
        }
        out
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_prefix(self.path.len()))
    }
}

/// A piece of a template string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Literal(String),
    Reference(Reference),
}

/// A string split into literal text and references
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    pub pieces: Vec<Piece>,
}

impl Template {
    /// The reference, when the whole string is exactly one `${...}`
    pub fn single_reference(&self) -> Option<&Reference> {
        match self.pieces.as_slice() {
            [Piece::Reference(reference)] => Some(reference),
            _ => None,
        }
    }

    pub fn has_references(&self) -> bool {
        self.pieces
            .iter()
            .any(|p| matches!(p, Piece::Reference(_)))
    }
}
