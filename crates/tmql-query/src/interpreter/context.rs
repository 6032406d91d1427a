//! Scoped variable bindings

use super::matches::Tuple;
use tmql_core::Value;

/// Binding of the current item inside a filter
pub const CURRENT: &str = ".";

/// Binding of the current position inside a filter
pub const POSITION: &str = "$#";

/// Stack of binding frames; lookup walks from the innermost frame out
#[derive(Debug, Default)]
pub struct Context {
    frames: Vec<Tuple>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Tuple) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Tuple> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}
