//! A canonical, type-safe address of a node below some root node.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// One step of a [`NodePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathElement {
    /// Descend into an object property.
    Key(String),
    /// Descend into a list element.
    Index(usize),
}

/// How to walk from a root node down to one of its descendants.
///
/// Macro definitions record where parameter references sit inside their
/// template; the template is copied on every application, so node identity
/// cannot be reused and the path is replayed instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodePath(Vec<PathElement>);

impl NodePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element);
    }

    pub fn pop(&mut self) -> Option<PathElement> {
        self.0.pop()
    }
}

impl Deref for NodePath {
    type Target = [PathElement];

    fn deref(&self) -> &[PathElement] {
        &self.0
    }
}

impl From<Vec<PathElement>> for NodePath {
    fn from(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for element in &self.0 {
            match element {
                PathElement::Key(key) => write!(f, ".{key}")?,
                PathElement::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}
