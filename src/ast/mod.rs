//! AST module for the Among notation
//!
//! A compiled tree is made of three node shapes: opaque [`Primitive`] strings,
//! insertion-ordered [`Object`]s and [`List`]s. Objects and lists carry a name
//! (empty means unnamed) and are jointly called *nameable*. A list parsed with
//! parenthesis syntax is flagged as an *operation*; the flag never affects
//! equality.

// ============================================================================
// IMPORTS
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use path::{NodePath, PathElement};

// ============================================================================
// CORE DATA STRUCTURES
// ============================================================================

/// Identity of a node instance, assigned at construction time by the parser.
///
/// Identity is what lets the macro engine find *this* parameter reference in a
/// freshly built template, as opposed to any structurally equal node. Nodes
/// built outside the parser carry [`NodeId::NONE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    pub const NONE: NodeId = NodeId(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Monotonic [`NodeId`] source owned by one compilation.
#[derive(Debug, Default)]
pub struct NodeIds {
    last: u64,
}

impl NodeIds {
    pub fn next(&mut self) -> NodeId {
        self.last += 1;
        NodeId(self.last)
    }
}

/// Codepoint range a node was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// An opaque string payload; numbers and booleans are strings too.
#[derive(Debug, Clone, Serialize)]
pub struct Primitive {
    pub value: String,
    #[serde(skip)]
    pub id: NodeId,
    #[serde(skip)]
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct Property {
    pub key: String,
    pub value: Arc<Node>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Object {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub properties: Vec<Property>,
    #[serde(skip)]
    pub id: NodeId,
    #[serde(skip)]
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct List {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub values: Vec<Arc<Node>>,
    pub operation: bool,
    #[serde(skip)]
    pub id: NodeId,
    #[serde(skip)]
    pub span: Span,
}

/// A node of a compiled Among tree.
///
/// Children are shared through [`Arc`]; every mutation goes through
/// [`Arc::make_mut`], so sharing a subtree between two trees is never
/// observable.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Primitive(Primitive),
    Object(Object),
    List(List),
}

/// What a visitor wants to happen after seeing a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    SkipChildren,
    Stop,
}

// ============================================================================
// PUBLIC API IMPLEMENTATION
// ============================================================================

impl Node {
    /// # Examples
    ///
    /// ```rust
    /// use among::ast::Node;
    /// let node = Node::primitive("42");
    /// assert_eq!(node.as_primitive(), Some("42"));
    /// assert!(!node.is_nameable());
    /// ```
    pub fn primitive(value: impl Into<String>) -> Self {
        Node::Primitive(Primitive {
            value: value.into(),
            id: NodeId::NONE,
            span: Span::default(),
        })
    }

    pub fn object(name: impl Into<String>, properties: Vec<(String, Node)>) -> Self {
        Node::Object(Object {
            name: name.into(),
            properties: properties
                .into_iter()
                .map(|(key, value)| Property {
                    key,
                    value: Arc::new(value),
                })
                .collect(),
            id: NodeId::NONE,
            span: Span::default(),
        })
    }

    pub fn list(name: impl Into<String>, values: Vec<Node>) -> Self {
        Self::list_of(name, values.into_iter().map(Arc::new).collect(), false)
    }

    pub fn operation(name: impl Into<String>, values: Vec<Node>) -> Self {
        Self::list_of(name, values.into_iter().map(Arc::new).collect(), true)
    }

    pub fn list_of(name: impl Into<String>, values: Vec<Arc<Node>>, operation: bool) -> Self {
        Node::List(List {
            name: name.into(),
            values,
            operation,
            id: NodeId::NONE,
            span: Span::default(),
        })
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        match &mut self {
            Node::Primitive(p) => p.id = id,
            Node::Object(o) => o.id = id,
            Node::List(l) => l.id = id,
        }
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        match &mut self {
            Node::Primitive(p) => p.span = span,
            Node::Object(o) => o.span = span,
            Node::List(l) => l.span = span,
        }
        self
    }

    pub fn id(&self) -> NodeId {
        match self {
            Node::Primitive(p) => p.id,
            Node::Object(o) => o.id,
            Node::List(l) => l.id,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Node::Primitive(p) => p.span,
            Node::Object(o) => o.span,
            Node::List(l) => l.span,
        }
    }

    /// The name of a nameable node; `None` for primitives.
    pub fn name(&self) -> Option<&str> {
        match self {
            Node::Primitive(_) => None,
            Node::Object(o) => Some(&o.name),
            Node::List(l) => Some(&l.name),
        }
    }

    /// Renames a nameable node. Returns `false` for primitives.
    pub fn set_name(&mut self, name: impl Into<String>) -> bool {
        match self {
            Node::Primitive(_) => false,
            Node::Object(o) => {
                o.name = name.into();
                true
            }
            Node::List(l) => {
                l.name = name.into();
                true
            }
        }
    }

    pub fn is_nameable(&self) -> bool {
        !matches!(self, Node::Primitive(_))
    }

    pub fn is_operation(&self) -> bool {
        matches!(self, Node::List(l) if l.operation)
    }

    pub fn as_primitive(&self) -> Option<&str> {
        match self {
            Node::Primitive(p) => Some(&p.value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Node::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Node::List(l) => Some(l),
            _ => None,
        }
    }

    /// Short description of the node's shape, used in messages.
    pub fn describe(&self) -> &'static str {
        crate::macros::TypeFlags::of(self).describe()
    }

    /// Looks up the descendant at `path`.
    pub fn get(&self, path: &[PathElement]) -> Option<&Node> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        let child = match (self, first) {
            (Node::Object(o), PathElement::Key(key)) => o.get(key)?,
            (Node::List(l), PathElement::Index(index)) => l.values.get(*index)?,
            _ => return None,
        };
        child.get(rest)
    }

    /// Looks up the descendant at `path` for mutation, unsharing every node
    /// on the way down.
    pub fn get_mut(&mut self, path: &[PathElement]) -> Option<&mut Node> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        let child = match (self, first) {
            (Node::Object(o), PathElement::Key(key)) => o
                .properties
                .iter_mut()
                .find(|p| p.key == *key)
                .map(|p| &mut p.value)?,
            (Node::List(l), PathElement::Index(index)) => l.values.get_mut(*index)?,
            _ => return None,
        };
        Arc::make_mut(child).get_mut(rest)
    }

    /// Depth-first, pre-order traversal.
    ///
    /// The visitor sees each node with its path from `self`; returning
    /// [`Visit::SkipChildren`] prunes the subtree and [`Visit::Stop`] ends the
    /// whole walk. Object properties are visited in insertion order.
    pub fn walk<F>(&self, visitor: &mut F)
    where
        F: FnMut(&NodePath, &Node) -> Visit,
    {
        self.walk_from(&mut NodePath::new(), visitor);
    }

    /// Builds a structurally equal tree that shares no allocation with `self`.
    pub fn deep_copy(&self) -> Node {
        match self {
            Node::Primitive(p) => Node::Primitive(p.clone()),
            Node::Object(o) => Node::Object(Object {
                properties: o
                    .properties
                    .iter()
                    .map(|p| Property {
                        key: p.key.clone(),
                        value: Arc::new(p.value.deep_copy()),
                    })
                    .collect(),
                name: o.name.clone(),
                ..*o
            }),
            Node::List(l) => Node::List(List {
                values: l.values.iter().map(|v| Arc::new(v.deep_copy())).collect(),
                name: l.name.clone(),
                ..*l
            }),
        }
    }

    /// Resets every id in the tree to [`NodeId::NONE`].
    pub fn clear_ids(&mut self) {
        match self {
            Node::Primitive(p) => p.id = NodeId::NONE,
            Node::Object(o) => {
                o.id = NodeId::NONE;
                for p in &mut o.properties {
                    Arc::make_mut(&mut p.value).clear_ids();
                }
            }
            Node::List(l) => {
                l.id = NodeId::NONE;
                for v in &mut l.values {
                    Arc::make_mut(v).clear_ids();
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Traversal helpers
    // ------------------------------------------------------------------------

    /// Returns `false` once the visitor asked to stop.
    fn walk_from<F>(&self, path: &mut NodePath, visitor: &mut F) -> bool
    where
        F: FnMut(&NodePath, &Node) -> Visit,
    {
        match visitor(path, self) {
            Visit::Stop => return false,
            Visit::SkipChildren => return true,
            Visit::Continue => {}
        }
        match self {
            Node::Primitive(_) => true,
            Node::Object(o) => o.properties.iter().all(|p| {
                path.push(PathElement::Key(p.key.clone()));
                let go_on = p.value.walk_from(path, visitor);
                path.pop();
                go_on
            }),
            Node::List(l) => l.values.iter().enumerate().all(|(i, v)| {
                path.push(PathElement::Index(i));
                let go_on = v.walk_from(path, visitor);
                path.pop();
                go_on
            }),
        }
    }
}

impl Object {
    pub fn get(&self, key: &str) -> Option<&Arc<Node>> {
        self.properties.iter().find(|p| p.key == key).map(|p| &p.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Appends a property unless the key is already present; the first
    /// assignment always wins.
    pub fn insert(&mut self, key: impl Into<String>, value: Arc<Node>) -> bool {
        let key = key.into();
        if self.contains_key(&key) {
            return false;
        }
        self.properties.push(Property { key, value });
        true
    }
}

// ============================================================================
// EQUALITY
// ============================================================================

impl PartialEq for Node {
    /// Structural equality: identity, spans and the operation flag are
    /// ignored, and object properties compare as a map.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Primitive(a), Node::Primitive(b)) => a.value == b.value,
            (Node::Object(a), Node::Object(b)) => {
                a.name == b.name
                    && a.properties.len() == b.properties.len()
                    && a.properties
                        .iter()
                        .all(|p| b.get(&p.key).is_some_and(|v| *v == p.value))
            }
            (Node::List(a), Node::List(b)) => a.name == b.name && a.values == b.values,
            _ => false,
        }
    }
}

impl Eq for Node {}

// ============================================================================
// COMPACT RENDERING
// ============================================================================

/// Words that open a definition statement and must be quoted to stay values.
const RESERVED_WORDS: [&str; 6] = ["macro", "fn", "operator", "keyword", "undef", "use"];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Position {
    Value,
    Operation,
    Name,
    Key,
}

impl fmt::Display for Node {
    /// Compact Among text that parses back into an equal tree.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use among::ast::Node;
    /// let node = Node::object("point", vec![
    ///     ("x".to_string(), Node::primitive("1")),
    ///     ("label".to_string(), Node::primitive("a, b")),
    /// ]);
    /// assert_eq!(node.to_string(), r#"point{x: 1, label: "a, b"}"#);
    /// ```
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, self, Position::Value)
    }
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &Node, position: Position) -> fmt::Result {
    match node {
        Node::Primitive(p) => write_text(f, &p.value, position),
        Node::Object(o) => {
            write_name(f, &o.name, position)?;
            f.write_str("{")?;
            for (i, p) in o.properties.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_text(f, &p.key, Position::Key)?;
                f.write_str(": ")?;
                write_node(f, &p.value, Position::Value)?;
            }
            f.write_str("}")
        }
        Node::List(l) => {
            write_name(f, &l.name, position)?;
            let (open, close, inner) = if l.operation {
                ("(", ")", Position::Operation)
            } else {
                ("[", "]", Position::Value)
            };
            f.write_str(open)?;
            for (i, v) in l.values.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_node(f, v, inner)?;
            }
            f.write_str(close)
        }
    }
}

fn write_name(f: &mut fmt::Formatter<'_>, name: &str, position: Position) -> fmt::Result {
    match (name.is_empty(), position) {
        (true, _) => Ok(()),
        // Inside an operation the name would be split into operator tokens.
        (false, Position::Operation) => write_text(f, name, Position::Operation),
        (false, _) => write_text(f, name, Position::Name),
    }
}

fn write_text(f: &mut fmt::Formatter<'_>, text: &str, position: Position) -> fmt::Result {
    if is_bare(text, position) {
        return f.write_str(text);
    }
    f.write_str("\"")?;
    for c in text.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

/// Whether `text` survives re-tokenization unquoted at `position`.
fn is_bare(text: &str, position: Position) -> bool {
    if text.is_empty() || text.contains("//") || text.contains("/*") {
        return false;
    }
    let first_word = text.split_whitespace().next().unwrap_or_default();
    if RESERVED_WORDS.contains(&first_word) {
        return false;
    }
    match position {
        Position::Operation => text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
        Position::Name => !text.chars().any(|c| c.is_whitespace() || is_special(c) || c == ':'),
        Position::Value | Position::Key => {
            let trimmed = text.trim() == text;
            let forbidden = |c: char| is_special(c) || c == '\n' || c == '\r' || (position == Position::Key && c == ':');
            trimmed && !text.chars().any(forbidden)
        }
    }
}

fn is_special(c: char) -> bool {
    matches!(c, '{' | '}' | '[' | ']' | '(' | ')' | ',' | '\'' | '"' | '\\')
}

// ============================================================================
// MODULE EXPORTS
// ============================================================================

pub mod path;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Node {
        Node::object(
            "root",
            vec![
                ("a".to_string(), Node::list("", vec![Node::primitive("1"), Node::primitive("2")])),
                ("b".to_string(), Node::operation("+", vec![Node::primitive("x"), Node::primitive("y")])),
            ],
        )
    }

    #[test]
    fn equality_ignores_operation_flag_and_property_order() {
        let a = Node::list("f", vec![Node::primitive("1")]);
        let b = Node::operation("f", vec![Node::primitive("1")]);
        assert_eq!(a, b);
        let c = Node::object("", vec![("x".into(), Node::primitive("1")), ("y".into(), Node::primitive("2"))]);
        let d = Node::object("", vec![("y".into(), Node::primitive("2")), ("x".into(), Node::primitive("1"))]);
        assert_eq!(c, d);
        assert_ne!(Node::primitive("1"), Node::list("", vec![]));
    }

    #[test]
    fn paths_reach_nested_nodes() {
        let node = sample();
        let path = NodePath::from(vec![PathElement::Key("b".into()), PathElement::Index(1)]);
        assert_eq!(node.get(&path), Some(&Node::primitive("y")));
        assert_eq!(node.get(&[PathElement::Index(0)]), None);
        assert_eq!(path.to_string(), ".b[1]");
    }

    #[test]
    fn get_mut_unshares_only_the_copy() {
        let original = Arc::new(sample());
        let mut copy = (*original).clone();
        let target = copy.get_mut(&[PathElement::Key("a".into()), PathElement::Index(0)]).unwrap();
        *target = Node::primitive("changed");
        assert_eq!(copy.get(&[PathElement::Key("a".into()), PathElement::Index(0)]), Some(&Node::primitive("changed")));
        assert_eq!(original.get(&[PathElement::Key("a".into()), PathElement::Index(0)]), Some(&Node::primitive("1")));
    }

    #[test]
    fn walk_visits_in_order_and_honors_skip() {
        let node = sample();
        let mut seen = Vec::new();
        node.walk(&mut |path, n| {
            seen.push(path.to_string());
            if n.name() == Some("+") {
                Visit::SkipChildren
            } else {
                Visit::Continue
            }
        });
        assert_eq!(seen, vec!["<root>", ".a", ".a[0]", ".a[1]", ".b"]);

        let mut count = 0;
        node.walk(&mut |_, _| {
            count += 1;
            if count == 2 { Visit::Stop } else { Visit::Continue }
        });
        assert_eq!(count, 2);
    }

    #[test]
    fn insert_keeps_first_assignment() {
        let Node::Object(mut object) = Node::object("", vec![]) else { unreachable!() };
        assert!(object.insert("k", Arc::new(Node::primitive("1"))));
        assert!(!object.insert("k", Arc::new(Node::primitive("2"))));
        assert_eq!(object.get("k").map(|v| v.as_primitive()), Some(Some("1")));
    }

    #[test]
    fn display_quotes_only_when_needed() {
        let node = Node::list(
            "",
            vec![
                Node::primitive("hello world"),
                Node::primitive("macro"),
                Node::operation("+", vec![Node::primitive("a"), Node::primitive("1.5")]),
                Node::primitive("line\nbreak"),
            ],
        );
        assert_eq!(node.to_string(), r#"[hello world, "macro", +(a, "1.5"), "line\nbreak"]"#);

        let nested = Node::operation("", vec![Node::operation("*", vec![Node::primitive("2")])]);
        assert_eq!(nested.to_string(), r#"("*"(2))"#);
    }
}
