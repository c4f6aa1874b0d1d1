//! Fundamental types of the macro system.
//!
//! This module has no dependencies on other macro modules, making it the
//! foundation layer: node shape flags, macro kinds and signatures, and
//! parameter lists.
//!
//! ## Ownership
//!
//! - All types are owned structures that can be freely moved and cloned
//! - Default values are shared `Arc<Node>`s, never copied on registration

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::ast::Node;
use crate::diagnostics::Report;
use crate::err_msg;

/// Maximum nesting depth of macro applications triggered by one invocation.
pub const MAX_MACRO_RECURSION_DEPTH: usize = 128;

bitflags! {
    /// The node shapes a macro parameter accepts.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use among::ast::Node;
    /// use among::macros::TypeFlags;
    /// let list = Node::list("v", vec![]);
    /// assert!(TypeFlags::NAMED.matches(&list));
    /// assert!(!TypeFlags::OPERATION.matches(&list));
    /// assert_eq!(TypeFlags::of(&list), TypeFlags::NAMED_LIST);
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TypeFlags: u8 {
        const PRIMITIVE = 1;
        const UNNAMED_OBJECT = 1 << 1;
        const UNNAMED_LIST = 1 << 2;
        const UNNAMED_OPERATION = 1 << 3;
        const NAMED_OBJECT = 1 << 4;
        const NAMED_LIST = 1 << 5;
        const NAMED_OPERATION = 1 << 6;

        const OBJECT = Self::UNNAMED_OBJECT.bits() | Self::NAMED_OBJECT.bits();
        const LIST = Self::UNNAMED_LIST.bits() | Self::NAMED_LIST.bits();
        const OPERATION = Self::UNNAMED_OPERATION.bits() | Self::NAMED_OPERATION.bits();
        const NAMED = Self::NAMED_OBJECT.bits() | Self::NAMED_LIST.bits() | Self::NAMED_OPERATION.bits();
        const UNNAMED = Self::UNNAMED_OBJECT.bits() | Self::UNNAMED_LIST.bits() | Self::UNNAMED_OPERATION.bits();
        const NAMEABLE = Self::NAMED.bits() | Self::UNNAMED.bits();
        const ANY = Self::PRIMITIVE.bits() | Self::NAMEABLE.bits();
    }
}

/// Names accepted in parameter type annotations, most specific last.
const TYPE_NAMES: [(&str, TypeFlags); 14] = [
    ("any", TypeFlags::ANY),
    ("nameable", TypeFlags::NAMEABLE),
    ("named", TypeFlags::NAMED),
    ("unnamed", TypeFlags::UNNAMED),
    ("object", TypeFlags::OBJECT),
    ("list", TypeFlags::LIST),
    ("operation", TypeFlags::OPERATION),
    ("primitive", TypeFlags::PRIMITIVE),
    ("unnamed-object", TypeFlags::UNNAMED_OBJECT),
    ("unnamed-list", TypeFlags::UNNAMED_LIST),
    ("unnamed-operation", TypeFlags::UNNAMED_OPERATION),
    ("named-object", TypeFlags::NAMED_OBJECT),
    ("named-list", TypeFlags::NAMED_LIST),
    ("named-operation", TypeFlags::NAMED_OPERATION),
];

impl TypeFlags {
    /// The single flag describing `node`'s shape.
    pub fn of(node: &Node) -> TypeFlags {
        match node {
            Node::Primitive(_) => TypeFlags::PRIMITIVE,
            Node::Object(o) if o.name.is_empty() => TypeFlags::UNNAMED_OBJECT,
            Node::Object(_) => TypeFlags::NAMED_OBJECT,
            Node::List(l) => match (l.name.is_empty(), l.operation) {
                (true, false) => TypeFlags::UNNAMED_LIST,
                (true, true) => TypeFlags::UNNAMED_OPERATION,
                (false, false) => TypeFlags::NAMED_LIST,
                (false, true) => TypeFlags::NAMED_OPERATION,
            },
        }
    }

    pub fn matches(self, node: &Node) -> bool {
        self.contains(TypeFlags::of(node))
    }

    /// Parses a type annotation such as `object` or `named-list`.
    pub fn from_annotation(name: &str) -> Option<TypeFlags> {
        TYPE_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, flags)| *flags)
    }

    /// Human-readable name: the exact union name if there is one, otherwise
    /// the atomic flags joined with `|`.
    pub fn describe(self) -> &'static str {
        if self.is_empty() {
            return "nothing";
        }
        TYPE_NAMES
            .iter()
            .find(|(_, flags)| *flags == self)
            .map(|(name, _)| *name)
            .unwrap_or("mixed")
    }
}

impl fmt::Display for TypeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.describe();
        if name != "mixed" {
            return f.write_str(name);
        }
        let parts: Vec<&str> = self
            .iter()
            .map(|flag| flag.describe())
            .collect();
        f.write_str(&parts.join(" | "))
    }
}

/// The argument shape a macro is invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MacroType {
    /// `macro name: ...`, invoked by a bare primitive
    Const,
    /// `macro name{..}: ...`
    Object,
    /// `macro name[..]: ...`
    List,
    /// `macro name(..): ...`
    Operation,
    /// `fn name: ...`, invoked by `receiver.name`
    Access,
    /// `fn name{..}: ...`, invoked by `receiver.name{..}`
    ObjectFn,
    /// `fn name[..]: ...`, invoked by `receiver.name[..]`
    ListFn,
    /// `fn name(..): ...`, invoked by `receiver.name(..)`
    OperationFn,
}

impl MacroType {
    /// Whether the first parameter is the implicit `self` receiver.
    pub fn is_function(self) -> bool {
        matches!(
            self,
            MacroType::Access | MacroType::ObjectFn | MacroType::ListFn | MacroType::OperationFn
        )
    }

    /// Whether arguments are selected by key, so defaults may appear anywhere.
    pub fn is_keyed(self) -> bool {
        matches!(self, MacroType::Object | MacroType::ObjectFn)
    }

    /// The function variant invoked when an accessor's right operand has the
    /// given shape; primitives give [`MacroType::Access`].
    pub fn function_for(node: &Node) -> MacroType {
        match node {
            Node::Primitive(_) => MacroType::Access,
            Node::Object(_) => MacroType::ObjectFn,
            Node::List(l) if l.operation => MacroType::OperationFn,
            Node::List(_) => MacroType::ListFn,
        }
    }

    fn brackets(self) -> Option<(&'static str, &'static str)> {
        match self {
            MacroType::Const | MacroType::Access => None,
            MacroType::Object | MacroType::ObjectFn => Some(("{", "}")),
            MacroType::List | MacroType::ListFn => Some(("[", "]")),
            MacroType::Operation | MacroType::OperationFn => Some(("(", ")")),
        }
    }
}

/// Macro lookup key: name plus invocation shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacroSignature {
    pub name: String,
    pub kind: MacroType,
}

impl MacroSignature {
    pub fn new(name: impl Into<String>, kind: MacroType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for MacroSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = if self.kind.is_function() { "fn" } else { "macro" };
        write!(f, "{keyword} {}", self.name)?;
        if let Some((open, close)) = self.kind.brackets() {
            write!(f, "{open}{close}")?;
        }
        Ok(())
    }
}

/// A single declared macro parameter.
#[derive(Debug, Clone, Serialize)]
pub struct Parameter {
    pub name: String,
    /// Value used when the argument is absent; makes the parameter optional.
    pub default: Option<Arc<Node>>,
    /// Type from the annotation, [`TypeFlags::ANY`] when unannotated.
    pub declared: TypeFlags,
    /// Declared type narrowed by how the template uses the parameter.
    pub inferred: TypeFlags,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            declared: TypeFlags::ANY,
            inferred: TypeFlags::ANY,
        }
    }

    pub fn with_default(mut self, default: Node) -> Self {
        self.default = Some(Arc::new(default));
        self
    }

    pub fn with_type(mut self, declared: TypeFlags) -> Self {
        self.declared = declared;
        self.inferred = declared;
        self
    }

    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.declared == other.declared
            && self.default.is_some() == other.default.is_some()
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.declared != TypeFlags::ANY {
            write!(f, ": {}", self.declared)?;
        }
        if let Some(default) = &self.default {
            write!(f, " = {default}")?;
        }
        Ok(())
    }
}

/// Ordered parameters of one macro, including the implicit `self` of `fn`
/// macros.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParameterList {
    params: Vec<Parameter>,
}

impl ParameterList {
    /// Validates and builds a parameter list.
    ///
    /// Names must be unique, and for positional macro types every optional
    /// parameter must come after all required ones.
    pub fn new(params: Vec<Parameter>, kind: MacroType) -> Result<Self, Report> {
        check_no_duplicate_params(&params)?;
        if !kind.is_keyed() {
            if let Some(window) = params
                .windows(2)
                .find(|w| w[0].is_optional() && !w[1].is_optional())
            {
                return Err(err_msg!(
                    Macro,
                    "required parameter '{}' follows optional parameter '{}'",
                    window[1].name,
                    window[0].name
                )
                .hint("optional parameters of positional macros must form a trailing run"));
            }
        }
        Ok(Self { params })
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Parameter> {
        self.params.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.params.iter()
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Parameter> {
        self.params.get_mut(index)
    }
}

impl fmt::Display for ParameterList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn check_no_duplicate_params(params: &[Parameter]) -> Result<(), Report> {
    let mut seen = HashSet::new();
    for param in params {
        if !seen.insert(param.name.as_str()) {
            return Err(err_msg!(Macro, "duplicate parameter name '{}'", param.name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_describe_unions_and_atoms() {
        assert_eq!(TypeFlags::ANY.describe(), "any");
        assert_eq!(TypeFlags::NAMED_OPERATION.describe(), "named-operation");
        assert_eq!(TypeFlags::empty().describe(), "nothing");
        let mixed = TypeFlags::PRIMITIVE | TypeFlags::NAMED_LIST;
        assert_eq!(mixed.to_string(), "primitive | named-list");
    }

    #[test]
    fn flags_classify_nodes() {
        assert_eq!(TypeFlags::of(&Node::primitive("x")), TypeFlags::PRIMITIVE);
        assert_eq!(TypeFlags::of(&Node::object("", vec![])), TypeFlags::UNNAMED_OBJECT);
        assert_eq!(TypeFlags::of(&Node::operation("+", vec![])), TypeFlags::NAMED_OPERATION);
        assert!(TypeFlags::NAMEABLE.matches(&Node::list("", vec![])));
        assert!(!TypeFlags::NAMEABLE.matches(&Node::primitive("x")));
        assert_eq!(TypeFlags::from_annotation("unnamed"), Some(TypeFlags::UNNAMED));
        assert_eq!(TypeFlags::from_annotation("string"), None);
    }

    #[test]
    fn signatures_display_their_shape() {
        assert_eq!(MacroSignature::new("v", MacroType::List).to_string(), "macro v[]");
        assert_eq!(MacroSignature::new("len", MacroType::Access).to_string(), "fn len");
        assert_eq!(MacroSignature::new("at", MacroType::OperationFn).to_string(), "fn at()");
    }

    #[test]
    fn positional_optionals_must_trail() {
        let params = vec![
            Parameter::new("a").with_default(Node::primitive("1")),
            Parameter::new("b"),
        ];
        assert!(ParameterList::new(params.clone(), MacroType::List).is_err());
        assert!(ParameterList::new(params, MacroType::Object).is_ok());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let params = vec![Parameter::new("a"), Parameter::new("a")];
        let err = ParameterList::new(params, MacroType::Operation).unwrap_err();
        assert!(err.message.contains("duplicate parameter name 'a'"));
    }

    #[test]
    fn required_counts_skip_defaults() {
        let list = ParameterList::new(
            vec![Parameter::new("a"), Parameter::new("b").with_default(Node::primitive("0"))],
            MacroType::List,
        )
        .unwrap();
        assert!(!list.get(0).unwrap().is_optional());
        assert!(list.get(1).unwrap().is_optional());
        assert_eq!(list.len(), 2);
        assert_eq!(list.to_string(), "a, b = 0");
    }
}
