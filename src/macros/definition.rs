//! Macro definitions: template finalization, argument binding and application.
//!
//! A definition is built once from a parsed template. Parameter references
//! recorded by the parser (by node id) are located in the finished template
//! and turned into [`Replacement`]s addressed by [`NodePath`]; from then on the
//! template is plain data and applying the macro replays the paths on a
//! copy-on-write clone of it.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::ast::{Node, NodeId, NodePath, Object, Visit};
use crate::diagnostics::Report;
use crate::err_msg;
use crate::macros::types::{MacroSignature, MacroType, ParameterList, TypeFlags};

/// What a replacement does with the node at its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "target", rename_all = "kebab-case")]
pub enum ReplacementTarget {
    /// Replace the whole node with the argument.
    Value,
    /// Rename the nameable node to `prefix` followed by the primitive argument.
    NameableName { prefix: String },
}

/// A parameter reference recorded while the template was being parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub parameter: usize,
    pub target: ReplacementTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replacement {
    pub path: NodePath,
    pub parameter: usize,
    #[serde(flatten)]
    pub target: ReplacementTarget,
}

/// A macro invocation inside the template that depends on arguments and is
/// expanded after every application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredInvocation {
    pub path: NodePath,
    pub kind: MacroType,
}

#[derive(Debug, Clone, Serialize)]
pub struct MacroDefinition {
    pub signature: MacroSignature,
    pub parameters: ParameterList,
    pub template: Arc<Node>,
    pub replacements: Vec<Replacement>,
    /// Ordered deepest first, so expanding one never moves another.
    pub deferred: Vec<DeferredInvocation>,
}

impl MacroDefinition {
    /// Finalizes a parsed template.
    ///
    /// Every entry of `references` must be found in `template`; a lost
    /// reference means the parser dropped a node it had registered and is
    /// reported as an internal error. Type narrowing problems are passed to
    /// `on_report` as warnings.
    pub fn new(
        signature: MacroSignature,
        mut parameters: ParameterList,
        mut template: Node,
        references: &HashMap<NodeId, Reference>,
        deferred: &HashMap<NodeId, MacroType>,
        on_report: &mut dyn FnMut(Report),
    ) -> Result<Self, Report> {
        let mut replacements = Vec::new();
        let mut invocations = Vec::new();
        template.walk(&mut |path, node| {
            if let Some(reference) = references.get(&node.id()) {
                replacements.push(Replacement {
                    path: path.clone(),
                    parameter: reference.parameter,
                    target: reference.target.clone(),
                });
            }
            if let Some(kind) = deferred.get(&node.id()) {
                invocations.push(DeferredInvocation {
                    path: path.clone(),
                    kind: *kind,
                });
            }
            Visit::Continue
        });
        if replacements.len() != references.len() {
            return Err(err_msg!(
                Internal,
                "{} of {} parameter references were lost while building {}",
                references.len() - replacements.len(),
                references.len(),
                signature
            ));
        }
        invocations.sort_by(|a, b| b.path.len().cmp(&a.path.len()));

        infer_types(&signature, &mut parameters, &replacements, on_report);
        template.clear_ids();
        Ok(Self {
            signature,
            parameters,
            template: Arc::new(template),
            replacements,
            deferred: invocations,
        })
    }

    /// A parameterless constant macro.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use among::ast::Node;
    /// use among::macros::MacroDefinition;
    /// let pi = MacroDefinition::constant("pi", Node::primitive("3.14159"));
    /// assert!(pi.is_constant());
    /// let result = pi.apply(&Node::primitive("pi"), false, &mut |_| {}).unwrap();
    /// assert_eq!(result.as_primitive(), Some("3.14159"));
    /// ```
    pub fn constant(name: impl Into<String>, template: Node) -> Self {
        Self {
            signature: MacroSignature::new(name, MacroType::Const),
            parameters: ParameterList::default(),
            template: Arc::new(template),
            replacements: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Whether the template contains no parameter references.
    pub fn is_constant(&self) -> bool {
        self.replacements.is_empty() && self.deferred.is_empty()
    }

    /// How well `argument` fits this definition: the number of arguments
    /// supplied beyond the required ones, or `None` if the shape does not
    /// admit it. Types are not considered here.
    pub fn score(&self, argument: &Node) -> Option<usize> {
        match self.signature.kind {
            MacroType::Const => Some(0),
            MacroType::Object => self.keyed_score(argument.as_object()?, 0),
            MacroType::List | MacroType::Operation => {
                self.positional_score(argument.as_list()?.values.len(), 0)
            }
            MacroType::Access => {
                let values = &argument.as_list()?.values;
                (values.len() == 1).then_some(0)
            }
            MacroType::ObjectFn => match call_operand(argument)? {
                None => self.keyed_score(&Object::default(), 1),
                Some(inner) => self.keyed_score(inner.as_object()?, 1),
            },
            MacroType::ListFn | MacroType::OperationFn => match call_operand(argument)? {
                None => self.positional_score(0, 1),
                Some(inner) => self.positional_score(inner.as_list()?.values.len(), 1),
            },
        }
    }

    /// Applies the macro to its invocation node.
    ///
    /// Non-fatal binding problems (unused keys, extra positional arguments)
    /// go to `on_report`. A constant macro returns its template itself unless
    /// `copy_template` asks for a deep copy.
    pub fn apply(
        &self,
        argument: &Node,
        copy_template: bool,
        on_report: &mut dyn FnMut(Report),
    ) -> Result<Arc<Node>, Report> {
        let arguments = self.bind(argument, on_report)?;
        for (param, value) in self.parameters.iter().zip(&arguments) {
            if !param.inferred.matches(value) {
                return Err(err_msg!(
                    Macro,
                    "argument '{}' of {} must be {}, found {}",
                    param.name,
                    self.signature,
                    param.inferred,
                    value.describe()
                ));
            }
        }
        tracing::trace!(signature = %self.signature, "applying macro");

        if self.is_constant() {
            return Ok(if copy_template {
                Arc::new(self.template.deep_copy())
            } else {
                Arc::clone(&self.template)
            });
        }
        let mut result = (*self.template).clone();
        for replacement in &self.replacements {
            let target = result.get_mut(&replacement.path).ok_or_else(|| {
                err_msg!(
                    Internal,
                    "replacement path {} is missing from the template of {}",
                    replacement.path,
                    self.signature
                )
            })?;
            let value = &arguments[replacement.parameter];
            match &replacement.target {
                ReplacementTarget::Value => *target = (**value).clone(),
                ReplacementTarget::NameableName { prefix } => {
                    let name = value.as_primitive().ok_or_else(|| {
                        err_msg!(Macro, "a name must be a primitive, found {}", value.describe())
                    })?;
                    target.set_name(format!("{prefix}{name}"));
                }
            }
        }
        Ok(Arc::new(result))
    }

    // ------------------------------------------------------------------------
    // Argument binding
    // ------------------------------------------------------------------------

    fn bind(&self, argument: &Node, on_report: &mut dyn FnMut(Report)) -> Result<Vec<Arc<Node>>, Report> {
        match self.signature.kind {
            MacroType::Const => Ok(Vec::new()),
            MacroType::Object => {
                let object = self.expect_object(argument)?;
                self.bind_keyed(object, 0, Vec::new(), on_report)
            }
            MacroType::List | MacroType::Operation => {
                let list = argument
                    .as_list()
                    .ok_or_else(|| self.shape_error("a list or operation", argument))?;
                self.bind_positional(&list.values, 0, Vec::new(), on_report)
            }
            MacroType::Access => {
                let values = self.call_values(argument)?;
                match values {
                    [receiver] => Ok(vec![Arc::clone(receiver)]),
                    _ => Err(err_msg!(Macro, "{} takes no arguments", self.signature)),
                }
            }
            MacroType::ObjectFn | MacroType::ListFn | MacroType::OperationFn => {
                let values = self.call_values(argument)?;
                let bound = vec![Arc::clone(&values[0])];
                let empty = Object::default();
                match (self.signature.kind, values.get(1)) {
                    (MacroType::ObjectFn, None) => self.bind_keyed(&empty, 1, bound, on_report),
                    (MacroType::ObjectFn, Some(inner)) => {
                        let object = self.expect_object(inner)?;
                        self.bind_keyed(object, 1, bound, on_report)
                    }
                    (_, None) => self.bind_positional(&[], 1, bound, on_report),
                    (_, Some(inner)) => {
                        let list = inner
                            .as_list()
                            .ok_or_else(|| self.shape_error("a list or operation", inner))?;
                        self.bind_positional(&list.values, 1, bound, on_report)
                    }
                }
            }
        }
    }

    fn bind_keyed(
        &self,
        object: &Object,
        skip: usize,
        mut bound: Vec<Arc<Node>>,
        on_report: &mut dyn FnMut(Report),
    ) -> Result<Vec<Arc<Node>>, Report> {
        for param in self.parameters.iter().skip(skip) {
            match (object.get(&param.name), &param.default) {
                (Some(value), _) => bound.push(Arc::clone(value)),
                (None, Some(default)) => bound.push(Arc::clone(default)),
                (None, None) => {
                    return Err(err_msg!(
                        Macro,
                        "missing required key '{}' for {}",
                        param.name,
                        self.signature
                    ))
                }
            }
        }
        for property in &object.properties {
            let declared = self
                .parameters
                .index_of(&property.key)
                .is_some_and(|index| index >= skip);
            if !declared {
                on_report(
                    err_msg!(Macro, "key '{}' is not a parameter of {}", property.key, self.signature)
                        .warning(),
                );
            }
        }
        Ok(bound)
    }

    fn bind_positional(
        &self,
        values: &[Arc<Node>],
        skip: usize,
        mut bound: Vec<Arc<Node>>,
        on_report: &mut dyn FnMut(Report),
    ) -> Result<Vec<Arc<Node>>, Report> {
        let declared = self.parameters.len() - skip;
        let required = self.required_after(skip);
        if values.len() < required {
            return Err(err_msg!(
                Macro,
                "{} expects at least {} argument(s), found {}",
                self.signature,
                required,
                values.len()
            ));
        }
        if values.len() > declared {
            on_report(
                err_msg!(
                    Macro,
                    "{} takes {} argument(s); {} extra ignored",
                    self.signature,
                    declared,
                    values.len() - declared
                )
                .warning(),
            );
        }
        for (index, param) in self.parameters.iter().skip(skip).enumerate() {
            match (values.get(index), &param.default) {
                (Some(value), _) => bound.push(Arc::clone(value)),
                (None, Some(default)) => bound.push(Arc::clone(default)),
                // Unreachable once the required count is satisfied.
                (None, None) => {
                    return Err(err_msg!(Internal, "unbound parameter '{}'", param.name));
                }
            }
        }
        Ok(bound)
    }

    fn keyed_score(&self, object: &Object, skip: usize) -> Option<usize> {
        let complete = self
            .parameters
            .iter()
            .skip(skip)
            .all(|p| p.is_optional() || object.contains_key(&p.name));
        complete.then(|| object.properties.len().saturating_sub(self.required_after(skip)))
    }

    fn positional_score(&self, supplied: usize, skip: usize) -> Option<usize> {
        supplied.checked_sub(self.required_after(skip))
    }

    fn required_after(&self, skip: usize) -> usize {
        self.parameters
            .iter()
            .skip(skip)
            .filter(|p| !p.is_optional())
            .count()
    }

    fn call_values<'n>(&self, argument: &'n Node) -> Result<&'n [Arc<Node>], Report> {
        let values = argument
            .as_list()
            .map(|l| l.values.as_slice())
            .filter(|v| matches!(v.len(), 1 | 2))
            .ok_or_else(|| self.shape_error("a receiver call", argument))?;
        Ok(values)
    }

    fn expect_object<'n>(&self, argument: &'n Node) -> Result<&'n Object, Report> {
        argument
            .as_object()
            .ok_or_else(|| self.shape_error("an object", argument))
    }

    fn shape_error(&self, expected: &str, found: &Node) -> Report {
        err_msg!(
            Macro,
            "{} expects {} argument, found {}",
            self.signature,
            expected,
            found.describe()
        )
    }
}

impl fmt::Display for MacroDefinition {
    /// The definition header, e.g. `macro pair[a, b = 0]` or `fn len`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.signature.kind;
        let keyword = if kind.is_function() { "fn" } else { "macro" };
        write!(f, "{keyword} {}", self.signature.name)?;
        let (open, close) = match kind {
            MacroType::Const | MacroType::Access => return Ok(()),
            MacroType::Object | MacroType::ObjectFn => ("{", "}"),
            MacroType::List | MacroType::ListFn => ("[", "]"),
            MacroType::Operation | MacroType::OperationFn => ("(", ")"),
        };
        let skip = usize::from(kind.is_function());
        let params: Vec<String> = self.parameters.iter().skip(skip).map(|p| p.to_string()).collect();
        write!(f, "{open}{}{close}", params.join(", "))
    }
}

/// The optional operand of a receiver call: `Some(None)` for `a.f`-style
/// calls without one, `None` if `argument` is not a call at all.
fn call_operand(argument: &Node) -> Option<Option<&Node>> {
    let values = &argument.as_list()?.values;
    match values.len() {
        1 => Some(None),
        2 => Some(Some(&values[1])),
        _ => None,
    }
}

/// Narrows parameter types by usage and warns about unsatisfiable ones.
fn infer_types(
    signature: &MacroSignature,
    parameters: &mut ParameterList,
    replacements: &[Replacement],
    on_report: &mut dyn FnMut(Report),
) {
    let mut narrowed = vec![false; parameters.len()];
    for replacement in replacements {
        if let ReplacementTarget::NameableName { .. } = replacement.target {
            if let Some(param) = parameters.get_mut(replacement.parameter) {
                param.inferred &= TypeFlags::PRIMITIVE;
                narrowed[replacement.parameter] = true;
            }
        }
    }
    for (index, param) in parameters.iter().enumerate() {
        if !narrowed[index] {
            continue;
        }
        if param.inferred.is_empty() {
            on_report(
                err_msg!(
                    Macro,
                    "parameter '{}' of {} is declared {} but used as a name, so no argument can satisfy it",
                    param.name,
                    signature,
                    param.declared
                )
                .warning(),
            );
        }
        if let Some(default) = &param.default {
            if !param.inferred.matches(default) {
                on_report(
                    err_msg!(
                        Macro,
                        "default value of parameter '{}' of {} does not match its inferred type {}",
                        param.name,
                        signature,
                        param.inferred
                    )
                    .warning(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NodeIds, PathElement};
    use crate::diagnostics::Severity;
    use crate::macros::types::Parameter;

    /// Builds `pair[a, b]` style templates: `wrap{first: <a>, second: <b>}`.
    fn pair_macro(kind: MacroType, params: Vec<Parameter>) -> MacroDefinition {
        let mut ids = NodeIds::default();
        let a = ids.next();
        let b = ids.next();
        let template = Node::object(
            "wrap",
            vec![
                ("first".into(), Node::primitive("a").with_id(a)),
                ("second".into(), Node::primitive("b").with_id(b)),
            ],
        );
        let references = HashMap::from([
            (a, Reference { parameter: 0, target: ReplacementTarget::Value }),
            (b, Reference { parameter: 1, target: ReplacementTarget::Value }),
        ]);
        let params = ParameterList::new(params, kind).unwrap();
        MacroDefinition::new(
            MacroSignature::new("pair", kind),
            params,
            template,
            &references,
            &HashMap::new(),
            &mut |_| {},
        )
        .unwrap()
    }

    #[test]
    fn references_become_paths() {
        let def = pair_macro(MacroType::List, vec![Parameter::new("a"), Parameter::new("b")]);
        assert_eq!(def.replacements.len(), 2);
        assert_eq!(def.replacements[1].path.to_string(), ".second");
        assert!(def.template.id().is_none());
    }

    #[test]
    fn positional_application_uses_defaults() {
        let def = pair_macro(
            MacroType::List,
            vec![Parameter::new("a"), Parameter::new("b").with_default(Node::primitive("0"))],
        );
        let call = Node::list("pair", vec![Node::primitive("1")]);
        let result = def.apply(&call, true, &mut |_| {}).unwrap();
        assert_eq!(
            *result,
            Node::object(
                "wrap",
                vec![("first".into(), Node::primitive("1")), ("second".into(), Node::primitive("0"))]
            )
        );
        // The template itself is untouched.
        assert_eq!(def.template.get(&[PathElement::Key("first".into())]), Some(&Node::primitive("a")));
    }

    #[test]
    fn keyed_application_warns_about_unknown_keys() {
        let def = pair_macro(MacroType::Object, vec![Parameter::new("a"), Parameter::new("b")]);
        let call = Node::object(
            "pair",
            vec![
                ("b".into(), Node::primitive("2")),
                ("a".into(), Node::primitive("1")),
                ("c".into(), Node::primitive("3")),
            ],
        );
        let mut reports = Vec::new();
        let result = def.apply(&call, true, &mut |r| reports.push(r)).unwrap();
        assert_eq!(result.get(&[PathElement::Key("second".into())]), Some(&Node::primitive("2")));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].severity, Severity::Warn);

        let missing = Node::object("pair", vec![("a".into(), Node::primitive("1"))]);
        let err = def.apply(&missing, true, &mut |_| {}).unwrap_err();
        assert!(err.message.contains("missing required key 'b'"));
    }

    #[test]
    fn scores_count_excess_arguments() {
        let def = pair_macro(
            MacroType::List,
            vec![Parameter::new("a"), Parameter::new("b").with_default(Node::primitive("0"))],
        );
        assert_eq!(def.score(&Node::list("pair", vec![])), None);
        assert_eq!(def.score(&Node::list("pair", vec![Node::primitive("1")])), Some(0));
        assert_eq!(
            def.score(&Node::list("pair", vec![Node::primitive("1"), Node::primitive("2")])),
            Some(1)
        );
        assert_eq!(def.score(&Node::object("pair", vec![])), None);
    }

    #[test]
    fn name_references_narrow_to_primitive() {
        let mut ids = NodeIds::default();
        let id = ids.next();
        let template = Node::list("n", vec![Node::primitive("x")]).with_id(id);
        let references = HashMap::from([(
            id,
            Reference {
                parameter: 0,
                target: ReplacementTarget::NameableName { prefix: "get_".into() },
            },
        )]);
        let params = ParameterList::new(
            vec![Parameter::new("n").with_type(TypeFlags::NAMEABLE)],
            MacroType::List,
        )
        .unwrap();
        let mut reports = Vec::new();
        let def = MacroDefinition::new(
            MacroSignature::new("named", MacroType::List),
            params,
            template,
            &references,
            &HashMap::new(),
            &mut |r| reports.push(r),
        )
        .unwrap();
        assert!(def.parameters.get(0).unwrap().inferred.is_empty());
        assert_eq!(reports.len(), 1);
        assert!(reports[0].message.contains("no argument can satisfy it"));

        let err = def
            .apply(&Node::list("named", vec![Node::primitive("v")]), true, &mut |_| {})
            .unwrap_err();
        assert!(err.message.contains("argument 'n'"));
    }

    #[test]
    fn renames_use_the_prefix() {
        let mut ids = NodeIds::default();
        let id = ids.next();
        let template = Node::list("n", vec![]).with_id(id);
        let references = HashMap::from([(
            id,
            Reference {
                parameter: 0,
                target: ReplacementTarget::NameableName { prefix: "get_".into() },
            },
        )]);
        let params = ParameterList::new(vec![Parameter::new("n")], MacroType::List).unwrap();
        let def = MacroDefinition::new(
            MacroSignature::new("getter", MacroType::List),
            params,
            template,
            &references,
            &HashMap::new(),
            &mut |_| {},
        )
        .unwrap();
        let result = def
            .apply(&Node::list("getter", vec![Node::primitive("x")]), true, &mut |_| {})
            .unwrap();
        assert_eq!(result.name(), Some("get_x"));
    }

    #[test]
    fn lost_references_are_internal_errors() {
        let mut ids = NodeIds::default();
        let references = HashMap::from([(
            ids.next(),
            Reference { parameter: 0, target: ReplacementTarget::Value },
        )]);
        let params = ParameterList::new(vec![Parameter::new("a")], MacroType::List).unwrap();
        let err = MacroDefinition::new(
            MacroSignature::new("lost", MacroType::List),
            params,
            Node::primitive("a"),
            &references,
            &HashMap::new(),
            &mut |_| {},
        )
        .unwrap_err();
        assert_eq!(err.kind, crate::diagnostics::ErrorType::Internal);
    }

    #[test]
    fn constant_macros_share_or_copy() {
        let def = MacroDefinition::constant("c", Node::list("", vec![Node::primitive("1")]));
        let shared = def.apply(&Node::primitive("c"), false, &mut |_| {}).unwrap();
        assert!(Arc::ptr_eq(&shared, &def.template));
        let copied = def.apply(&Node::primitive("c"), true, &mut |_| {}).unwrap();
        assert!(!Arc::ptr_eq(&copied, &def.template));
        assert_eq!(copied, shared);
    }

    #[test]
    fn display_shows_declared_parameters() {
        let def = pair_macro(
            MacroType::List,
            vec![Parameter::new("a"), Parameter::new("b").with_default(Node::primitive("0"))],
        );
        assert_eq!(def.to_string(), "macro pair[a, b = 0]");
    }
}
