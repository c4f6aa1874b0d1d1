//! Macro registry: storage, overload groups and resolution.
//!
//! Definitions are grouped by [`MacroSignature`] (name plus invocation shape).
//! A group may hold several overloads that differ in their parameter lists;
//! [`MacroRegistry::resolve`] picks the one that fits an invocation best.
//!
//! # Thread Safety
//! Not thread-safe. Registries handed out as compiled definitions are
//! snapshots and are copied, never shared mutably, on import.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ast::Node;
use crate::diagnostics::Report;
use crate::err_msg;
use crate::macros::definition::MacroDefinition;
use crate::macros::types::{MacroSignature, MacroType};

#[derive(Debug, Clone, Default)]
pub struct MacroRegistry {
    groups: BTreeMap<MacroSignature, Vec<Arc<MacroDefinition>>>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition. An overload with the same parameter list as an
    /// existing one is a duplicate and is rejected.
    pub fn add(&mut self, definition: Arc<MacroDefinition>) -> Result<(), Report> {
        let group = self.groups.entry(definition.signature.clone()).or_default();
        if let Some(existing) = group
            .iter()
            .find(|d| d.parameters == definition.parameters)
        {
            return Err(err_msg!(Registration, "{} is already defined", existing));
        }
        tracing::debug!(definition = %definition, "registered macro");
        group.push(definition);
        Ok(())
    }

    /// Removes every definition named `name` whose type is in `kinds`.
    /// Returns how many were removed.
    pub fn remove(&mut self, name: &str, kinds: &[MacroType]) -> usize {
        let mut removed = 0;
        for kind in kinds {
            let signature = MacroSignature::new(name, *kind);
            if let Some(group) = self.groups.remove(&signature) {
                removed += group.len();
            }
        }
        if removed > 0 {
            tracing::debug!(name, removed, "undefined macros");
        }
        removed
    }

    /// Removes one exact definition, as contributed by an import.
    pub fn remove_definition(&mut self, definition: &Arc<MacroDefinition>) -> bool {
        let Some(group) = self.groups.get_mut(&definition.signature) else {
            return false;
        };
        let before = group.len();
        group.retain(|d| !Arc::ptr_eq(d, definition));
        let removed = group.len() != before;
        if group.is_empty() {
            self.groups.remove(&definition.signature);
        }
        removed
    }

    /// Copies every definition of `other`, returning a report for each one
    /// that clashes with an existing definition.
    pub fn copy_from(&mut self, other: &MacroRegistry) -> Vec<Report> {
        let mut conflicts = Vec::new();
        for definition in other.iter() {
            let already = self
                .groups
                .get(&definition.signature)
                .is_some_and(|g| g.iter().any(|d| Arc::ptr_eq(d, definition)));
            if already {
                continue;
            }
            if let Err(report) = self.add(Arc::clone(definition)) {
                conflicts.push(report);
            }
        }
        conflicts
    }

    pub fn get(&self, signature: &MacroSignature) -> Option<&[Arc<MacroDefinition>]> {
        self.groups.get(signature).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str, kind: MacroType) -> bool {
        self.groups.contains_key(&MacroSignature::new(name, kind))
    }

    /// Picks the overload of `(name, kind)` that fits `argument` best.
    ///
    /// Returns `Ok(None)` when no macro with that signature exists. When the
    /// signature exists but no overload admits the argument, or several fit
    /// equally well, the error lists the candidates.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use among::ast::Node;
    /// use among::macros::{MacroDefinition, MacroRegistry, MacroType};
    /// use std::sync::Arc;
    /// let mut registry = MacroRegistry::new();
    /// registry.add(Arc::new(MacroDefinition::constant("pi", Node::primitive("3.14")))).unwrap();
    /// let found = registry.resolve("pi", MacroType::Const, &Node::primitive("pi")).unwrap();
    /// assert!(found.is_some());
    /// assert!(registry.resolve("tau", MacroType::Const, &Node::primitive("tau")).unwrap().is_none());
    /// ```
    pub fn resolve(
        &self,
        name: &str,
        kind: MacroType,
        argument: &Node,
    ) -> Result<Option<Arc<MacroDefinition>>, Report> {
        let Some(group) = self.groups.get(&MacroSignature::new(name, kind)) else {
            return Ok(None);
        };
        let scored: Vec<(usize, &Arc<MacroDefinition>)> = group
            .iter()
            .filter_map(|d| d.score(argument).map(|score| (score, d)))
            .collect();
        let Some(best) = scored.iter().map(|(score, _)| *score).min() else {
            let mut report = err_msg!(Macro, "wrong usage of '{}'", name);
            for definition in self.named(name) {
                report = report.hint(format!("declared as {definition}"));
            }
            return Err(report);
        };
        let winners: Vec<&Arc<MacroDefinition>> = scored
            .iter()
            .filter(|(score, _)| *score == best)
            .map(|(_, d)| *d)
            .collect();
        if let [winner] = winners.as_slice() {
            return Ok(Some(Arc::clone(winner)));
        }
        let mut report = err_msg!(Macro, "ambiguous invocation of '{}'", name);
        for definition in winners {
            report = report.hint(format!("candidate: {definition}"));
        }
        Err(report)
    }

    /// Every definition named `name`, across all invocation shapes.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Arc<MacroDefinition>> + 'a {
        self.groups
            .iter()
            .filter(move |(signature, _)| signature.name == name)
            .flat_map(|(_, group)| group.iter())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<MacroDefinition>> {
        self.groups.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Serialize for MacroRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NodeId, NodeIds};
    use crate::macros::definition::{Reference, ReplacementTarget};
    use crate::macros::types::{Parameter, ParameterList};
    use std::collections::HashMap;

    fn list_macro(name: &str, params: Vec<Parameter>) -> Arc<MacroDefinition> {
        let mut ids = NodeIds::default();
        let id: NodeId = ids.next();
        let references = HashMap::from([(id, Reference { parameter: 0, target: ReplacementTarget::Value })]);
        let params = ParameterList::new(params, MacroType::List).unwrap();
        Arc::new(
            MacroDefinition::new(
                MacroSignature::new(name, MacroType::List),
                params,
                Node::primitive("first").with_id(id),
                &references,
                &HashMap::new(),
                &mut |_| {},
            )
            .unwrap(),
        )
    }

    fn call(n: usize) -> Node {
        Node::list("f", (0..n).map(|i| Node::primitive(i.to_string())).collect())
    }

    #[test]
    fn identical_parameter_lists_are_duplicates() {
        let mut registry = MacroRegistry::new();
        registry.add(list_macro("f", vec![Parameter::new("a")])).unwrap();
        let err = registry.add(list_macro("f", vec![Parameter::new("a")])).unwrap_err();
        assert!(err.message.contains("already defined"));
        registry.add(list_macro("f", vec![Parameter::new("b")])).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn lowest_excess_wins() {
        let mut registry = MacroRegistry::new();
        registry.add(list_macro("f", vec![Parameter::new("a")])).unwrap();
        registry
            .add(list_macro("f", vec![Parameter::new("a"), Parameter::new("b")]))
            .unwrap();
        let one = registry.resolve("f", MacroType::List, &call(1)).unwrap().unwrap();
        assert_eq!(one.parameters.len(), 1);
        let two = registry.resolve("f", MacroType::List, &call(2)).unwrap().unwrap();
        assert_eq!(two.parameters.len(), 2);
    }

    #[test]
    fn ties_are_ambiguous() {
        let mut registry = MacroRegistry::new();
        registry.add(list_macro("f", vec![Parameter::new("a")])).unwrap();
        registry.add(list_macro("f", vec![Parameter::new("b")])).unwrap();
        let err = registry.resolve("f", MacroType::List, &call(1)).unwrap_err();
        assert!(err.message.contains("ambiguous"));
        assert_eq!(err.hints, vec!["candidate: macro f[a]", "candidate: macro f[b]"]);
    }

    #[test]
    fn no_admissible_overload_is_wrong_usage() {
        let mut registry = MacroRegistry::new();
        registry
            .add(list_macro("f", vec![Parameter::new("a"), Parameter::new("b")]))
            .unwrap();
        let err = registry.resolve("f", MacroType::List, &call(1)).unwrap_err();
        assert!(err.message.contains("wrong usage of 'f'"));
        assert_eq!(err.hints, vec!["declared as macro f[a, b]"]);
    }

    #[test]
    fn remove_and_copy() {
        let mut registry = MacroRegistry::new();
        let def = list_macro("f", vec![Parameter::new("a")]);
        registry.add(Arc::clone(&def)).unwrap();
        let mut other = MacroRegistry::new();
        assert!(other.copy_from(&registry).is_empty());
        assert!(other.copy_from(&registry).is_empty());
        assert!(other.remove_definition(&def));
        assert!(other.is_empty());
        assert_eq!(registry.remove("f", &[MacroType::List, MacroType::Object]), 1);
        assert!(!registry.contains("f", MacroType::List));
    }
}
