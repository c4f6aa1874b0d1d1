//! Dynamically configurable operator and keyword registry.
//!
//! Operators are data, not grammar productions: the tokenizer asks the
//! registry which symbols start with a given character (longest first), and
//! the parser climbs the registry's priority groups from the loosest to the
//! tightest binding level. Both views are rebuilt on every mutation so that
//! lookups during parsing are plain slice reads.

use bitflags::bitflags;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// CORE DATA STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorType {
    Binary,
    Prefix,
    Postfix,
}

impl fmt::Display for OperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperatorType::Binary => "binary",
            OperatorType::Prefix => "prefix",
            OperatorType::Postfix => "postfix",
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct OperatorFlags: u8 {
        const RIGHT_ASSOCIATIVE = 1;
        /// `a <op> b` desugars into a call instead of a binary operation.
        const ACCESSOR = 1 << 1;
    }
}

/// Default priorities; a lower value binds looser.
pub mod priority {
    pub const ASSIGN: f64 = 100.0;
    pub const LOGICAL_OR: f64 = 200.0;
    pub const LOGICAL_AND: f64 = 300.0;
    pub const EQUALITY: f64 = 400.0;
    pub const COMPARISON: f64 = 500.0;
    pub const BITWISE: f64 = 600.0;
    pub const ADD: f64 = 700.0;
    pub const MULTIPLY: f64 = 800.0;
    pub const POWER: f64 = 900.0;
    pub const CUSTOM_BINARY: f64 = 1000.0;
    pub const CUSTOM_POSTFIX: f64 = 1100.0;
    pub const PREFIX: f64 = 1200.0;
    pub const ACCESSOR: f64 = 1300.0;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorDefinition {
    pub name: String,
    pub keyword: bool,
    pub kind: OperatorType,
    /// Name of the resulting node; for accessors, the prefix of the call name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub flags: OperatorFlags,
    pub priority: f64,
}

impl OperatorDefinition {
    pub fn new(name: impl Into<String>, kind: OperatorType, priority: f64) -> Self {
        Self {
            name: name.into(),
            keyword: false,
            kind,
            alias: None,
            flags: OperatorFlags::empty(),
            priority: normalize(priority),
        }
    }

    pub fn keyword(name: impl Into<String>, kind: OperatorType, priority: f64) -> Self {
        Self {
            keyword: true,
            ..Self::new(name, kind, priority)
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_flags(mut self, flags: OperatorFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn is_right_associative(&self) -> bool {
        self.flags.contains(OperatorFlags::RIGHT_ASSOCIATIVE)
    }

    pub fn is_accessor(&self) -> bool {
        self.flags.contains(OperatorFlags::ACCESSOR)
    }

    /// The name given to nodes built by this operator.
    pub fn node_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    fn same_symbol(&self, other: &OperatorDefinition) -> bool {
        self.name == other.name && self.keyword == other.keyword && self.kind == other.kind
    }
}

impl PartialEq for OperatorDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.same_symbol(other)
            && self.alias == other.alias
            && self.flags == other.flags
            && self.priority == other.priority
    }
}

impl fmt::Display for OperatorDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = if self.keyword { "keyword" } else { "operator" };
        write!(f, "{keyword} {} as {}({})", self.name, self.kind, self.priority)?;
        if self.is_right_associative() {
            f.write_str(" and right-associative")?;
        }
        if self.is_accessor() {
            f.write_str(" and accessor")?;
        }
        if let Some(alias) = &self.alias {
            write!(f, " : \"{alias}\"")?;
        }
        Ok(())
    }
}

/// Every operator sharing one priority value, the unit of precedence climbing.
#[derive(Debug, Clone)]
pub struct PriorityGroup {
    pub priority: f64,
    pub kind: OperatorType,
    pub right_associative: bool,
    pub operators: Vec<OperatorDefinition>,
}

impl PriorityGroup {
    pub fn find(&self, name: &str, keyword: bool) -> Option<&OperatorDefinition> {
        self.operators
            .iter()
            .find(|op| op.name == name && op.keyword == keyword)
    }
}

/// Why a registration was rejected. The caller picks the severity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperatorConflict {
    #[error("'{name}' is already registered as {existing}")]
    KeywordOperatorClash { name: String, existing: &'static str },
    #[error("{kind} '{name}' is already defined")]
    Duplicate { name: String, kind: OperatorType },
    #[error("'{name}' cannot be both a binary and a postfix operator")]
    BinaryPostfixAmbiguity { name: String },
    #[error("priority {priority} is already used by {existing} operators")]
    PriorityTypeClash { priority: f64, existing: OperatorType },
    #[error("priority {priority} already holds {existing} binary operators")]
    MixedAssociativity { priority: f64, existing: &'static str },
    #[error("priority {priority} is not a finite number")]
    InvalidPriority { priority: f64 },
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    definitions: Vec<OperatorDefinition>,
    operators_by_char: HashMap<char, Vec<String>>,
    keywords_by_char: HashMap<char, Vec<String>>,
    groups: Arc<Vec<PriorityGroup>>,
}

static DEFAULT_OPERATORS: Lazy<Vec<OperatorDefinition>> = Lazy::new(|| {
    use OperatorType::*;
    let right = OperatorFlags::RIGHT_ASSOCIATIVE;
    let mut ops = vec![OperatorDefinition::new("=", Binary, priority::ASSIGN).with_flags(right)];
    ops.push(OperatorDefinition::new("||", Binary, priority::LOGICAL_OR));
    ops.push(OperatorDefinition::new("&&", Binary, priority::LOGICAL_AND));
    for name in ["==", "!="] {
        ops.push(OperatorDefinition::new(name, Binary, priority::EQUALITY));
    }
    for name in ["<", ">", "<=", ">="] {
        ops.push(OperatorDefinition::new(name, Binary, priority::COMPARISON));
    }
    for name in ["&", "|", "^", "<<", ">>"] {
        ops.push(OperatorDefinition::new(name, Binary, priority::BITWISE));
    }
    for name in ["+", "-"] {
        ops.push(OperatorDefinition::new(name, Binary, priority::ADD));
    }
    for name in ["*", "/", "%"] {
        ops.push(OperatorDefinition::new(name, Binary, priority::MULTIPLY));
    }
    ops.push(OperatorDefinition::new("**", Binary, priority::POWER).with_flags(right));
    for name in ["!", "-", "~"] {
        ops.push(OperatorDefinition::new(name, Prefix, priority::PREFIX));
    }
    ops.push(
        OperatorDefinition::new(".", Binary, priority::ACCESSOR)
            .with_flags(OperatorFlags::ACCESSOR)
            .with_alias(""),
    );
    ops
});

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the default operator set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use among::syntax::operators::{OperatorRegistry, OperatorType};
    /// let registry = OperatorRegistry::with_defaults();
    /// assert_eq!(registry.operators_starting_with('*'), ["**", "*"]);
    /// assert!(registry.get("+", false, OperatorType::Binary).is_some());
    /// ```
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            definitions: DEFAULT_OPERATORS.clone(),
            ..Self::default()
        };
        registry.rebuild();
        registry
    }

    pub fn add(&mut self, definition: OperatorDefinition) -> Result<(), OperatorConflict> {
        self.check(&definition)?;
        tracing::debug!(operator = %definition, "registered operator");
        self.definitions.push(definition);
        self.rebuild();
        Ok(())
    }

    /// Removes every definition of `name` with the given keyword-ness.
    pub fn remove(&mut self, name: &str, keyword: bool) -> Vec<OperatorDefinition> {
        let (removed, kept) = std::mem::take(&mut self.definitions)
            .into_iter()
            .partition(|op| op.name == name && op.keyword == keyword);
        self.definitions = kept;
        self.rebuild();
        removed
    }

    /// Removes one exact definition, as contributed by an import.
    pub fn remove_definition(&mut self, definition: &OperatorDefinition) -> bool {
        let before = self.definitions.len();
        self.definitions.retain(|op| op != definition);
        let removed = self.definitions.len() != before;
        if removed {
            self.rebuild();
        }
        removed
    }

    /// Copies every definition of `other`, collecting the ones that conflict
    /// instead of stopping at the first.
    pub fn copy_from(&mut self, other: &OperatorRegistry) -> Vec<OperatorConflict> {
        let mut conflicts = Vec::new();
        for op in &other.definitions {
            if self.definitions.contains(op) {
                continue;
            }
            match self.check(op) {
                Ok(()) => self.definitions.push(op.clone()),
                Err(conflict) => conflicts.push(conflict),
            }
        }
        self.rebuild();
        conflicts
    }

    pub fn get(&self, name: &str, keyword: bool, kind: OperatorType) -> Option<&OperatorDefinition> {
        self.definitions
            .iter()
            .find(|op| op.name == name && op.keyword == keyword && op.kind == kind)
    }

    pub fn contains(&self, name: &str, keyword: bool) -> bool {
        self.definitions
            .iter()
            .any(|op| op.name == name && op.keyword == keyword)
    }

    /// Operator symbols starting with `c`, longest first.
    pub fn operators_starting_with(&self, c: char) -> &[String] {
        self.operators_by_char.get(&c).map_or(&[], Vec::as_slice)
    }

    /// Keywords starting with `c`, longest first.
    pub fn keywords_starting_with(&self, c: char) -> &[String] {
        self.keywords_by_char.get(&c).map_or(&[], Vec::as_slice)
    }

    /// Priority groups sorted from the loosest to the tightest binding.
    pub fn priority_groups(&self) -> Arc<Vec<PriorityGroup>> {
        Arc::clone(&self.groups)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OperatorDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    // ------------------------------------------------------------------------
    // Invariants
    // ------------------------------------------------------------------------

    fn check(&self, def: &OperatorDefinition) -> Result<(), OperatorConflict> {
        if !def.priority.is_finite() {
            return Err(OperatorConflict::InvalidPriority {
                priority: def.priority,
            });
        }
        for op in self.definitions.iter().filter(|op| op.name == def.name) {
            if op.keyword != def.keyword {
                return Err(OperatorConflict::KeywordOperatorClash {
                    name: def.name.clone(),
                    existing: if op.keyword { "a keyword" } else { "an operator" },
                });
            }
            if op.kind == def.kind {
                return Err(OperatorConflict::Duplicate {
                    name: def.name.clone(),
                    kind: def.kind,
                });
            }
            let kinds = [op.kind, def.kind];
            if kinds.contains(&OperatorType::Binary) && kinds.contains(&OperatorType::Postfix) {
                return Err(OperatorConflict::BinaryPostfixAmbiguity {
                    name: def.name.clone(),
                });
            }
        }
        let priority = normalize(def.priority);
        for op in self.definitions.iter().filter(|op| op.priority == priority) {
            if op.kind != def.kind {
                return Err(OperatorConflict::PriorityTypeClash {
                    priority,
                    existing: op.kind,
                });
            }
            if def.kind == OperatorType::Binary && op.is_right_associative() != def.is_right_associative() {
                return Err(OperatorConflict::MixedAssociativity {
                    priority,
                    existing: if op.is_right_associative() {
                        "right-associative"
                    } else {
                        "left-associative"
                    },
                });
            }
        }
        Ok(())
    }

    fn rebuild(&mut self) {
        self.operators_by_char.clear();
        self.keywords_by_char.clear();
        for op in &self.definitions {
            let Some(first) = op.name.chars().next() else {
                continue;
            };
            let index = if op.keyword {
                &mut self.keywords_by_char
            } else {
                &mut self.operators_by_char
            };
            let names = index.entry(first).or_default();
            if !names.contains(&op.name) {
                names.push(op.name.clone());
            }
        }
        for names in self
            .operators_by_char
            .values_mut()
            .chain(self.keywords_by_char.values_mut())
        {
            names.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then_with(|| a.cmp(b)));
        }

        let mut groups: Vec<PriorityGroup> = Vec::new();
        for op in &self.definitions {
            match groups.iter_mut().find(|g| g.priority == op.priority) {
                Some(group) => group.operators.push(op.clone()),
                None => groups.push(PriorityGroup {
                    priority: op.priority,
                    kind: op.kind,
                    right_associative: op.is_right_associative(),
                    operators: vec![op.clone()],
                }),
            }
        }
        groups.sort_by(|a, b| a.priority.partial_cmp(&b.priority).unwrap_or(Ordering::Equal));
        self.groups = Arc::new(groups);
    }
}

/// Priorities compare exactly; only the sign of zero is canonicalized.
fn normalize(priority: f64) -> f64 {
    if priority == 0.0 {
        0.0
    } else {
        priority
    }
}

impl Serialize for OperatorRegistry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.definitions)
    }
}
