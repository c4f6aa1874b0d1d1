//! Compilation entry points and import resolution.
//!
//! An [`Engine`] turns one [`Source`] into a [`Compilation`]: the expanded
//! tree, the definitions the source exports, and every report. Imports are
//! delegated to an [`ImportResolver`]; the engine never touches the file
//! system itself.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::ast::Node;
use crate::diagnostics::{panic_message, Report, Severity};
use crate::err_msg;
use crate::macros::MacroRegistry;
use crate::options::CompileOptions;
use crate::source::Source;
use crate::syntax::operators::OperatorRegistry;
use crate::syntax::parser;

// ============================================================================
// DEFINITIONS
// ============================================================================

/// The macros and operators one source makes available.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Definitions {
    pub macros: MacroRegistry,
    pub operators: OperatorRegistry,
}

impl Definitions {
    /// Copies everything from `other`. Conflicts are returned, the rest of
    /// the copy still happens.
    pub fn copy_from(&mut self, other: &Definitions) -> Vec<Report> {
        let mut conflicts = self.macros.copy_from(&other.macros);
        conflicts.extend(
            self.operators
                .copy_from(&other.operators)
                .into_iter()
                .map(|conflict| err_msg!(Registration, "{}", conflict)),
        );
        conflicts
    }

    /// Removes every definition `other` contributed. Returns how many were
    /// removed.
    pub fn remove_all(&mut self, other: &Definitions) -> usize {
        let macros = other
            .macros
            .iter()
            .filter(|d| self.macros.remove_definition(d))
            .count();
        let operators = other
            .operators
            .iter()
            .filter(|d| self.operators.remove_definition(d))
            .count();
        macros + operators
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty() && self.operators.is_empty()
    }
}

// ============================================================================
// IMPORT RESOLUTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("nothing is known under '{0}'")]
    NotFound(String),
    #[error("'{0}' imports itself")]
    Cycle(String),
    #[error("'{path}' has {errors} error(s)")]
    Failed { path: String, errors: usize },
    #[error("cannot read '{path}': {message}")]
    Io { path: String, message: String },
}

/// Maps an import path to the definitions it exports.
pub trait ImportResolver {
    fn resolve(&self, path: &str) -> Result<Arc<Definitions>, ResolveError>;
}

/// Resolves imports from a fixed in-memory table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Arc<Definitions>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, definitions: Definitions) -> Arc<Definitions> {
        let definitions = Arc::new(definitions);
        self.entries.insert(path.into(), Arc::clone(&definitions));
        definitions
    }
}

impl ImportResolver for StaticResolver {
    fn resolve(&self, path: &str) -> Result<Arc<Definitions>, ResolveError> {
        self.entries
            .get(path)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(path.to_string()))
    }
}

/// Compiles imported sources on demand.
///
/// `loader` maps an import path to its source. Each path is compiled once
/// and cached, so importing the same path twice yields the same definitions
/// and `undef use` can find them again. A path that is still being compiled
/// when it is imported again is a cycle.
pub struct SourceResolver<F> {
    engine: Engine,
    loader: F,
    cache: RefCell<HashMap<String, Arc<Definitions>>>,
    active: RefCell<Vec<String>>,
}

impl<F> SourceResolver<F>
where
    F: Fn(&str) -> Result<Source, ResolveError>,
{
    pub fn new(engine: Engine, loader: F) -> Self {
        Self {
            engine,
            loader,
            cache: RefCell::new(HashMap::new()),
            active: RefCell::new(Vec::new()),
        }
    }
}

impl<F> ImportResolver for SourceResolver<F>
where
    F: Fn(&str) -> Result<Source, ResolveError>,
{
    fn resolve(&self, path: &str) -> Result<Arc<Definitions>, ResolveError> {
        if let Some(found) = self.cache.borrow().get(path) {
            return Ok(Arc::clone(found));
        }
        if self.active.borrow().iter().any(|p| p == path) {
            return Err(ResolveError::Cycle(path.to_string()));
        }
        let source = (self.loader)(path)?;
        self.active.borrow_mut().push(path.to_string());
        let compilation = self.engine.compile(source, self);
        self.active.borrow_mut().retain(|p| p != path);

        let errors = compilation.error_count();
        if errors > 0 {
            return Err(ResolveError::Failed {
                path: path.to_string(),
                errors,
            });
        }
        self.cache
            .borrow_mut()
            .insert(path.to_string(), Arc::clone(&compilation.definitions));
        Ok(compilation.definitions)
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// The result of compiling one source.
#[derive(Debug, Serialize)]
pub struct Compilation {
    #[serde(skip)]
    pub source: Source,
    pub root: Node,
    pub definitions: Arc<Definitions>,
    pub reports: Vec<Report>,
}

impl Compilation {
    pub fn is_success(&self) -> bool {
        self.error_count() == 0
    }

    pub fn error_count(&self) -> usize {
        self.reports.iter().filter(|r| r.is_error()).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Report> {
        self.reports.iter().filter(|r| r.is_error())
    }

    /// Every report rendered against the compiled source.
    pub fn render_reports(&self) -> String {
        self.reports
            .iter()
            .map(|r| r.render(&self.source))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    options: CompileOptions,
}

impl Engine {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Compiles `source`, resolving its imports through `resolver`.
    ///
    /// Never fails: problems are reported in [`Compilation::reports`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use among::engine::{Engine, StaticResolver};
    /// use among::source::Source;
    /// let engine = Engine::default();
    /// let out = engine.compile(Source::new("demo", "macro pi: 3.14\n[pi, (1 + 2)]"), &StaticResolver::new());
    /// assert!(out.is_success());
    /// assert_eq!(out.root.to_string(), "[[3.14, +(1, 2)]]");
    /// ```
    pub fn compile(&self, source: Source, resolver: &dyn ImportResolver) -> Compilation {
        tracing::info!(source = source.name(), "compiling");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            parser::parse(&source, &self.options, resolver)
        }));
        let compilation = match outcome {
            Ok(output) => Compilation {
                source,
                root: output.root,
                definitions: Arc::new(output.definitions),
                reports: output.reports,
            },
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                Compilation {
                    source,
                    root: Node::list("", Vec::new()),
                    definitions: Arc::new(Definitions::default()),
                    reports: vec![err_msg!(Internal, "internal compiler error: {}", detail)],
                }
            }
        };
        tracing::info!(
            source = compilation.source.name(),
            errors = compilation.error_count(),
            warnings = compilation
                .reports
                .iter()
                .filter(|r| r.severity == Severity::Warn)
                .count(),
            "compiled"
        );
        compilation
    }

    /// Compiles text that has no imports to resolve.
    pub fn compile_str(&self, name: &str, text: &str) -> Compilation {
        self.compile(Source::new(name, text), &StaticResolver::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(files: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Result<Source, ResolveError> {
        move |path| {
            files
                .iter()
                .find(|(name, _)| *name == path)
                .map(|(name, text)| Source::new(*name, *text))
                .ok_or_else(|| ResolveError::NotFound(path.to_string()))
        }
    }

    #[test]
    fn source_resolver_compiles_and_caches() {
        let resolver = SourceResolver::new(Engine::default(), loader(&[("lib", "macro two: 2")]));
        let first = resolver.resolve("lib").unwrap();
        let second = resolver.resolve("lib").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.macros.len(), 1);
    }

    #[test]
    fn import_cycles_are_refused() {
        let resolver = SourceResolver::new(Engine::default(), loader(&[("a", "use b"), ("b", "use a")]));
        let err = resolver.resolve("a").unwrap_err();
        assert!(matches!(err, ResolveError::Failed { .. }));
    }

    #[test]
    fn definitions_copy_and_remove() {
        let engine = Engine::default();
        let lib = engine.compile_str("lib", "macro one: 1\noperator <> as binary");
        let mut target = Definitions::default();
        assert!(target.copy_from(&lib.definitions).is_empty());
        assert_eq!(target.remove_all(&lib.definitions), 2);
        assert!(target.is_empty());
    }
}
