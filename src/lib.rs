//! # Among
//!
//! A compiler front-end for a JSON-like notation. Sources are parsed into a
//! tree of primitives, objects and lists; the grammar can be extended from
//! inside the source with custom operators, and hygienic macro templates
//! rewrite the tree as it is built.
//!
//! ```rust
//! use among::Engine;
//! let out = Engine::default().compile_str("demo", "macro sq(x): (x * x)\nsq(3)");
//! assert!(out.is_success());
//! assert_eq!(out.root.to_string(), "[*(3, 3)]");
//! ```

pub mod ast;
pub mod cli;
pub mod diagnostics;
pub mod engine;
pub mod macros;
pub mod options;
pub mod source;
pub mod syntax;

pub use crate::ast::Node;
pub use crate::diagnostics::{ErrorType, Report, Severity};
pub use crate::engine::{Compilation, Definitions, Engine, ImportResolver, SourceResolver, StaticResolver};
pub use crate::options::{CompileOptions, EscapePolicy};
pub use crate::source::Source;
