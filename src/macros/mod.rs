//! # Among Macro System
//!
//! Macros are hygienic templates: a definition names the parameters its
//! template refers to, and an application substitutes arguments into a copy
//! of that template. Nothing is evaluated; a macro only rewrites the tree.
//!
//! ## Core Principles
//!
//! - **Shape-keyed**: a macro is looked up by its name and by the shape of the
//!   node that invokes it (`pi`, `point{..}`, `vec[..]`, `max(..)`, or a
//!   receiver call such as `list.len`).
//! - **Paths, not identity**: references found in a template are recorded as
//!   [`NodePath`](crate::ast::NodePath)s once, then replayed on every
//!   application.
//! - **Overloads**: definitions sharing a signature are ranked by how many
//!   arguments they leave unused; ties are errors.
//!
//! ## Module Layout
//!
//! - [`types`]: node shape flags, macro kinds, signatures and parameters
//! - [`definition`]: template finalization, binding and application
//! - [`registry`]: storage and overload resolution

pub mod definition;
pub mod registry;
pub mod types;

pub use definition::{DeferredInvocation, MacroDefinition, Reference, Replacement, ReplacementTarget};
pub use registry::MacroRegistry;
pub use types::{
    MacroSignature, MacroType, Parameter, ParameterList, TypeFlags, MAX_MACRO_RECURSION_DEPTH,
};
