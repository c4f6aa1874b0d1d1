//! # Among Syntax
//!
//! Text to tree: the mode-sensitive [`tokenizer`], the extensible
//! [`operators`] table and the [`parser`] that drives both and hands
//! completed nodes to the macro registry.

pub mod operators;
pub mod parser;
pub mod token;
pub mod tokenizer;

pub use operators::{OperatorDefinition, OperatorFlags, OperatorRegistry, OperatorType, PriorityGroup};
pub use parser::{parse, ParseOutput};
pub use token::{Token, TokenKind, TokenizationMode};
pub use tokenizer::Tokenizer;
