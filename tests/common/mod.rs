//! # Among Test Helpers
//!
//! Shared compile-and-inspect helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use among::ast::Node;
use among::{Compilation, CompileOptions, Engine, Report, Severity};

pub fn compile(text: &str) -> Compilation {
    compile_with(CompileOptions::default(), text)
}

pub fn compile_with(options: CompileOptions, text: &str) -> Compilation {
    Engine::new(options).compile_str("test", text)
}

/// Compiles text that must not produce any report.
pub fn compile_clean(text: &str) -> Compilation {
    let compilation = compile(text);
    assert!(
        compilation.reports.is_empty(),
        "unexpected reports:\n{}",
        compilation.render_reports()
    );
    compilation
}

/// Top-level values of the compiled tree.
pub fn values(compilation: &Compilation) -> &[Arc<Node>] {
    &compilation
        .root
        .as_list()
        .expect("the root is always a list")
        .values
}

/// The only top-level value of the compiled tree.
pub fn single(compilation: &Compilation) -> &Node {
    let values = values(compilation);
    assert_eq!(values.len(), 1, "expected one value, got {}", compilation.root);
    &values[0]
}

/// Compact text of every top-level value.
pub fn rendered(compilation: &Compilation) -> Vec<String> {
    values(compilation).iter().map(|v| v.to_string()).collect()
}

pub fn with_severity(compilation: &Compilation, severity: Severity) -> Vec<&Report> {
    compilation
        .reports
        .iter()
        .filter(|r| r.severity == severity)
        .collect()
}

pub fn has_message(compilation: &Compilation, needle: &str) -> bool {
    compilation.reports.iter().any(|r| r.message.contains(needle))
}

pub fn p(value: &str) -> Node {
    Node::primitive(value)
}

pub fn op(name: &str, values: Vec<Node>) -> Node {
    Node::operation(name, values)
}
