//! User-facing output for the CLI.
//!
//! Diagnostics go to stderr, results to stdout. Colors follow the terminal.

use std::io::Write;

use serde::Serialize;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::diagnostics::Severity;
use crate::engine::{Compilation, Definitions};

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// Prints every report of `compilation` to stderr.
///
/// `plain` selects the compact text renderer; otherwise reports are drawn by
/// miette with annotated source snippets.
pub fn print_reports(compilation: &Compilation, plain: bool) {
    for report in &compilation.reports {
        if plain {
            eprintln!("{}", report.render(&compilation.source));
        } else {
            let diagnostic = miette::Report::new(report.clone().with_source(&compilation.source));
            eprintln!("{diagnostic:?}");
        }
    }
}

/// One colored line: the file name and how many errors and warnings it has.
pub fn print_summary(compilation: &Compilation) {
    let errors = compilation.error_count();
    let warnings = compilation
        .reports
        .iter()
        .filter(|r| r.severity == Severity::Warn)
        .count();
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let (color, label) = if errors > 0 {
        (Color::Red, "failed")
    } else {
        (Color::Green, "ok")
    };
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true));
    let _ = write!(stderr, "{label}");
    let _ = stderr.reset();
    let _ = writeln!(
        stderr,
        ": {} ({} error{}, {} warning{})",
        compilation.source.name(),
        errors,
        plural(errors),
        warnings,
        plural(warnings)
    );
}

/// Prints a failure that happened before anything could be compiled.
pub fn print_failure(message: &str) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
    let _ = write!(stderr, "error");
    let _ = stderr.reset();
    let _ = writeln!(stderr, ": {message}");
}

// ============================================================================
// RESULTS
// ============================================================================

pub fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    let text = serde_json::to_string_pretty(value)?;
    println!("{text}");
    Ok(())
}

/// Prints one line per top-level value of the tree.
pub fn print_tree(compilation: &Compilation) {
    if let Some(root) = compilation.root.as_list() {
        for value in &root.values {
            println!("{value}");
        }
    }
}

/// Prints exported macros, then exported operators, with section headers.
pub fn print_definitions(definitions: &Definitions) {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    header(&mut stdout, "macros");
    for definition in definitions.macros.iter() {
        let _ = writeln!(stdout, "  {definition}");
    }
    header(&mut stdout, "operators");
    for operator in definitions.operators.iter() {
        let _ = writeln!(stdout, "  {operator}");
    }
}

// ============================================================================
// PRIVATE HELPERS
// ============================================================================

fn header(stdout: &mut StandardStream, title: &str) {
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true));
    let _ = writeln!(stdout, "{title}:");
    let _ = stdout.reset();
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
