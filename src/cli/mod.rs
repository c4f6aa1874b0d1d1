//! The Among command-line interface.
//!
//! Entry point for the `among` binary: parses arguments, loads compile
//! options, compiles the requested file and prints the outcome.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::cli::args::{AmongArgs, Command};
use crate::engine::{Compilation, Engine, ResolveError, SourceResolver};
use crate::options::CompileOptions;
use crate::source::Source;

pub mod args;
pub mod output;

/// Environment variable holding the log filter, e.g. `AMONG_LOG=debug`.
pub const LOG_ENV: &str = "AMONG_LOG";

/// Failures that stop the CLI before or after compiling.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config '{path}': {message}")]
    Config { path: PathBuf, message: String },
    #[error("cannot write JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The main entry point for the CLI.
pub fn run() {
    init_logging();
    let args = AmongArgs::parse();
    match execute(&args) {
        Ok(code) => process::exit(code),
        Err(err) => {
            output::print_failure(&err.to_string());
            process::exit(2);
        }
    }
}

/// Runs one command and returns the process exit code: 0 on success, 1 if
/// the file has errors.
pub fn execute(args: &AmongArgs) -> Result<i32, CliError> {
    let options = match &args.config {
        Some(path) => load_options(path)?,
        None => CompileOptions::default(),
    };
    let compilation = compile_file(args.command.file(), options)?;
    output::print_reports(&compilation, args.plain);

    match &args.command {
        Command::Check { .. } => output::print_summary(&compilation),
        Command::Tree { json: true, .. } => output::print_json(&compilation.root)?,
        Command::Tree { .. } => output::print_tree(&compilation),
        Command::Defs { json: true, .. } => output::print_json(&*compilation.definitions)?,
        Command::Defs { .. } => output::print_definitions(&compilation.definitions),
    }
    Ok(if compilation.is_success() { 0 } else { 1 })
}

/// Compiles `path`, resolving imports relative to its directory.
pub fn compile_file(path: &Path, options: CompileOptions) -> Result<Compilation, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let engine = Engine::new(options);
    let resolver = SourceResolver::new(engine.clone(), move |import: &str| load_import(&base, import));
    Ok(engine.compile(Source::new(path.display().to_string(), text), &resolver))
}

/// Reads compile options from JSON or YAML.
pub fn load_options(path: &Path) -> Result<CompileOptions, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let parsed = if yaml {
        serde_yaml::from_str(&text).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&text).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| CliError::Config {
        path: path.to_path_buf(),
        message,
    })
}

fn load_import(base: &Path, import: &str) -> Result<Source, ResolveError> {
    let mut file = base.join(import);
    if file.extension().is_none() {
        file.set_extension("among");
    }
    tracing::debug!(import, file = %file.display(), "loading import");
    let text = fs::read_to_string(&file).map_err(|e| ResolveError::Io {
        path: import.to_string(),
        message: e.to_string(),
    })?;
    Ok(Source::new(file.display().to_string(), text))
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::EscapePolicy;
    use std::io::Write;

    #[test]
    fn options_load_from_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("among.yaml");
        fs::write(&yaml, "copy-constant-macros: false\ninvalid-unicode-escape: warn\n").unwrap();
        let options = load_options(&yaml).unwrap();
        assert!(!options.copy_constant_macros);
        assert_eq!(options.invalid_unicode_escape, EscapePolicy::Warn);
        assert!(options.collapse_unary_operation);

        let json = dir.path().join("among.json");
        let mut file = fs::File::create(&json).unwrap();
        write!(file, r#"{{"default-operators": false}}"#).unwrap();
        assert!(!load_options(&json).unwrap().default_operators);
    }

    #[test]
    fn bad_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("among.json");
        fs::write(&json, "{not json").unwrap();
        assert!(matches!(load_options(&json), Err(CliError::Config { .. })));
    }

    #[test]
    fn imports_resolve_next_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lib.among"), "macro greeting: hello").unwrap();
        let main = dir.path().join("main.among");
        fs::write(&main, "use lib\n[greeting]").unwrap();
        let compilation = compile_file(&main, CompileOptions::default()).unwrap();
        assert!(compilation.is_success(), "{}", compilation.render_reports());
        assert_eq!(compilation.root.to_string(), "[[hello]]");
    }
}
