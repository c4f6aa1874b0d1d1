//! Command-line arguments for the `among` binary.
//!
//! Declared with `clap`'s derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "among",
    version,
    about = "Compile Among sources: extensible operators and hygienic macro templates."
)]
pub struct AmongArgs {
    /// Compile options as JSON, or YAML when the file ends in .yaml/.yml.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Render diagnostics as plain text instead of annotated snippets.
    #[arg(long, global = true)]
    pub plain: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compile a file and report every diagnostic.
    Check {
        #[arg(required = true)]
        file: PathBuf,
    },
    /// Print the expanded tree of a file.
    Tree {
        #[arg(required = true)]
        file: PathBuf,
        /// Print the tree as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List the macros and operators a file exports.
    Defs {
        #[arg(required = true)]
        file: PathBuf,
        /// Print the definitions as JSON.
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    pub fn file(&self) -> &PathBuf {
        match self {
            Command::Check { file } | Command::Tree { file, .. } | Command::Defs { file, .. } => file,
        }
    }
}
