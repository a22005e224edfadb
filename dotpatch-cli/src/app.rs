use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// dotpatch - in-place patching of .NET metadata modules
#[derive(Debug, Parser)]
#[command(name = "dotpatch", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply a JSON file of patch definitions to module files, rewriting them in place.
    Patch {
        /// JSON array of patch definitions.
        #[arg(short, long, value_name = "JSON")]
        definitions: PathBuf,

        /// Module files, or directories searched recursively for .dll/.exe files.
        #[arg(value_name = "MODULE", required = true)]
        modules: Vec<PathBuf>,

        /// Support module whose exported types are imported where missing.
        #[arg(short, long, value_name = "FILE")]
        support: Option<PathBuf>,

        /// Name of the module attribute marking exported support types.
        #[arg(long, value_name = "NAME")]
        export_marker: Option<String>,

        /// Patch in memory and report, without writing any file.
        #[arg(long)]
        dry_run: bool,
    },

    /// List type definitions, to author definition paths.
    Types {
        /// Path to the module file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Filter by namespace.
        #[arg(long)]
        namespace: Option<String>,

        /// Show only public types.
        #[arg(long)]
        public_only: bool,
    },

    /// List methods with the signature text patch definitions match against.
    Methods {
        /// Path to the module file.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Filter by declaring type name (substring, case-insensitive).
        #[arg(long, value_name = "NAME")]
        r#type: Option<String>,

        /// Group methods by declaring type.
        #[arg(long)]
        group: bool,
    },
}
