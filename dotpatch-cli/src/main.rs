mod app;
mod commands;
mod output;

use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use crate::app::{Cli, Command};

static CANCELLED: AtomicBool = AtomicBool::new(false);

/// True once Ctrl-C was pressed; long-running commands stop at the next module boundary.
pub fn cancelled() -> bool {
    CANCELLED.load(Ordering::Relaxed)
}

fn main() -> anyhow::Result<()> {
    // first Ctrl-C lets the module being written finish, the second exits at once
    ctrlc::set_handler(|| {
        if CANCELLED.swap(true, Ordering::Relaxed) {
            eprintln!("\nCancelled.");
            std::process::exit(130);
        }
        eprintln!("\nStopping after the current module...");
    })?;

    let cli = Cli::parse();

    // dotpatch info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("dotpatch", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Patch {
            definitions,
            modules,
            support,
            export_marker,
            dry_run,
        } => commands::patch::run(
            &commands::patch::PatchOptions {
                definitions,
                modules,
                support: support.as_deref(),
                export_marker: export_marker.as_deref(),
                dry_run: *dry_run,
            },
            &cli.global,
        ),
        Command::Types {
            path,
            namespace,
            public_only,
        } => commands::types::run(path, namespace.as_deref(), *public_only, &cli.global),
        Command::Methods { path, r#type, group } => {
            commands::methods::run(path, r#type.as_deref(), *group, &cli.global)
        }
    }
}
