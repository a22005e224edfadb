use std::path::{Path, PathBuf};

use anyhow::Context;
use dotpatch::patch::{
    load_definitions, BatchReport, OperationStatus, PatchConfig, PatchSession,
};

use crate::{
    app::GlobalOptions,
    commands::common::{collect_modules, load_module},
    output::{print_output, Align, TabWriter},
};

pub struct PatchOptions<'a> {
    pub definitions: &'a Path,
    pub modules: &'a [PathBuf],
    pub support: Option<&'a Path>,
    pub export_marker: Option<&'a str>,
    pub dry_run: bool,
}

pub fn run(options: &PatchOptions<'_>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let definitions = load_definitions(options.definitions).with_context(|| {
        format!(
            "failed to load patch definitions: {}",
            options.definitions.display()
        )
    })?;
    let support = options.support.map(load_module).transpose()?;
    let modules = collect_modules(options.modules)?;

    let mut config = PatchConfig::default().dry_run(options.dry_run);
    if let Some(marker) = options.export_marker {
        config = config.export_marker(marker);
    }

    let mut session = PatchSession::new(definitions).with_config(config);
    if let Some(support) = &support {
        session = session.with_support(support);
    }

    let mut report = BatchReport::default();
    for module in &modules {
        if crate::cancelled() {
            anyhow::bail!(
                "cancelled after {} of {} module(s)",
                report.modules.len(),
                modules.len()
            );
        }
        let module_report = session
            .patch_file(module)
            .with_context(|| format!("failed to patch {}", module.display()))?;
        report.modules.push(module_report);
    }

    print_output(&report, opts, |report| {
        for module in &report.modules {
            let state = if module.skipped {
                "already patched"
            } else if module.written {
                "written"
            } else if module.is_patched() {
                "changed, not written"
            } else {
                "unchanged"
            };
            println!("\n{} ({state}):", module.path.display());

            for imported in &module.imported {
                println!("  imported {imported}");
            }

            let mut tw = TabWriter::new(&[
                ("Type", Align::Left),
                ("Operation", Align::Left),
                ("Method", Align::Left),
                ("Status", Align::Left),
                ("Changes", Align::Right),
            ])
            .indent("  ");
            let mut rows = 0;
            for definition in module.definitions.iter().filter(|d| d.resolved) {
                for operation in &definition.operations {
                    let status = match (&operation.status, &operation.error) {
                        (OperationStatus::Failed, Some(error)) => format!("failed: {error}"),
                        (OperationStatus::Failed, None) => "failed".to_string(),
                        (OperationStatus::Applied, _) => "applied".to_string(),
                        (OperationStatus::Unchanged, _) => "unchanged".to_string(),
                    };
                    tw.row(vec![
                        definition.path.clone(),
                        operation.operation.clone(),
                        operation.method.clone(),
                        status,
                        operation.changes.to_string(),
                    ]);
                    rows += 1;
                }
            }
            if rows > 0 {
                tw.print();
            }
        }

        println!(
            "\n{} module(s) processed, {} written, {} failed operation(s).",
            report.modules.len(),
            report.written(),
            report.failure_count()
        );
    })
}
