use std::{collections::BTreeMap, path::Path};

use dotpatch::metadata::flags::MethodAttributes;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_module,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct MethodEntry {
    token: String,
    access: String,
    declaring_type: String,
    name: String,
    /// Signature text as matched by patch definitions
    signature: String,
    has_body: bool,
}

#[derive(Debug, Serialize)]
struct TypeGroup {
    declaring_type: String,
    methods: Vec<MethodEntry>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MethodsOutput {
    Flat {
        methods: Vec<MethodEntry>,
        count: usize,
    },
    Grouped {
        groups: Vec<TypeGroup>,
        count: usize,
    },
}

fn access(flags: MethodAttributes) -> &'static str {
    match flags.bits() & 0x7 {
        0x1 => "private",
        0x2 => "famandassem",
        0x3 => "assembly",
        0x4 => "family",
        0x5 => "famorassem",
        0x6 => "public",
        _ => "compilercontrolled",
    }
}

pub fn run(
    path: &Path,
    type_filter: Option<&str>,
    group: bool,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let module = load_module(path)?;
    let filter = type_filter.map(str::to_lowercase);

    let mut entries = Vec::new();
    for (id, method) in module.methods() {
        let declaring_type = module.type_def_full_name(method.owner);
        if let Some(filter) = &filter {
            if !declaring_type.to_lowercase().contains(filter) {
                continue;
            }
        }

        entries.push(MethodEntry {
            token: id.token().to_string(),
            access: access(method.flags).to_string(),
            declaring_type,
            name: method.name.clone(),
            signature: module.signature_text(&method.name, &method.signature),
            has_body: method.body.is_some(),
        });
    }
    let count = entries.len();

    if group {
        let mut grouped: BTreeMap<String, Vec<MethodEntry>> = BTreeMap::new();
        for entry in entries {
            grouped
                .entry(entry.declaring_type.clone())
                .or_default()
                .push(entry);
        }
        let groups = grouped
            .into_iter()
            .map(|(declaring_type, methods)| TypeGroup {
                declaring_type,
                methods,
            })
            .collect();

        print_output(&MethodsOutput::Grouped { groups, count }, opts, |out| {
            if let MethodsOutput::Grouped { groups, count } = out {
                for group in groups {
                    println!(
                        "\n{} ({} methods):",
                        group.declaring_type,
                        group.methods.len()
                    );
                    let mut tw = TabWriter::new(&[
                        ("Token", Align::Left),
                        ("Access", Align::Left),
                        ("Signature", Align::Left),
                    ])
                    .indent("  ");
                    for e in &group.methods {
                        tw.row(vec![e.token.clone(), e.access.clone(), e.signature.clone()]);
                    }
                    tw.print();
                }
                println!("\n{count} method(s) listed.");
            }
        })
    } else {
        print_output(
            &MethodsOutput::Flat {
                methods: entries,
                count,
            },
            opts,
            |out| {
                if let MethodsOutput::Flat { methods, count } = out {
                    let mut tw = TabWriter::new(&[
                        ("Token", Align::Left),
                        ("Access", Align::Left),
                        ("Type", Align::Left),
                        ("Signature", Align::Left),
                    ]);
                    for e in methods {
                        tw.row(vec![
                            e.token.clone(),
                            e.access.clone(),
                            e.declaring_type.clone(),
                            e.signature.clone(),
                        ]);
                    }
                    tw.print();
                    println!("\n{count} method(s) listed.");
                }
            },
        )
    }
}
