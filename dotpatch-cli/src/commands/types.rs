use std::path::Path;

use dotpatch::metadata::flags::TypeAttributes;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_module,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct TypeEntry {
    token: String,
    visibility: String,
    name: String,
    /// The `path` array a patch definition uses for this type
    path: Vec<Option<String>>,
}

#[derive(Debug, Serialize)]
struct TypesOutput {
    types: Vec<TypeEntry>,
    count: usize,
}

fn visibility(flags: TypeAttributes) -> &'static str {
    match flags.bits() & 0x7 {
        0x1 | 0x2 => "public",
        0x3 => "private",
        0x4 => "family",
        0x5 => "assembly",
        _ => "internal",
    }
}

fn is_public(flags: TypeAttributes) -> bool {
    matches!(flags.bits() & 0x7, 0x1 | 0x2)
}

pub fn run(
    path: &Path,
    namespace: Option<&str>,
    public_only: bool,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let module = load_module(path)?;

    let mut entries = Vec::new();
    for (id, type_def) in module.type_defs() {
        if public_only && !is_public(type_def.flags) {
            continue;
        }

        let top_level = module.top_level_of(id);
        let top = module.type_def(top_level);
        if let (Some(ns), Some(top)) = (namespace, top) {
            if top.namespace != ns {
                continue;
            }
        }

        // namespace and name of the top-level type, then nested names outermost first
        let mut nested = Vec::new();
        let mut current = id;
        while current != top_level {
            let Some(def) = module.type_def(current) else {
                break;
            };
            nested.push(Some(def.name.clone()));
            match def.enclosing {
                Some(enclosing) => current = enclosing,
                None => break,
            }
        }
        nested.reverse();
        let mut type_path = match top {
            Some(top) => vec![
                (!top.namespace.is_empty()).then(|| top.namespace.clone()),
                Some(top.name.clone()),
            ],
            None => Vec::new(),
        };
        type_path.extend(nested);

        entries.push(TypeEntry {
            token: id.token().to_string(),
            visibility: visibility(type_def.flags).to_string(),
            name: module.type_def_full_name(id),
            path: type_path,
        });
    }

    let count = entries.len();
    let output = TypesOutput {
        types: entries,
        count,
    };

    print_output(&output, opts, |out| {
        let mut tw = TabWriter::new(&[
            ("Token", Align::Left),
            ("Vis", Align::Left),
            ("Name", Align::Left),
        ]);
        for e in &out.types {
            tw.row(vec![e.token.clone(), e.visibility.clone(), e.name.clone()]);
        }
        tw.print();
        println!("\n{} type(s) listed.", out.count);
    })
}
