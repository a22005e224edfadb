//! Benchmarks for image I/O and the patch operations.
//!
//! All inputs are synthesized: one module with many types whose methods use a type the
//! rewrite benchmark replaces.

extern crate dotpatch;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use dotpatch::prelude::*;
use std::hint::black_box;

const TYPES: usize = 200;
const METHODS_PER_TYPE: usize = 8;

fn op(mnemonic: &str) -> &'static OpCode {
    OpCode::by_mnemonic(mnemonic).unwrap()
}

/// A module with `TYPES` types, each with `METHODS_PER_TYPE` methods casting to
/// `Legacy.Widget`, plus an `Attr` attribute type
fn synthetic_module() -> Module {
    let mut module = Module::new("Synthetic.dll");
    let legacy = AssemblyRefBuilder::new()
        .name("Legacy")
        .build(&mut module)
        .unwrap();
    let widget = module.references().type_ref(
        ResolutionScope::AssemblyRef(legacy),
        "Legacy",
        "Widget",
    );
    let locals = module.push_standalone_sig(StandAloneSig::Locals(vec![
        TypeSig::Class(TypeDefOrRef::Ref(widget)),
        TypeSig::I4,
    ]));

    let attr = TypeDefBuilder::new()
        .namespace("Bench")
        .name("Attr")
        .build(&mut module)
        .unwrap();
    MethodDefBuilder::new()
        .constructor()
        .owner(attr)
        .build(&mut module)
        .unwrap();

    for t in 0..TYPES {
        let owner = TypeDefBuilder::new()
            .namespace("Bench")
            .name(format!("Type{t}"))
            .build(&mut module)
            .unwrap();
        for m in 0..METHODS_PER_TYPE {
            let body = MethodBody::new(vec![
                Instruction::new(op("ldarg.1"), Operand::None),
                Instruction::new(op("castclass"), Operand::Type(TypeDefOrRef::Ref(widget))),
                Instruction::new(op("stloc.0"), Operand::None),
                Instruction::new(op("ldstr"), Operand::String(format!("{t}:{m}"))),
                Instruction::new(op("pop"), Operand::None),
                Instruction::new(op("ret"), Operand::None),
            ])
            .with_locals(locals);
            MethodDefBuilder::new()
                .name(format!("Method{m}"))
                .owner(owner)
                .signature(MethodSig::new_instance(TypeSig::Void, vec![TypeSig::Object]))
                .body(body)
                .build(&mut module)
                .unwrap();
        }
    }
    module
}

fn bench_write_image(c: &mut Criterion) {
    let module = synthetic_module();

    c.bench_function("image_write", |b| {
        b.iter(|| black_box(module.to_bytes().unwrap()));
    });
}

fn bench_read_image(c: &mut Criterion) {
    let bytes = synthetic_module().to_bytes().unwrap();

    c.bench_function("image_read", |b| {
        b.iter(|| black_box(Module::from_bytes(black_box(&bytes)).unwrap()));
    });
}

fn bench_resolve_and_find(c: &mut Criterion) {
    let module = synthetic_module();
    let path = TypePath::new("Bench", format!("Type{}", TYPES - 1));

    c.bench_function("resolve_type_path_and_find_method", |b| {
        b.iter(|| {
            let owner = resolve_type_path(&module, black_box(&path)).unwrap();
            black_box(find_method(
                &module,
                owner,
                "Method7",
                "System.Void Method7(System.Object)",
            ))
        });
    });
}

fn bench_rewrite_body(c: &mut Criterion) {
    let module = synthetic_module();
    let owner = module.top_level_type("Bench", "Type0").unwrap();
    let operation: PatchOperation = ReplaceTypeReferenceInBody {
        method: "Method0".to_string(),
        signature: None,
        target: "Legacy.Widget".to_string(),
        replacement: TypeName::in_assembly("Legacy", "Legacy", "Gadget"),
    }
    .into();

    c.bench_function("rewrite_body", |b| {
        b.iter_batched(
            || module.clone(),
            |mut module| black_box(operation.apply(&mut module, owner)),
            BatchSize::LargeInput,
        );
    });
}

fn bench_add_attributes(c: &mut Criterion) {
    let module = synthetic_module();
    let definitions: Vec<PatchDefinition> = (0..TYPES)
        .map(|t| {
            (0..METHODS_PER_TYPE).fold(
                PatchDefinition::new(TypePath::new("Bench", format!("Type{t}"))),
                |definition, m| {
                    definition.with(AddAttributeOnMethod {
                        method: format!("Method{m}"),
                        signature: format!("System.Void Method{m}(System.Object)"),
                        attribute: TypeName::new("Bench", "Attr"),
                    })
                },
            )
        })
        .collect();
    let session = PatchSession::new(definitions);

    c.bench_function("session_add_attributes", |b| {
        b.iter_batched(
            || module.clone(),
            |mut module| black_box(session.patch_module(&mut module).unwrap()),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_write_image,
    bench_read_image,
    bench_resolve_and_find,
    bench_rewrite_body,
    bench_add_attributes
);
criterion_main!(benches);
