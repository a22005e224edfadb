//! End-to-end batch patching: definitions from JSON, a support module, files on disk.

mod common;

use common::{support_module, target_module, write_image, DEFINITIONS, OLD_SYNTAX_USES};
use dotpatch::prelude::*;
use dotpatch::patch::OperationStatus;

const REPLACEMENT: &str = "Microsoft.CodeAnalysis.CSharp.Syntax.BaseNamespaceDeclarationSyntax";

fn method_named(module: &Module, owner: TypeDefId, name: &str) -> Option<MethodId> {
    find_method_by_name(module, owner, name)
}

#[test]
fn test_batch_patches_module_on_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = write_image(dir.path(), "UnityEngine.dll", &target_module()?)?;
    let support = support_module()?;

    let mut session = PatchSession::new(definitions_from_json(DEFINITIONS)?).with_support(&support);
    let report = session.run([&target])?;

    assert_eq!(report.modules.len(), 1);
    let module_report = &report.modules[0];
    assert!(module_report.written);
    assert_eq!(module_report.imported, vec!["NS.Attr", "NS.Companion"]);
    assert_eq!(module_report.failure_count(), 1);
    assert_eq!(module_report.changes(), 2 + 1 + 1 + OLD_SYNTAX_USES);

    let object_report = &module_report.definitions[0];
    assert!(object_report.resolved);
    let statuses: Vec<_> = object_report
        .operations
        .iter()
        .map(|op| (op.status, op.changes))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (OperationStatus::Applied, 1),
            (OperationStatus::Applied, 1),
            (OperationStatus::Failed, 0)
        ]
    );
    assert!(object_report.operations[2].error.is_some());

    let nested_report = &module_report.definitions[1];
    assert_eq!(nested_report.operations[0].changes, OLD_SYNTAX_USES);
    assert!(!module_report.definitions[2].resolved);

    // Reload and check the file contents
    let module = Module::from_file(&target)?;
    let object = module
        .top_level_type("UnityEngine", "Object")
        .ok_or(Error::Empty)?;
    let attr = module.top_level_type("NS", "Attr").ok_or(Error::Empty)?;

    let foo = method_named(&module, object, "Foo").ok_or(Error::Empty)?;
    assert!(module.has_custom_attribute(AttributeParent::Method(foo), "NS", "Attr"));
    let attribute = module
        .custom_attributes_of(AttributeParent::Method(foo))
        .next()
        .ok_or(Error::Empty)?;
    assert_eq!(module.attribute_type(attribute), Some(TypeDefOrRef::Def(attr)));

    let bar = method_named(&module, object, "Bar").ok_or(Error::Empty)?;
    assert!(!module.has_custom_attribute(AttributeParent::Method(bar), "NS", "Attr"));
    let label = find_parameter(&module, bar, "label").ok_or(Error::Empty)?;
    let value = find_parameter(&module, bar, "value").ok_or(Error::Empty)?;
    assert!(module.has_custom_attribute(AttributeParent::Param(label), "NS", "Attr"));
    assert!(!module.has_custom_attribute(AttributeParent::Param(value), "NS", "Attr"));

    Ok(())
}

#[test]
fn test_body_rewrite_survives_reload() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = write_image(dir.path(), "UnityEngine.dll", &target_module()?)?;

    let mut session = PatchSession::new(definitions_from_json(DEFINITIONS)?);
    session.patch_file(&target)?;

    let module = Module::from_file(&target)?;
    let nested = resolve_type_path(&module, &TypePath::new("UnityEngine", "Object").nested("Nested"))
        .ok_or(Error::Empty)?;
    let method = method_named(&module, nested, "GetTypeInformation").ok_or(Error::Empty)?;
    let body = module
        .method(method)
        .and_then(|m| m.body.as_ref())
        .ok_or(Error::Empty)?;

    let mut seen = 0;
    for instruction in &body.instructions {
        match &instruction.operand {
            Operand::Type(handle) | Operand::Token(TokenRef::Type(handle)) => {
                assert_eq!(module.type_full_name(*handle), REPLACEMENT);
                seen += 1;
            }
            Operand::Method(MethodRef::Ref(member)) => {
                let member = module.member_ref(*member).ok_or(Error::Empty)?;
                assert_eq!(member.name, "get_Name");
                let parent = member.parent.type_handle().ok_or(Error::Empty)?;
                assert_eq!(module.type_full_name(parent), REPLACEMENT);
                seen += 1;
            }
            _ => {}
        }
    }
    assert_eq!(seen, 4);

    // branch displacement and instruction count are untouched
    assert_eq!(body.instructions.len(), 12);
    assert_eq!(body.instructions[2].operand, Operand::Branch(20));

    let locals = body.local_sig.and_then(|sig| module.standalone_sig(sig));
    let Some(StandAloneSig::Locals(locals)) = locals else {
        panic!("locals signature missing");
    };
    assert_eq!(locals.len(), 3);
    assert_eq!(locals[1], TypeSig::I4);
    for index in [0, 2] {
        let TypeSig::Class(handle) = &locals[index] else {
            panic!("local {index} is not a class");
        };
        assert_eq!(module.type_full_name(*handle), REPLACEMENT);
    }

    Ok(())
}

#[test]
fn test_second_run_changes_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = write_image(dir.path(), "UnityEngine.dll", &target_module()?)?;
    let support = support_module()?;
    let definitions = definitions_from_json(DEFINITIONS)?;

    PatchSession::new(definitions.clone())
        .with_support(&support)
        .patch_file(&target)?;
    let after_first = std::fs::read(&target)?;

    let report = PatchSession::new(definitions)
        .with_support(&support)
        .patch_file(&target)?;
    assert!(!report.written);
    assert!(report.imported.is_empty());
    assert_eq!(report.changes(), 0);
    // the mismatched signature still fails, everything else is already in place
    assert_eq!(report.failure_count(), 1);
    for operation in report.definitions.iter().flat_map(|d| &d.operations) {
        assert_ne!(operation.status, OperationStatus::Applied);
    }

    assert_eq!(std::fs::read(&target)?, after_first);
    Ok(())
}

#[test]
fn test_output_is_deterministic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let support = support_module()?;
    let first = write_image(dir.path(), "First.dll", &target_module()?)?;
    let second = write_image(dir.path(), "Second.dll", &target_module()?)?;

    for path in [&first, &second] {
        PatchSession::new(definitions_from_json(DEFINITIONS)?)
            .with_support(&support)
            .patch_file(path)?;
    }

    assert_eq!(std::fs::read(&first)?, std::fs::read(&second)?);
    Ok(())
}

#[test]
fn test_unmatched_module_is_not_written() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut unrelated = Module::new("Unrelated.dll");
    TypeDefBuilder::new()
        .namespace("Other")
        .name("Thing")
        .build(&mut unrelated)?;
    let path = write_image(dir.path(), "Unrelated.dll", &unrelated)?;
    let before = std::fs::read(&path)?;
    let support = support_module()?;

    let report = PatchSession::new(definitions_from_json(DEFINITIONS)?)
        .with_support(&support)
        .patch_file(&path)?;

    // support types are only imported into modules that some definition applies to
    assert!(report.imported.is_empty());
    assert!(!report.written);
    assert!(report.definitions.iter().all(|d| !d.resolved));
    assert_eq!(std::fs::read(&path)?, before);
    Ok(())
}

#[test]
fn test_same_file_twice_in_one_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = write_image(dir.path(), "UnityEngine.dll", &target_module()?)?;
    let support = support_module()?;

    let report = PatchSession::new(definitions_from_json(DEFINITIONS)?)
        .with_support(&support)
        .run([&target, &target])?;

    assert!(report.modules[0].written);
    assert!(report.modules[1].skipped);
    assert_eq!(report.written(), 1);
    Ok(())
}

#[test]
fn test_missing_file_stops_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = write_image(dir.path(), "UnityEngine.dll", &target_module()?)?;
    let missing = dir.path().join("Missing.dll");

    let mut session = PatchSession::new(definitions_from_json(DEFINITIONS)?);
    assert!(session.run([&target, &missing]).is_err());

    // the module before the failure stays patched
    let module = Module::from_file(&target)?;
    let nested = resolve_type_path(&module, &TypePath::new("UnityEngine", "Object").nested("Nested"))
        .ok_or(Error::Empty)?;
    let method = method_named(&module, nested, "GetTypeInformation").ok_or(Error::Empty)?;
    assert!(TypeReferenceRewriter::new(common::OLD_SYNTAX)
        .plan(&module, method)
        .is_empty());
    Ok(())
}

#[test]
fn test_invalid_definitions_are_rejected() {
    let unknown_operation = r#"[{ "path": ["A", "B"], "patches": [{ "$type": "Rename" }] }]"#;
    assert!(matches!(
        definitions_from_json(unknown_operation),
        Err(Error::Json(_))
    ));

    let short_path = r#"[{ "path": ["A"], "patches": [] }]"#;
    assert!(definitions_from_json(short_path).is_err());
}
