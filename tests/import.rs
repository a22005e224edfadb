//! Importing exported support types into target modules.

mod common;

use common::{generic_support_module, support_module, target_module, SEED_DATA};
use dotpatch::prelude::*;

fn count_top_level(module: &Module, namespace: &str, name: &str) -> usize {
    module
        .top_level_types()
        .filter_map(|id| module.type_def(id))
        .filter(|def| def.namespace == namespace && def.name == name)
        .count()
}

#[test]
fn test_exported_types_ignore_bad_markers() -> Result<()> {
    let support = support_module()?;
    let importer = TypeImporter::new(&support);

    let names: Vec<_> = importer
        .exported_types()
        .into_iter()
        .map(|id| support.type_def_full_name(id))
        .collect();
    assert_eq!(names, vec!["NS.Attr", "NS.Companion"]);
    Ok(())
}

#[test]
fn test_import_clones_types_with_members() -> Result<()> {
    let support = support_module()?;
    let mut target = target_module()?;
    let refs_before = target.assembly_refs().count();

    let summary = TypeImporter::new(&support).import_into(&mut target)?;
    assert_eq!(summary.imported, vec!["NS.Attr", "NS.Companion"]);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.cloned_types, 2);

    let attr = target.top_level_type("NS", "Attr").ok_or(Error::Empty)?;
    let companion = target.top_level_type("NS", "Companion").ok_or(Error::Empty)?;

    // cross references point at the clones, not at the support module
    let attr_def = target.type_def(attr).ok_or(Error::Empty)?;
    let field = target.field(attr_def.fields[0]).ok_or(Error::Empty)?;
    assert_eq!(field.signature, TypeSig::Class(TypeDefOrRef::Def(companion)));
    let companion_def = target.type_def(companion).ok_or(Error::Empty)?;
    let field = target.field(companion_def.fields[0]).ok_or(Error::Empty)?;
    assert_eq!(field.signature, TypeSig::Class(TypeDefOrRef::Def(attr)));

    // the base type resolves through the target's own System.Runtime reference
    let base = attr_def.extends.ok_or(Error::Empty)?;
    assert_eq!(target.type_full_name(base), "System.Attribute");
    assert_eq!(target.assembly_refs().count(), refs_before);

    // the constructor body is cloned with its call retargeted
    let ctor = find_method(&target, attr, ".ctor", "System.Void .ctor()").ok_or(Error::Empty)?;
    let body = target
        .method(ctor)
        .and_then(|m| m.body.as_ref())
        .ok_or(Error::Empty)?;
    let Operand::Method(MethodRef::Ref(base_ctor)) = body.instructions[1].operand else {
        panic!("expected a member reference call");
    };
    let base_ctor = target.member_ref(base_ctor).ok_or(Error::Empty)?;
    assert_eq!(base_ctor.name, ".ctor");
    let parent = base_ctor.parent.type_handle().ok_or(Error::Empty)?;
    assert_eq!(target.type_full_name(parent), "System.Attribute");

    // the marker type stays behind
    assert!(target
        .top_level_type("EmbeddedTypes", "ExportEmbeddedTypeAttribute")
        .is_none());
    Ok(())
}

#[test]
fn test_import_twice_keeps_one_copy() -> Result<()> {
    let support = support_module()?;
    let mut target = target_module()?;
    let importer = TypeImporter::new(&support);

    importer.import_into(&mut target)?;
    let bytes = target.to_bytes()?;

    let summary = importer.import_into(&mut target)?;
    assert!(summary.is_empty());
    assert_eq!(summary.skipped, vec!["NS.Attr", "NS.Companion"]);
    assert_eq!(count_top_level(&target, "NS", "Attr"), 1);
    assert_eq!(count_top_level(&target, "NS", "Companion"), 1);
    assert_eq!(target.to_bytes()?, bytes);
    Ok(())
}

#[test]
fn test_import_survives_reload() -> Result<()> {
    let support = support_module()?;
    let mut target = target_module()?;
    TypeImporter::new(&support).import_into(&mut target)?;

    let mut reloaded = Module::from_bytes(&target.to_bytes()?)?;
    let summary = TypeImporter::new(&support).import_into(&mut reloaded)?;
    assert!(summary.is_empty());
    assert_eq!(count_top_level(&reloaded, "NS", "Attr"), 1);
    Ok(())
}

#[test]
fn test_custom_marker_name() -> Result<()> {
    let support = support_module()?;
    let mut target = target_module()?;

    let summary = TypeImporter::new(&support)
        .with_marker("SomeOtherMarkerAttribute")
        .import_into(&mut target)?;
    assert!(summary.is_empty());
    assert!(target.top_level_type("NS", "Attr").is_none());
    Ok(())
}

#[test]
fn test_existing_definition_is_preferred() -> Result<()> {
    let support = support_module()?;
    let mut target = target_module()?;
    let local = TypeDefBuilder::new()
        .namespace("NS")
        .name("Attr")
        .build(&mut target)?;

    let summary = TypeImporter::new(&support).import_into(&mut target)?;
    assert_eq!(summary.imported, vec!["NS.Companion"]);
    assert_eq!(summary.skipped, vec!["NS.Attr"]);

    // the clone's field refers to the type that was already there
    let companion = target.top_level_type("NS", "Companion").ok_or(Error::Empty)?;
    let companion_def = target.type_def(companion).ok_or(Error::Empty)?;
    let field = target.field(companion_def.fields[0]).ok_or(Error::Empty)?;
    assert_eq!(field.signature, TypeSig::Class(TypeDefOrRef::Def(local)));
    assert_eq!(count_top_level(&target, "NS", "Attr"), 1);
    Ok(())
}

#[test]
fn test_import_generic_type_with_interface() -> Result<()> {
    let support = generic_support_module()?;
    let mut target = target_module()?;
    target.set_assembly(Some(AssemblyDef {
        hash_algorithm: 0x8004,
        version: AssemblyVersion::new(1, 0, 0, 0),
        flags: 0,
        public_key: Vec::new(),
        name: "UnityEngine.CoreModule".to_string(),
        culture: String::new(),
    }));
    let unity_object = target.top_level_type("UnityEngine", "Object").ok_or(Error::Empty)?;

    let summary = TypeImporter::new(&support).import_into(&mut target)?;
    assert_eq!(summary.imported, vec!["NS.Holder`1", "NS.IHolder"]);

    let holder = target.top_level_type("NS", "Holder`1").ok_or(Error::Empty)?;
    let interface = target.top_level_type("NS", "IHolder").ok_or(Error::Empty)?;
    assert_eq!(
        target.interfaces_of(holder).collect::<Vec<_>>(),
        vec![TypeDefOrRef::Def(interface)]
    );

    let params = target.generic_params_of(GenericParamOwner::Type(holder));
    assert_eq!(params.len(), 1);
    assert_eq!(target.generic_param(params[0]).ok_or(Error::Empty)?.name, "T");
    let constraints: Vec<_> = target.constraints_of(params[0]).collect();
    assert_eq!(constraints.len(), 1);
    assert_eq!(target.type_full_name(constraints[0]), "System.IDisposable");
    assert_eq!(
        target
            .custom_attributes_of(AttributeParent::GenericParam(params[0]))
            .count(),
        1
    );

    // the manifest name, not the file name, identifies the target assembly
    let holder_def = target.type_def(holder).ok_or(Error::Empty)?;
    let field_named = |name: &str| {
        holder_def
            .fields
            .iter()
            .copied()
            .find(|id| target.field(*id).is_some_and(|field| field.name == name))
    };
    let field = target.field(field_named("target").ok_or(Error::Empty)?).ok_or(Error::Empty)?;
    assert_eq!(field.signature, TypeSig::Class(TypeDefOrRef::Def(unity_object)));
    let value = target.field(field_named("value").ok_or(Error::Empty)?).ok_or(Error::Empty)?;
    assert_eq!(value.signature, TypeSig::Var(0));
    let seed = field_named("Seed").ok_or(Error::Empty)?;
    assert_eq!(target.field_data(seed), Some(&SEED_DATA[..]));

    let property = target.property(holder_def.properties[0]).ok_or(Error::Empty)?;
    assert_eq!(property.name, "Count");
    let getter = target.method(property.semantics[0].method).ok_or(Error::Empty)?;
    assert_eq!((getter.name.as_str(), getter.owner), ("get_Count", holder));
    let event = target.event(holder_def.events[0]).ok_or(Error::Empty)?;
    assert_eq!(event.semantics.len(), 1);
    assert_eq!(
        target.type_full_name(event.event_type.ok_or(Error::Empty)?),
        "System.EventHandler"
    );

    let interface_count = target.type_def(interface).ok_or(Error::Empty)?.methods[0];
    assert_eq!(holder_def.overrides.len(), 1);
    assert_eq!(
        holder_def.overrides[0].declaration,
        MethodRef::Def(interface_count)
    );

    // everything survives a write and reload
    let reloaded = Module::from_bytes(&target.to_bytes()?)?;
    let holder = reloaded.top_level_type("NS", "Holder`1").ok_or(Error::Empty)?;
    let params = reloaded.generic_params_of(GenericParamOwner::Type(holder));
    assert_eq!(params.len(), 1);
    assert_eq!(reloaded.constraints_of(params[0]).count(), 1);
    assert_eq!(reloaded.interfaces_of(holder).count(), 1);
    let holder_def = reloaded.type_def(holder).ok_or(Error::Empty)?;
    assert_eq!(holder_def.properties.len(), 1);
    assert_eq!(holder_def.events.len(), 1);
    assert_eq!(holder_def.overrides.len(), 1);
    let seed = holder_def
        .fields
        .iter()
        .copied()
        .find(|id| reloaded.field(*id).is_some_and(|field| field.name == "Seed"))
        .ok_or(Error::Empty)?;
    assert_eq!(reloaded.field_data(seed), Some(&SEED_DATA[..]));
    Ok(())
}
