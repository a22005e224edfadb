//! Shared fixtures for the integration tests.
//!
//! Modules are built in memory with the builders and written into temporary directories, so
//! the tests need no checked-in binaries.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use dotpatch::{
    metadata::attributes::encode_type_argument,
    prelude::*,
};

/// Full name of the type the body rewrite targets
pub const OLD_SYNTAX: &str = "Microsoft.CodeAnalysis.CSharp.Syntax.NamespaceDeclarationSyntax";

/// Number of places `GetTypeInformation` uses [`OLD_SYNTAX`]: two locals, `isinst`,
/// `castclass`, the `callvirt` of a member of it and `ldtoken`
pub const OLD_SYNTAX_USES: usize = 6;

pub fn op(mnemonic: &str) -> &'static OpCode {
    OpCode::by_mnemonic(mnemonic).unwrap_or_else(|| panic!("unknown opcode {mnemonic}"))
}

/// The module to patch.
///
/// - `UnityEngine.Object` with `void Foo()`, `void Bar(int value, string label)` and
///   `void Update()` whose body does not mention the rewrite target
/// - `UnityEngine.Object+Nested+Inner`
/// - `UnityEngine.Object+Nested` with `static void GetTypeInformation(object)`, a branching
///   body that uses [`OLD_SYNTAX`] [`OLD_SYNTAX_USES`] times
pub fn target_module() -> Result<Module> {
    let mut module = Module::new("UnityEngine.dll");
    AssemblyRefBuilder::new()
        .name("System.Runtime")
        .version(AssemblyVersion::new(8, 0, 0, 0))
        .public_key_token([0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a])
        .build(&mut module)?;
    let csharp = AssemblyRefBuilder::new()
        .name("Microsoft.CodeAnalysis.CSharp")
        .version(AssemblyVersion::new(4, 8, 0, 0))
        .build(&mut module)?;

    let object = TypeDefBuilder::new()
        .namespace("UnityEngine")
        .name("Object")
        .flags(TypeAttributes::PUBLIC)
        .build(&mut module)?;
    let nested = TypeDefBuilder::new()
        .name("Nested")
        .flags(TypeAttributes::NESTED_PUBLIC)
        .nested_in(object)
        .build(&mut module)?;
    TypeDefBuilder::new()
        .name("Inner")
        .flags(TypeAttributes::NESTED_PUBLIC)
        .nested_in(nested)
        .build(&mut module)?;

    MethodDefBuilder::new()
        .name("Foo")
        .owner(object)
        .build(&mut module)?;
    let bar = MethodDefBuilder::new()
        .name("Bar")
        .owner(object)
        .signature(MethodSig::new_instance(
            TypeSig::Void,
            vec![TypeSig::I4, TypeSig::String],
        ))
        .build(&mut module)?;
    ParamBuilder::new().name("value").owner(bar).build(&mut module)?;
    ParamBuilder::new().name("label").owner(bar).build(&mut module)?;
    MethodDefBuilder::new()
        .name("Update")
        .owner(object)
        .body(MethodBody::new(vec![
            Instruction::new(op("ldstr"), Operand::String("tick".into())),
            Instruction::new(op("pop"), Operand::None),
            Instruction::new(op("ret"), Operand::None),
        ]))
        .build(&mut module)?;

    let old = module.references().type_ref(
        ResolutionScope::AssemblyRef(csharp),
        "Microsoft.CodeAnalysis.CSharp.Syntax",
        "NamespaceDeclarationSyntax",
    );
    let get_name = module.references().member_ref(
        TypeDefOrRef::Ref(old),
        "get_Name",
        MemberSig::Method(MethodSig::new_instance(TypeSig::String, Vec::new())),
    );
    let locals = module.push_standalone_sig(StandAloneSig::Locals(vec![
        TypeSig::Class(TypeDefOrRef::Ref(old)),
        TypeSig::I4,
        TypeSig::Class(TypeDefOrRef::Ref(old)),
    ]));

    // offsets: 0 ldarg.0, 1 isinst, 6 brfalse.s, 8 ldarg.0, 9 castclass, 14 stloc.0,
    // 15 ldloc.0, 16 callvirt, 21 pop, 22 ldtoken, 27 pop, 28 ret
    let body = MethodBody::new(vec![
        Instruction::new(op("ldarg.0"), Operand::None),
        Instruction::new(op("isinst"), Operand::Type(TypeDefOrRef::Ref(old))),
        Instruction::new(op("brfalse.s"), Operand::Branch(20)),
        Instruction::new(op("ldarg.0"), Operand::None),
        Instruction::new(op("castclass"), Operand::Type(TypeDefOrRef::Ref(old))),
        Instruction::new(op("stloc.0"), Operand::None),
        Instruction::new(op("ldloc.0"), Operand::None),
        Instruction::new(op("callvirt"), Operand::Method(MethodRef::Ref(get_name))),
        Instruction::new(op("pop"), Operand::None),
        Instruction::new(
            op("ldtoken"),
            Operand::Token(TokenRef::Type(TypeDefOrRef::Ref(old))),
        ),
        Instruction::new(op("pop"), Operand::None),
        Instruction::new(op("ret"), Operand::None),
    ])
    .with_locals(locals);

    MethodDefBuilder::new()
        .name("GetTypeInformation")
        .owner(nested)
        .flags(MethodAttributes::PUBLIC | MethodAttributes::STATIC | MethodAttributes::HIDE_BY_SIG)
        .signature(MethodSig::new_static(TypeSig::Void, vec![TypeSig::Object]))
        .body(body)
        .build(&mut module)?;

    Ok(module)
}

/// The support module, exporting `NS.Attr` and `NS.Companion`.
///
/// Both types reference each other through a field. `NS.Attr` derives from
/// `System.Attribute` and has a parameterless constructor calling the base constructor.
/// Besides the two valid export markers the module carries one naming a type it does not
/// define and one whose value cannot be decoded.
pub fn support_module() -> Result<Module> {
    let mut module = Module::new("EmbeddedTypes.dll");
    let corlib = AssemblyRefBuilder::new()
        .name("System.Runtime")
        .version(AssemblyVersion::new(8, 0, 0, 0))
        .public_key_token([0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a])
        .build(&mut module)?;
    let attribute = module.references().type_ref(
        ResolutionScope::AssemblyRef(corlib),
        "System",
        "Attribute",
    );
    let system_type = module.references().type_ref(
        ResolutionScope::AssemblyRef(corlib),
        "System",
        "Type",
    );
    let attribute_ctor = module.references().member_ref(
        TypeDefOrRef::Ref(attribute),
        ".ctor",
        MemberSig::Method(MethodSig::parameterless_constructor()),
    );

    let attr = TypeDefBuilder::new()
        .namespace("NS")
        .name("Attr")
        .flags(TypeAttributes::PUBLIC | TypeAttributes::SEALED)
        .extends(TypeDefOrRef::Ref(attribute))
        .build(&mut module)?;
    let companion = TypeDefBuilder::new()
        .namespace("NS")
        .name("Companion")
        .flags(TypeAttributes::PUBLIC)
        .build(&mut module)?;

    FieldBuilder::new()
        .name("companion")
        .owner(attr)
        .signature(TypeSig::Class(TypeDefOrRef::Def(companion)))
        .build(&mut module)?;
    FieldBuilder::new()
        .name("attr")
        .owner(companion)
        .signature(TypeSig::Class(TypeDefOrRef::Def(attr)))
        .build(&mut module)?;

    MethodDefBuilder::new()
        .constructor()
        .owner(attr)
        .body(MethodBody::new(vec![
            Instruction::new(op("ldarg.0"), Operand::None),
            Instruction::new(op("call"), Operand::Method(MethodRef::Ref(attribute_ctor))),
            Instruction::new(op("ret"), Operand::None),
        ]))
        .build(&mut module)?;

    let marker_ctor = export_marker(&mut module, attribute, system_type)?;
    for value in [
        encode_type_argument("NS.Attr"),
        encode_type_argument("NS.Companion, EmbeddedTypes, Version=1.0.0.0"),
        encode_type_argument("NS.DoesNotExist"),
        vec![0x02, 0x00],
    ] {
        module.add_custom_attribute(
            AttributeParent::Module,
            AttributeConstructor::Def(marker_ctor),
            value,
        );
    }

    Ok(module)
}

/// Define `EmbeddedTypes.ExportEmbeddedTypeAttribute` and return its constructor
fn export_marker(module: &mut Module, attribute: TypeRefId, system_type: TypeRefId) -> Result<MethodId> {
    let marker = TypeDefBuilder::new()
        .namespace("EmbeddedTypes")
        .name("ExportEmbeddedTypeAttribute")
        .extends(TypeDefOrRef::Ref(attribute))
        .build(module)?;
    MethodDefBuilder::new()
        .name(".ctor")
        .owner(marker)
        .flags(
            MethodAttributes::PUBLIC
                | MethodAttributes::HIDE_BY_SIG
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME,
        )
        .signature(MethodSig::new_instance(
            TypeSig::Void,
            vec![TypeSig::Class(TypeDefOrRef::Ref(system_type))],
        ))
        .build(module)
}

/// Data of the mapped static field `NS.Holder`1::Seed`
pub const SEED_DATA: [u8; 4] = [7, 0, 0, 0];

/// A support module exporting only the generic `NS.Holder`1`.
///
/// - `T` is constrained to `System.IDisposable` and carries a custom attribute
/// - `Holder`1` implements the support-local interface `NS.IHolder`, overriding
///   `IHolder.get_Count` with its own `get_Count`
/// - fields: `value` of type `T`, `target` of type `UnityEngine.Object` referenced through
///   the `UnityEngine.CoreModule` assembly, and the static `Seed` with [`SEED_DATA`]
/// - a `Count` property and an `Emptied` event with their accessors
pub fn generic_support_module() -> Result<Module> {
    let mut module = Module::new("EmbeddedTypes.dll");
    let corlib = AssemblyRefBuilder::new()
        .name("System.Runtime")
        .version(AssemblyVersion::new(8, 0, 0, 0))
        .public_key_token([0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a])
        .build(&mut module)?;
    let core_module = AssemblyRefBuilder::new()
        .name("UnityEngine.CoreModule")
        .build(&mut module)?;
    let mut corlib_type = |name: &str| {
        module
            .references()
            .type_ref(ResolutionScope::AssemblyRef(corlib), "System", name)
    };
    let object = corlib_type("Object");
    let attribute = corlib_type("Attribute");
    let system_type = corlib_type("Type");
    let disposable = corlib_type("IDisposable");
    let handler = corlib_type("EventHandler");
    let unity_object = module.references().type_ref(
        ResolutionScope::AssemblyRef(core_module),
        "UnityEngine",
        "Object",
    );
    let attribute_ctor = module.references().member_ref(
        TypeDefOrRef::Ref(attribute),
        ".ctor",
        MemberSig::Method(MethodSig::parameterless_constructor()),
    );

    let interface = TypeDefBuilder::new()
        .namespace("NS")
        .name("IHolder")
        .flags(TypeAttributes::PUBLIC | TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT)
        .build(&mut module)?;
    let accessor = MethodAttributes::PUBLIC
        | MethodAttributes::HIDE_BY_SIG
        | MethodAttributes::SPECIAL_NAME
        | MethodAttributes::VIRTUAL
        | MethodAttributes::NEW_SLOT;
    let interface_count = MethodDefBuilder::new()
        .name("get_Count")
        .owner(interface)
        .flags(accessor | MethodAttributes::ABSTRACT)
        .signature(MethodSig::new_instance(TypeSig::I4, Vec::new()))
        .build(&mut module)?;

    let holder = TypeDefBuilder::new()
        .namespace("NS")
        .name("Holder`1")
        .extends(TypeDefOrRef::Ref(object))
        .build(&mut module)?;
    let param = module.add_generic_param(GenericParam {
        owner: GenericParamOwner::Type(holder),
        number: 0,
        flags: 0,
        name: "T".to_string(),
    });
    module.add_generic_param_constraint(param, TypeDefOrRef::Ref(disposable));
    module.add_custom_attribute(
        AttributeParent::GenericParam(param),
        AttributeConstructor::Ref(attribute_ctor),
        vec![0x01, 0x00, 0x00, 0x00],
    );
    module.add_interface_impl(holder, TypeDefOrRef::Def(interface));

    FieldBuilder::new()
        .name("value")
        .owner(holder)
        .signature(TypeSig::Var(0))
        .build(&mut module)?;
    FieldBuilder::new()
        .name("target")
        .owner(holder)
        .signature(TypeSig::Class(TypeDefOrRef::Ref(unity_object)))
        .build(&mut module)?;
    let seed = FieldBuilder::new()
        .name("Seed")
        .owner(holder)
        .flags(FieldAttributes::STATIC | FieldAttributes::ASSEMBLY | FieldAttributes::HAS_FIELD_RVA)
        .signature(TypeSig::I4)
        .build(&mut module)?;
    if let Some(field) = module.field_mut(seed) {
        field.initial_value = Some(FieldData::Bytes(SEED_DATA.to_vec()));
    }

    let get_count = MethodDefBuilder::new()
        .name("get_Count")
        .owner(holder)
        .flags(accessor | MethodAttributes::FINAL)
        .signature(MethodSig::new_instance(TypeSig::I4, Vec::new()))
        .body(MethodBody::new(vec![
            Instruction::new(op("ldc.i4.0"), Operand::None),
            Instruction::new(op("ret"), Operand::None),
        ]))
        .build(&mut module)?;
    let add_emptied = MethodDefBuilder::new()
        .name("add_Emptied")
        .owner(holder)
        .flags(MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG | MethodAttributes::SPECIAL_NAME)
        .signature(MethodSig::new_instance(
            TypeSig::Void,
            vec![TypeSig::Class(TypeDefOrRef::Ref(handler))],
        ))
        .body(MethodBody::new(vec![Instruction::new(op("ret"), Operand::None)]))
        .build(&mut module)?;
    if let Some(type_def) = module.type_def_mut(holder) {
        type_def.overrides.push(MethodOverride {
            body: MethodRef::Def(get_count),
            declaration: MethodRef::Def(interface_count),
        });
    }

    module.push_property(Property {
        owner: holder,
        flags: 0,
        name: "Count".to_string(),
        signature: PropertySig {
            has_this: true,
            property_type: TypeSig::I4,
            params: Vec::new(),
        },
        constant: None,
        semantics: vec![MethodSemantic {
            attributes: 0x0002,
            method: get_count,
        }],
    });
    module.push_event(Event {
        owner: holder,
        flags: 0,
        name: "Emptied".to_string(),
        event_type: Some(TypeDefOrRef::Ref(handler)),
        semantics: vec![MethodSemantic {
            attributes: 0x0008,
            method: add_emptied,
        }],
    });

    let marker_ctor = export_marker(&mut module, attribute, system_type)?;
    module.add_custom_attribute(
        AttributeParent::Module,
        AttributeConstructor::Def(marker_ctor),
        encode_type_argument("NS.Holder`1"),
    );
    Ok(module)
}

/// Write `module` into `dir` and return the file path
pub fn write_image(dir: &Path, file_name: &str, module: &Module) -> Result<PathBuf> {
    let path = dir.join(file_name);
    std::fs::write(&path, module.to_bytes()?)?;
    Ok(path)
}

/// The definitions used by the batch tests, in the JSON shape the CLI reads
pub const DEFINITIONS: &str = r#"[
    { "path": ["UnityEngine", "Object"],
      "patches": [
        { "$type": "AddAttributeOnMethod", "method": "Foo", "signature": "System.Void Foo()",
          "attribute": ["NS", "Attr"] },
        { "$type": "AddAttributeOnParameters", "method": "Bar",
          "signature": "System.Void Bar(System.Int32, System.String)",
          "attribute": ["NS", "Attr"], "parameters": ["label", "missing"] },
        { "$type": "AddAttributeOnMethod", "method": "Bar",
          "signature": "System.Void Bar(System.String, System.Int32)",
          "attribute": ["NS", "Attr"] }
      ] },
    { "path": ["UnityEngine", "Object", "Nested"],
      "patches": [
        { "$type": "ReplaceTypeReferenceInBody", "method": "GetTypeInformation",
          "target": "Microsoft.CodeAnalysis.CSharp.Syntax.NamespaceDeclarationSyntax",
          "replacement": ["Microsoft.CodeAnalysis.CSharp",
                          "Microsoft.CodeAnalysis.CSharp.Syntax",
                          "BaseNamespaceDeclarationSyntax"] }
      ] },
    { "path": ["UnityEngine", "Missing", "Nested"],
      "patches": [
        { "$type": "AddAttributeOnMethod", "method": "Foo", "signature": "System.Void Foo()",
          "attribute": ["NS", "Attr"] }
      ] }
]"#;
