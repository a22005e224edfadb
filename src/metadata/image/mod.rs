//! Reading and writing the metadata of a managed PE image.
//!
//! A module lives in an ECMA-335 PE file: the CLI header (data directory 14) points at the
//! metadata root, whose streams hold the tables (`#~`, or `#-` when indirection tables are
//! present) and the `#Strings`, `#US`, `#GUID` and `#Blob` heaps. Method bodies and the
//! initial data of mapped fields sit at RVAs elsewhere in the image.
//!
//! ```text
//! PE headers -> CLI header -> metadata root "BSJB"
//!                               +- #~ / #-   tables header, row counts, rows
//!                               +- #Strings  identifiers
//!                               +- #US       ldstr literals
//!                               +- #GUID     module version id
//!                               +- #Blob     signatures, attribute values, constants
//! ```
//!
//! # Reading
//!
//! Every table present is decoded into the arenas of a [`crate::metadata::module::Module`];
//! the position of an entity in its arena is its physical row. With indirection tables
//! (`FieldPtr`, `MethodPtr`, ...) member lists follow the logical order while ids keep the
//! physical row, so no token in a body or signature has to be rewritten. Edit-and-continue
//! logs and the processor and OS tables are ignored.
//!
//! # Writing
//!
//! The writer keeps the original container and appends a `.meta` section with the
//! re-encoded bodies, field data and metadata (see [`crate::file::pe`]). Member lists are
//! checked against the arenas: if every list is contiguous in row order, the compressed
//! `#~` stream is written; otherwise `#-` with indirection tables. Sorted tables
//! (`CustomAttribute`, `InterfaceImpl`, `GenericParam`, ...) are emitted ordered by their
//! parent. Heaps are interned and every table is written in a fixed order, so writing a
//! module read from a written image reproduces that image.

mod reader;
mod writer;

pub(crate) use reader::read_image;
pub(crate) use writer::write_image;

/// Major version of the tables stream
pub const TABLES_MAJOR_VERSION: u8 = 2;
/// Minor version of the tables stream
pub const TABLES_MINOR_VERSION: u8 = 0;

#[cfg(test)]
mod tests {
    use crate::{
        assembly::{ExceptionHandler, HandlerKind, Instruction, MethodBody, OpCode, Operand},
        file::pe::META_SECTION_NAME,
        metadata::{
            builders::{
                AssemblyRefBuilder, FieldBuilder, MethodDefBuilder, ParamBuilder, TypeDefBuilder,
            },
            flags::{FieldAttributes, MethodAttributes},
            handles::{
                AttributeConstructor, AttributeParent, FieldRef, GenericParamOwner, MethodRef,
                ResolutionScope, SecurityParent, TypeDefOrRef,
            },
            module::{
                AssemblyDef, AssemblyVersion, ClassLayout, Constant, DeclSecurity, Event, FieldData,
                GenericParam, MethodSemantic, Module, PInvokeMap, Property,
            },
            signatures::{MemberSig, MethodSig, PropertySig, StandAloneSig, TypeSig},
        },
        Error,
    };

    fn op(mnemonic: &str) -> &'static OpCode {
        OpCode::by_mnemonic(mnemonic).unwrap()
    }

    pub(crate) fn sample() -> Module {
        let mut module = Module::new("Sample.dll");
        module.set_mvid(uguid::guid!("01234567-89ab-cdef-0123-456789abcdef"));
        module.set_assembly(Some(AssemblyDef {
            hash_algorithm: 0x8004,
            version: AssemblyVersion::new(1, 2, 0, 0),
            flags: 0,
            public_key: Vec::new(),
            name: "Sample".to_string(),
            culture: String::new(),
        }));

        let corlib = AssemblyRefBuilder::new()
            .name("System.Runtime")
            .version(AssemblyVersion::new(8, 0, 0, 0))
            .public_key_token(vec![0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a])
            .build(&mut module)
            .unwrap();
        let object = module
            .references()
            .type_ref(ResolutionScope::AssemblyRef(corlib), "System", "Object");
        let exception = module
            .references()
            .type_ref(ResolutionScope::AssemblyRef(corlib), "System", "Exception");
        let object_ctor = module.references().member_ref(
            TypeDefOrRef::Ref(object),
            ".ctor",
            MemberSig::Method(MethodSig::parameterless_constructor()),
        );

        let outer = TypeDefBuilder::new()
            .namespace("NS")
            .name("Outer")
            .extends(TypeDefOrRef::Ref(object))
            .build(&mut module)
            .unwrap();
        let inner = TypeDefBuilder::new()
            .name("Inner")
            .nested_in(outer)
            .build(&mut module)
            .unwrap();
        let table = FieldBuilder::new()
            .name("table")
            .owner(outer)
            .flags(
                FieldAttributes::STATIC | FieldAttributes::INIT_ONLY | FieldAttributes::HAS_FIELD_RVA,
            )
            .signature(TypeSig::I8)
            .build(&mut module)
            .unwrap();
        module.field_mut(table).unwrap().initial_value =
            Some(FieldData::Bytes(vec![1, 2, 3, 4, 5, 6, 7, 8]));
        let field = FieldBuilder::new()
            .name("items")
            .owner(inner)
            .signature(TypeSig::SzArray(Box::new(TypeSig::Class(
                TypeDefOrRef::Def(outer),
            ))))
            .build(&mut module)
            .unwrap();
        module.type_def_mut(outer).unwrap().layout = Some(ClassLayout {
            packing_size: 8,
            class_size: 0,
        });

        let locals = module.push_standalone_sig(StandAloneSig::Locals(vec![
            TypeSig::Class(TypeDefOrRef::Ref(object)),
            TypeSig::I4,
        ]));

        let mut body = MethodBody::new(vec![
            Instruction::new(op("ldarg.0"), Operand::None),
            Instruction::new(op("call"), Operand::Method(MethodRef::Ref(object_ctor))),
            Instruction::new(op("ldstr"), Operand::String("hello".into())),
            Instruction::new(op("pop"), Operand::None),
            Instruction::new(op("ldarg.0"), Operand::None),
            Instruction::new(op("ldfld"), Operand::Field(FieldRef::Def(field))),
            Instruction::new(op("stloc.0"), Operand::None),
            Instruction::new(op("leave.s"), Operand::Branch(2)),
            Instruction::new(op("rethrow"), Operand::None),
            Instruction::new(op("ret"), Operand::None),
        ])
        .with_locals(locals);
        body.exception_handlers.push(ExceptionHandler {
            kind: HandlerKind::Catch(TypeDefOrRef::Ref(exception)),
            try_offset: 0,
            try_length: 21,
            handler_offset: 21,
            handler_length: 2,
        });

        let ctor = MethodDefBuilder::new()
            .constructor()
            .owner(outer)
            .body(body)
            .build(&mut module)
            .unwrap();
        let get_count = MethodDefBuilder::new()
            .name("get_Count")
            .owner(outer)
            .signature(MethodSig::new_instance(TypeSig::I4, Vec::new()))
            .build(&mut module)
            .unwrap();
        module.push_property(Property {
            owner: outer,
            flags: 0,
            name: "Count".to_string(),
            signature: PropertySig {
                has_this: true,
                property_type: TypeSig::I4,
                params: Vec::new(),
            },
            constant: None,
            semantics: vec![MethodSemantic {
                attributes: 0x2,
                method: get_count,
            }],
        });
        module.push_event(Event {
            owner: outer,
            flags: 0,
            name: "Changed".to_string(),
            event_type: Some(TypeDefOrRef::Ref(object)),
            semantics: Vec::new(),
        });

        let kernel = module.references().module_ref("kernel32.dll");
        let beep = MethodDefBuilder::new()
            .name("Beep")
            .owner(outer)
            .flags(
                MethodAttributes::PUBLIC | MethodAttributes::STATIC | MethodAttributes::PINVOKE_IMPL,
            )
            .build(&mut module)
            .unwrap();
        module.method_mut(beep).unwrap().pinvoke = Some(PInvokeMap {
            flags: 0x0100,
            import_name: "Beep".to_string(),
            scope: kernel,
        });

        let run = MethodDefBuilder::new()
            .name("Run")
            .owner(inner)
            .signature(MethodSig::new_instance(TypeSig::Void, vec![TypeSig::String]))
            .build(&mut module)
            .unwrap();
        let param = ParamBuilder::new()
            .name("text")
            .owner(run)
            .build(&mut module)
            .unwrap();
        module.param_mut(param).unwrap().constant = Some(Constant {
            element_type: 0x0E,
            value: vec![0x61, 0x00],
        });

        let key = module.add_generic_param(GenericParam {
            owner: GenericParamOwner::Type(outer),
            number: 0,
            flags: 0,
            name: "T".to_string(),
        });
        module.add_generic_param_constraint(key, TypeDefOrRef::Ref(object));
        module.add_interface_impl(outer, TypeDefOrRef::Ref(object));
        module.add_decl_security(DeclSecurity {
            parent: SecurityParent::Assembly,
            action: 8,
            permission_set: vec![b'.', 0],
        });

        module.add_custom_attribute(
            AttributeParent::Param(param),
            AttributeConstructor::Def(ctor),
            vec![1, 0, 0, 0],
        );
        module.add_custom_attribute(
            AttributeParent::Module,
            AttributeConstructor::Ref(object_ctor),
            vec![1, 0, 0, 0],
        );
        module.add_custom_attribute(
            AttributeParent::GenericParam(key),
            AttributeConstructor::Ref(object_ctor),
            vec![1, 0, 0, 0],
        );
        module
    }

    #[test]
    fn written_image_is_a_managed_pe() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(&bytes[..2], b"MZ");

        let reread = Module::from_bytes(&bytes).unwrap();
        let image = reread.image().unwrap();
        assert!(image.cor20().is_il_only());
        assert_eq!(image.sections().last().unwrap().name, META_SECTION_NAME);
        assert_eq!(&image.metadata().unwrap()[..4], b"BSJB");
        assert_eq!(reread.runtime_version(), "v4.0.30319");

        let metadata = image.metadata().unwrap();
        let root = crate::metadata::root::Root::read(metadata).unwrap();
        assert!(root.stream(metadata, "#~").is_some());
    }

    #[test]
    fn write_read_write_is_stable() {
        let module = sample();
        let first = module.to_bytes().unwrap();
        let reread = Module::from_bytes(&first).unwrap();
        let second = reread.to_bytes().unwrap();
        assert_eq!(first, second);

        assert_eq!(reread.name(), "Sample.dll");
        assert_eq!(reread.mvid(), module.mvid());
        assert_eq!(reread.assembly(), module.assembly());
        assert_eq!(reread.type_defs().count(), 3);
        assert_eq!(reread.type_defs, module.type_defs);
        assert_eq!(reread.methods, module.methods);
        assert_eq!(reread.params, module.params);
        assert_eq!(reread.properties, module.properties);
        assert_eq!(reread.events, module.events);
        assert_eq!(reread.generic_params, module.generic_params);
        assert_eq!(reread.generic_param_constraints, module.generic_param_constraints);
        assert_eq!(reread.interface_impls, module.interface_impls);
        assert_eq!(reread.decl_security, module.decl_security);
        assert_eq!(reread.module_refs, module.module_refs);
        assert_eq!(reread.custom_attributes, module.custom_attributes);
        assert_eq!(reread.assembly_refs, module.assembly_refs);

        // written data becomes an RVA into the image it was read from
        let table = reread
            .fields()
            .find(|(_, field)| field.name == "table")
            .map(|(_, field)| field.initial_value.clone());
        let Some(Some(FieldData::Rva(rva))) = table else {
            panic!("expected mapped field data, got {table:?}");
        };
        assert_eq!(
            reread.image().unwrap().slice_at_rva(rva, 8).unwrap(),
            &[1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn appended_members_use_indirection_tables() {
        let mut module = sample();
        let outer = module.top_level_type("NS", "Outer").unwrap();
        FieldBuilder::new()
            .name("late")
            .owner(outer)
            .signature(TypeSig::I4)
            .build(&mut module)
            .unwrap();
        MethodDefBuilder::new()
            .name("Late")
            .owner(outer)
            .build(&mut module)
            .unwrap();

        let bytes = module.to_bytes().unwrap();
        let reread = Module::from_bytes(&bytes).unwrap();
        assert_eq!(reread.type_defs, module.type_defs);
        assert_eq!(reread.fields, module.fields);
        assert_eq!(reread.methods, module.methods);
        assert_eq!(reread.to_bytes().unwrap(), bytes);

        let metadata = reread.image().unwrap().metadata().unwrap();
        let root = crate::metadata::root::Root::read(metadata).unwrap();
        assert!(root.stream(metadata, "#-").is_some());
        assert!(root.stream(metadata, "#~").is_none());
    }

    #[test]
    fn inconsistent_member_lists_are_rejected() {
        let mut module = sample();
        let outer = module.top_level_type("NS", "Outer").unwrap();
        let method = module.type_def(outer).unwrap().methods[0];
        module.type_def_mut(outer).unwrap().methods.push(method);
        assert!(matches!(module.to_bytes(), Err(Error::Malformed { .. })));
    }

    #[test]
    fn rejects_foreign_data() {
        assert!(Module::from_bytes(b"MZ\x90\x00\x03\x00\x00\x00").is_err());
        assert!(Module::from_bytes(b"\x7FELF\x02\x01\x01\x00").is_err());
        assert!(Module::from_bytes(b"CILM\x01\x00\x00\x00").is_err());

        let bytes = sample().to_bytes().unwrap();
        for len in [bytes.len() - 3, bytes.len() / 2, 0x200, 64] {
            assert!(Module::from_bytes(&bytes[..len]).is_err(), "prefix of {len} bytes");
        }
    }
}
