//! The default reference importer of a module.
//!
//! Every reference the patch engine needs (an attribute type, a constructor, a replacement
//! type, the assembly a cloned member points into) goes through [`ReferenceImporter`]. It
//! returns an existing row when an equal one is already present and appends a new row
//! otherwise, so importing the same reference twice never grows the module. This is what
//! makes repeated patch runs converge to the same image.

use crate::metadata::{
    handles::{
        AssemblyRefId, MemberRefId, MemberRefParent, MethodRef, MethodSpecId, ModuleRefId,
        ResolutionScope, TypeRefId, TypeSpecId,
    },
    module::{AssemblyRef, MemberRef, MethodSpec, Module, ModuleRef, TypeRef},
    signatures::{MemberSig, TypeSig},
};

/// Dedup-on-import access to a module's reference tables, see [`Module::references`].
pub struct ReferenceImporter<'a> {
    module: &'a mut Module,
}

impl Module {
    /// The module's default reference importer
    pub fn references(&mut self) -> ReferenceImporter<'_> {
        ReferenceImporter { module: self }
    }
}

impl ReferenceImporter<'_> {
    /// Import an assembly reference, matched by simple name
    pub fn assembly_ref(&mut self, assembly_ref: &AssemblyRef) -> AssemblyRefId {
        if let Some((id, _)) = self
            .module
            .assembly_refs()
            .find(|(_, existing)| existing.name == assembly_ref.name)
        {
            return id;
        }

        self.module.push_assembly_ref(assembly_ref.clone())
    }

    /// Import a module reference, matched case-insensitively by file name
    pub fn module_ref(&mut self, name: &str) -> ModuleRefId {
        if let Some((id, _)) = self
            .module
            .module_refs()
            .find(|(_, existing)| existing.name.eq_ignore_ascii_case(name))
        {
            return id;
        }

        self.module.push_module_ref(ModuleRef {
            name: name.to_string(),
        })
    }

    /// Import a type reference
    pub fn type_ref(&mut self, scope: ResolutionScope, namespace: &str, name: &str) -> TypeRefId {
        if let Some(id) = self.module.find_type_ref(scope, namespace, name) {
            return id;
        }

        self.module.push_type_ref(TypeRef {
            scope,
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Import a member reference, matched by parent, name and signature
    pub fn member_ref(
        &mut self,
        parent: impl Into<MemberRefParent>,
        name: &str,
        signature: MemberSig,
    ) -> MemberRefId {
        let parent = parent.into();
        if let Some((id, _)) = self.module.member_refs().find(|(_, existing)| {
            existing.parent == parent && existing.name == name && existing.signature == signature
        }) {
            return id;
        }

        self.module.push_member_ref(MemberRef {
            parent,
            name: name.to_string(),
            signature,
        })
    }

    /// Import a type specification
    pub fn type_spec(&mut self, signature: TypeSig) -> TypeSpecId {
        if let Some((id, _)) = self
            .module
            .type_specs()
            .find(|(_, existing)| **existing == signature)
        {
            return id;
        }

        self.module.push_type_spec(signature)
    }

    /// Import a generic method instantiation
    pub fn method_spec(&mut self, method: MethodRef, instantiation: Vec<TypeSig>) -> MethodSpecId {
        if let Some((id, _)) = self.module.method_specs().find(|(_, existing)| {
            existing.method == method && existing.instantiation == instantiation
        }) {
            return id;
        }

        self.module.push_method_spec(MethodSpec {
            method,
            instantiation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{handles::TypeDefOrRef, module::AssemblyVersion, signatures::MethodSig};

    #[test]
    fn imports_are_deduplicated() {
        let mut module = Module::new("Test");
        let runtime = AssemblyRef {
            name: "System.Runtime".to_string(),
            version: AssemblyVersion::new(8, 0, 0, 0),
            flags: 0,
            culture: String::new(),
            public_key_token: vec![0xb0, 0x3f, 0x5f, 0x7f, 0x11, 0xd5, 0x0a, 0x3a],
            hash_value: Vec::new(),
        };

        let first = module.references().assembly_ref(&runtime);
        let second = module.references().assembly_ref(&AssemblyRef {
            version: AssemblyVersion::new(9, 0, 0, 0),
            ..runtime.clone()
        });
        assert_eq!(first, second);

        let scope = ResolutionScope::AssemblyRef(first);
        let object = module.references().type_ref(scope, "System", "Object");
        assert_eq!(module.references().type_ref(scope, "System", "Object"), object);
        assert_ne!(module.references().type_ref(scope, "System", "String"), object);

        let ctor = MemberSig::Method(MethodSig::parameterless_constructor());
        let a = module
            .references()
            .member_ref(TypeDefOrRef::Ref(object), ".ctor", ctor.clone());
        let b = module
            .references()
            .member_ref(TypeDefOrRef::Ref(object), ".ctor", ctor);
        assert_eq!(a, b);

        let array = TypeSig::SzArray(Box::new(TypeSig::Class(TypeDefOrRef::Ref(object))));
        let spec = module.references().type_spec(array.clone());
        assert_eq!(module.references().type_spec(array), spec);

        let inst = module
            .references()
            .method_spec(MethodRef::Ref(a), vec![TypeSig::I4]);
        assert_eq!(
            module
                .references()
                .method_spec(MethodRef::Ref(a), vec![TypeSig::I4]),
            inst
        );

        let kernel = module.references().module_ref("kernel32.dll");
        assert_eq!(module.references().module_ref("KERNEL32.DLL"), kernel);
        let global = module.references().member_ref(
            MemberRefParent::ModuleRef(kernel),
            "Beep",
            MemberSig::Method(MethodSig::new_static(TypeSig::Void, Vec::new())),
        );
        assert_ne!(global, a);

        assert_eq!(module.assembly_refs().count(), 1);
        assert_eq!(module.module_refs().count(), 1);
        assert_eq!(module.type_refs().count(), 2);
        assert_eq!(module.member_refs().count(), 2);
        assert_eq!(module.type_specs().count(), 1);
        assert_eq!(module.method_specs().count(), 1);
    }
}
