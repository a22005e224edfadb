//! Name-based lookups into a module.
//!
//! Every function here is a pure read. Absence is an expected outcome (a member removed in a
//! newer build of the binary) and is reported as `None`, never as an error.

use crate::{
    metadata::{
        handles::{
            AssemblyRefId, MethodId, ParamId, ResolutionScope, TypeDefId, TypeDefOrRef, TypeRefId,
        },
        module::Module,
    },
    patch::definition::{TypeName, TypePath},
};

/// Where a named type lives relative to a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeLocation {
    /// Defined by the module itself
    Defined(TypeDefId),
    /// Already referenced by the module
    Referenced(TypeRefId),
    /// Not yet referenced; a reference into `scope` has to be created
    External {
        /// Assembly the reference resolves through
        scope: AssemblyRefId,
        /// Namespace of the type
        namespace: String,
        /// Name of the type
        name: String,
    },
}

impl TypeLocation {
    /// Turn the location into a handle, importing a type reference if needed
    pub fn import(&self, module: &mut Module) -> TypeDefOrRef {
        match self {
            TypeLocation::Defined(id) => TypeDefOrRef::Def(*id),
            TypeLocation::Referenced(id) => TypeDefOrRef::Ref(*id),
            TypeLocation::External {
                scope,
                namespace,
                name,
            } => TypeDefOrRef::Ref(module.references().type_ref(
                ResolutionScope::AssemblyRef(*scope),
                namespace,
                name,
            )),
        }
    }
}

/// Walk a type path from a top-level type through its nested types.
///
/// The namespace only applies to the top-level segment.
#[must_use]
pub fn resolve_type_path(module: &Module, path: &TypePath) -> Option<TypeDefId> {
    let mut current = module.top_level_type(&path.namespace, &path.name)?;
    for name in &path.nested {
        current = module.nested_type(current, name)?;
    }
    Some(current)
}

/// The first method of `type_def` named `name` whose canonical signature text equals
/// `signature` exactly
#[must_use]
pub fn find_method(
    module: &Module,
    type_def: TypeDefId,
    name: &str,
    signature: &str,
) -> Option<MethodId> {
    module
        .type_def(type_def)?
        .methods
        .iter()
        .copied()
        .find(|id| {
            module.method(*id).is_some_and(|method| {
                method.name == name && module.signature_text(name, &method.signature) == signature
            })
        })
}

/// The first method of `type_def` named `name`, whatever its signature
#[must_use]
pub fn find_method_by_name(module: &Module, type_def: TypeDefId, name: &str) -> Option<MethodId> {
    module
        .type_def(type_def)?
        .methods
        .iter()
        .copied()
        .find(|id| module.method(*id).is_some_and(|method| method.name == name))
}

/// The named parameter of `method`
#[must_use]
pub fn find_parameter(module: &Module, method: MethodId, name: &str) -> Option<ParamId> {
    module
        .method(method)?
        .params
        .iter()
        .copied()
        .find(|id| module.param(*id).is_some_and(|param| param.name == name))
}

/// The first assembly reference with exactly this simple name
#[must_use]
pub fn find_assembly_reference_by_name(module: &Module, name: &str) -> Option<AssemblyRefId> {
    module
        .assembly_refs()
        .find(|(_, assembly_ref)| assembly_ref.name == name)
        .map(|(id, _)| id)
}

/// Locate a type by namespace and name.
///
/// Looks at the module's own top-level types first, then at type references it already
/// has, and finally falls back to a reference into the core library.
#[must_use]
pub fn find_type(module: &Module, namespace: &str, name: &str) -> Option<TypeLocation> {
    if let Some(id) = module.top_level_type(namespace, name) {
        return Some(TypeLocation::Defined(id));
    }

    if let Some((id, _)) = module.type_refs().find(|(_, type_ref)| {
        !matches!(type_ref.scope, ResolutionScope::TypeRef(_))
            && type_ref.namespace == namespace
            && type_ref.name == name
    }) {
        return Some(TypeLocation::Referenced(id));
    }

    module.corlib_scope().map(|scope| TypeLocation::External {
        scope,
        namespace: namespace.to_string(),
        name: name.to_string(),
    })
}

const ATTRIBUTE_SUFFIX: &str = "Attribute";

/// Locate an attribute type by the name attribute syntax uses.
///
/// `name` may leave out the conventional `Attribute` suffix: `Obsolete` finds a defined or
/// referenced `ObsoleteAttribute` when no type is called `Obsolete` itself. The fallback to
/// a new core library reference (see [`find_type`]) always keeps `name` as given.
#[must_use]
pub fn find_attribute_type(module: &Module, namespace: &str, name: &str) -> Option<TypeLocation> {
    let existing = |name: &str| match find_type(module, namespace, name)? {
        TypeLocation::External { .. } => None,
        found => Some(found),
    };

    if let Some(found) = existing(name) {
        return Some(found);
    }
    if !name.ends_with(ATTRIBUTE_SUFFIX) {
        if let Some(found) = existing(&format!("{name}{ATTRIBUTE_SUFFIX}")) {
            return Some(found);
        }
    }
    find_type(module, namespace, name)
}

/// Locate a [`TypeName`]; an assembly-scoped name resolves only through that assembly
/// reference.
#[must_use]
pub fn find_type_name(module: &Module, type_name: &TypeName) -> Option<TypeLocation> {
    let Some(assembly) = &type_name.assembly else {
        return find_type(module, &type_name.namespace, &type_name.name);
    };

    let scope = find_assembly_reference_by_name(module, assembly)?;
    match module.find_type_ref(
        ResolutionScope::AssemblyRef(scope),
        &type_name.namespace,
        &type_name.name,
    ) {
        Some(id) => Some(TypeLocation::Referenced(id)),
        None => Some(TypeLocation::External {
            scope,
            namespace: type_name.namespace.clone(),
            name: type_name.name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        builders::{AssemblyRefBuilder, MethodDefBuilder, ParamBuilder, TypeDefBuilder},
        signatures::{MethodSig, TypeSig},
    };

    fn module() -> (Module, TypeDefId, TypeDefId) {
        let mut module = Module::new("Target.dll");
        AssemblyRefBuilder::new()
            .name("System.Runtime")
            .build(&mut module)
            .unwrap();
        let outer = TypeDefBuilder::new()
            .namespace("A")
            .name("B")
            .build(&mut module)
            .unwrap();
        let inner = TypeDefBuilder::new()
            .name("C")
            .nested_in(outer)
            .build(&mut module)
            .unwrap();
        (module, outer, inner)
    }

    #[test]
    fn nested_path() {
        let (module, outer, inner) = module();
        assert_eq!(
            resolve_type_path(&module, &TypePath::new("A", "B").nested("C")),
            Some(inner)
        );
        assert_eq!(resolve_type_path(&module, &TypePath::new("A", "B")), Some(outer));
        assert_eq!(
            resolve_type_path(&module, &TypePath::new("A", "X").nested("C")),
            None
        );
        assert_eq!(
            resolve_type_path(&module, &TypePath::new("A", "B").nested("Missing")),
            None
        );
        assert_eq!(resolve_type_path(&module, &TypePath::new("", "C")), None);
    }

    #[test]
    fn signature_must_match_exactly() {
        let (mut module, outer, _) = module();
        let add = MethodDefBuilder::new()
            .name("Add")
            .owner(outer)
            .signature(MethodSig::new_instance(
                TypeSig::I4,
                vec![TypeSig::I4, TypeSig::String],
            ))
            .build(&mut module)
            .unwrap();
        ParamBuilder::new().name("x").owner(add).build(&mut module).unwrap();

        assert_eq!(
            find_method(&module, outer, "Add", "System.Int32 Add(System.Int32, System.String)"),
            Some(add)
        );
        assert_eq!(
            find_method(&module, outer, "Add", "System.Int32 Add(System.String, System.Int32)"),
            None
        );
        assert_eq!(find_method(&module, outer, "Add", "System.Int32 Add(System.Int32)"), None);
        assert_eq!(find_method(&module, outer, "Add", "System.Int32 Add()"), None);
        assert_eq!(find_method_by_name(&module, outer, "Add"), Some(add));
        assert!(find_parameter(&module, add, "x").is_some());
        assert!(find_parameter(&module, add, "y").is_none());
    }

    #[test]
    fn type_lookup_order() {
        let (mut module, outer, _) = module();
        assert_eq!(find_type(&module, "A", "B"), Some(TypeLocation::Defined(outer)));
        // nested types are not visible as top-level names
        assert!(matches!(
            find_type(&module, "", "C"),
            Some(TypeLocation::External { .. })
        ));
        assert!(matches!(
            find_attribute_type(&module, "System", "ObsoleteAttribute"),
            Some(TypeLocation::External { .. })
        ));

        let scope = find_assembly_reference_by_name(&module, "System.Runtime").unwrap();
        let existing =
            module
                .references()
                .type_ref(ResolutionScope::AssemblyRef(scope), "System", "ObsoleteAttribute");
        assert_eq!(
            find_attribute_type(&module, "System", "ObsoleteAttribute"),
            Some(TypeLocation::Referenced(existing))
        );

        assert_eq!(find_assembly_reference_by_name(&module, "System.Runtime.Extra"), None);
        assert_eq!(
            find_type_name(&module, &TypeName::in_assembly("Missing", "NS", "T")),
            None
        );
    }

    #[test]
    fn attribute_suffix_is_optional() {
        let (mut module, _, _) = module();
        let tag = TypeDefBuilder::new()
            .namespace("A")
            .name("TagAttribute")
            .build(&mut module)
            .unwrap();
        assert_eq!(find_attribute_type(&module, "A", "Tag"), Some(TypeLocation::Defined(tag)));
        assert_eq!(
            find_attribute_type(&module, "A", "TagAttribute"),
            Some(TypeLocation::Defined(tag))
        );
        // plain type lookups take the name literally
        assert!(matches!(
            find_type(&module, "A", "Tag"),
            Some(TypeLocation::External { .. })
        ));

        let scope = find_assembly_reference_by_name(&module, "System.Runtime").unwrap();
        let obsolete =
            module
                .references()
                .type_ref(ResolutionScope::AssemblyRef(scope), "System", "ObsoleteAttribute");
        assert_eq!(
            find_attribute_type(&module, "System", "Obsolete"),
            Some(TypeLocation::Referenced(obsolete))
        );

        // an exact match wins over the suffixed name
        let exact = TypeDefBuilder::new()
            .namespace("A")
            .name("Tag")
            .build(&mut module)
            .unwrap();
        assert_eq!(find_attribute_type(&module, "A", "Tag"), Some(TypeLocation::Defined(exact)));

        // unknown names fall back to the core library under the name given
        assert_eq!(
            find_attribute_type(&module, "System", "Serializable"),
            Some(TypeLocation::External {
                scope,
                namespace: "System".to_string(),
                name: "Serializable".to_string(),
            })
        );
    }

    #[test]
    fn no_corlib_means_no_fallback() {
        let mut module = Module::new("Bare.dll");
        TypeDefBuilder::new()
            .namespace("NS")
            .name("T")
            .build(&mut module)
            .unwrap();
        assert_eq!(find_type(&module, "NS", "Attr"), None);
    }

    #[test]
    fn lookups_do_not_mutate() {
        let (module, _, _) = module();
        let before = module.to_bytes().unwrap();
        let _ = find_attribute_type(&module, "System", "ObsoleteAttribute");
        let _ = find_type_name(
            &module,
            &TypeName::in_assembly("System.Runtime", "System", "Span"),
        );
        assert_eq!(module.to_bytes().unwrap(), before);
    }
}
