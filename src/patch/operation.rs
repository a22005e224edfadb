//! Patch operations.
//!
//! Each operation runs against one resolved type and is idempotent: applying it to a module it
//! has already been applied to reports [`OperationOutcome::Unchanged`] and leaves the module
//! as it is. An operation fails only when something it cannot do without is missing (the
//! method, the attribute type or its constructor); optional inputs such as parameter names
//! that do not exist are skipped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    metadata::{
        attributes::parameterless_value,
        flags::MethodAttributes,
        handles::{AttributeConstructor, AttributeParent, MethodId, TypeDefId},
        module::Module,
        signatures::{MemberSig, MethodSig},
    },
    patch::{
        definition::TypeName,
        locator::{
            find_assembly_reference_by_name, find_method, find_method_by_name, find_parameter,
            find_type_name, TypeLocation,
        },
        rewriter::TypeReferenceRewriter,
    },
};

/// Something a patch operation needed but could not find
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionMiss {
    /// The method named by the operation does not exist on the type
    #[error("method {name} `{signature}` not found")]
    Method {
        /// Method name
        name: String,
        /// Signature text, empty when matched by name only
        signature: String,
    },
    /// The attribute type cannot be located
    #[error("attribute type {0} not found")]
    Attribute(String),
    /// The attribute type is defined locally but has no parameterless constructor
    #[error("attribute type {0} has no parameterless constructor")]
    Constructor(String),
    /// A replacement type cannot be located
    #[error("type {0} not found")]
    Type(String),
    /// The assembly reference a type is scoped to does not exist
    #[error("assembly reference {0} not found")]
    AssemblyReference(String),
}

/// Result of applying one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The module was changed; the count is the number of attributes added or operands
    /// substituted
    Applied(usize),
    /// Everything was already in place
    Unchanged,
    /// A required input could not be resolved
    Failed(ResolutionMiss),
}

impl OperationOutcome {
    /// Returns true unless the operation failed
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, OperationOutcome::Failed(_))
    }

    /// Number of changes made to the module
    #[must_use]
    pub fn changes(&self) -> usize {
        match self {
            OperationOutcome::Applied(count) => *count,
            _ => 0,
        }
    }

    fn from_count(count: usize) -> Self {
        if count == 0 {
            OperationOutcome::Unchanged
        } else {
            OperationOutcome::Applied(count)
        }
    }
}

/// Add an attribute to a method, unless the method already has one of that type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAttributeOnMethod {
    /// Method name
    pub method: String,
    /// Canonical signature text, e.g. `System.Void Foo()`
    pub signature: String,
    /// Attribute type
    pub attribute: TypeName,
}

/// Add an attribute to named parameters of a method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAttributeOnParameters {
    /// Method name
    pub method: String,
    /// Canonical signature text
    pub signature: String,
    /// Attribute type
    pub attribute: TypeName,
    /// Names of the parameters to annotate; names that do not exist are skipped
    #[serde(default)]
    pub parameters: Vec<String>,
}

/// Replace every use of a type in a method body with another type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceTypeReferenceInBody {
    /// Method name
    pub method: String,
    /// Canonical signature text; without it the first method with the name is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Full name of the type to replace
    pub target: String,
    /// The type to substitute
    pub replacement: TypeName,
}

/// A patch operation, tagged by `$type` in JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum PatchOperation {
    /// See [`AddAttributeOnMethod`]
    AddAttributeOnMethod(AddAttributeOnMethod),
    /// See [`AddAttributeOnParameters`]
    AddAttributeOnParameters(AddAttributeOnParameters),
    /// See [`ReplaceTypeReferenceInBody`]
    ReplaceTypeReferenceInBody(ReplaceTypeReferenceInBody),
}

impl From<AddAttributeOnMethod> for PatchOperation {
    fn from(operation: AddAttributeOnMethod) -> Self {
        PatchOperation::AddAttributeOnMethod(operation)
    }
}

impl From<AddAttributeOnParameters> for PatchOperation {
    fn from(operation: AddAttributeOnParameters) -> Self {
        PatchOperation::AddAttributeOnParameters(operation)
    }
}

impl From<ReplaceTypeReferenceInBody> for PatchOperation {
    fn from(operation: ReplaceTypeReferenceInBody) -> Self {
        PatchOperation::ReplaceTypeReferenceInBody(operation)
    }
}

impl PatchOperation {
    /// The `$type` discriminator of the operation
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PatchOperation::AddAttributeOnMethod(_) => "AddAttributeOnMethod",
            PatchOperation::AddAttributeOnParameters(_) => "AddAttributeOnParameters",
            PatchOperation::ReplaceTypeReferenceInBody(_) => "ReplaceTypeReferenceInBody",
        }
    }

    /// The method the operation targets
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            PatchOperation::AddAttributeOnMethod(op) => &op.method,
            PatchOperation::AddAttributeOnParameters(op) => &op.method,
            PatchOperation::ReplaceTypeReferenceInBody(op) => &op.method,
        }
    }

    /// Apply the operation to `type_def` in `module`
    pub fn apply(&self, module: &mut Module, type_def: TypeDefId) -> OperationOutcome {
        let outcome = match self {
            PatchOperation::AddAttributeOnMethod(op) => op.try_apply(module, type_def),
            PatchOperation::AddAttributeOnParameters(op) => op.try_apply(module, type_def),
            PatchOperation::ReplaceTypeReferenceInBody(op) => op.try_apply(module, type_def),
        };
        outcome.unwrap_or_else(OperationOutcome::Failed)
    }

    /// Apply the operation, returning false if a required input could not be resolved
    pub fn execute(&self, module: &mut Module, type_def: TypeDefId) -> bool {
        self.apply(module, type_def).is_success()
    }
}

/// A located attribute type and, for locally defined attributes, its constructor
struct ResolvedAttribute<'a> {
    name: &'a TypeName,
    location: TypeLocation,
    defined_constructor: Option<MethodId>,
}

impl<'a> ResolvedAttribute<'a> {
    fn resolve(module: &Module, name: &'a TypeName) -> Result<Self, ResolutionMiss> {
        let location =
            find_type_name(module, name).ok_or_else(|| ResolutionMiss::Attribute(name.to_string()))?;

        let defined_constructor = match location {
            TypeLocation::Defined(id) => Some(
                parameterless_constructor(module, id)
                    .ok_or_else(|| ResolutionMiss::Constructor(name.to_string()))?,
            ),
            _ => None,
        };

        Ok(ResolvedAttribute {
            name,
            location,
            defined_constructor,
        })
    }

    fn is_present(&self, module: &Module, parent: AttributeParent) -> bool {
        module.has_custom_attribute(parent, &self.name.namespace, &self.name.name)
    }

    /// The constructor to attach, importing a member reference for external attributes
    fn constructor(&self, module: &mut Module) -> AttributeConstructor {
        if let Some(id) = self.defined_constructor {
            return AttributeConstructor::Def(id);
        }

        let parent = self.location.import(module);
        AttributeConstructor::Ref(module.references().member_ref(
            parent,
            ".ctor",
            MemberSig::Method(MethodSig::parameterless_constructor()),
        ))
    }
}

fn parameterless_constructor(module: &Module, type_def: TypeDefId) -> Option<MethodId> {
    let constructor_sig = MethodSig::parameterless_constructor();
    module.type_def(type_def)?.methods.iter().copied().find(|id| {
        module.method(*id).is_some_and(|method| {
            method.name == ".ctor"
                && !method.flags.contains(MethodAttributes::STATIC)
                && method.signature == constructor_sig
        })
    })
}

fn method_miss(method: &str, signature: Option<&str>) -> ResolutionMiss {
    ResolutionMiss::Method {
        name: method.to_string(),
        signature: signature.unwrap_or_default().to_string(),
    }
}

impl AddAttributeOnMethod {
    fn try_apply(
        &self,
        module: &mut Module,
        type_def: TypeDefId,
    ) -> Result<OperationOutcome, ResolutionMiss> {
        let method = find_method(module, type_def, &self.method, &self.signature)
            .ok_or_else(|| method_miss(&self.method, Some(&self.signature)))?;
        let attribute = ResolvedAttribute::resolve(module, &self.attribute)?;

        let parent = AttributeParent::Method(method);
        if attribute.is_present(module, parent) {
            return Ok(OperationOutcome::Unchanged);
        }

        let constructor = attribute.constructor(module);
        module.add_custom_attribute(parent, constructor, parameterless_value());
        Ok(OperationOutcome::Applied(1))
    }
}

impl AddAttributeOnParameters {
    fn try_apply(
        &self,
        module: &mut Module,
        type_def: TypeDefId,
    ) -> Result<OperationOutcome, ResolutionMiss> {
        let method = find_method(module, type_def, &self.method, &self.signature)
            .ok_or_else(|| method_miss(&self.method, Some(&self.signature)))?;
        let attribute = ResolvedAttribute::resolve(module, &self.attribute)?;

        let mut added = 0;
        for name in &self.parameters {
            let Some(param) = find_parameter(module, method, name) else {
                continue;
            };
            let parent = AttributeParent::Param(param);
            if attribute.is_present(module, parent) {
                continue;
            }

            let constructor = attribute.constructor(module);
            module.add_custom_attribute(parent, constructor, parameterless_value());
            added += 1;
        }

        Ok(OperationOutcome::from_count(added))
    }
}

impl ReplaceTypeReferenceInBody {
    fn try_apply(
        &self,
        module: &mut Module,
        type_def: TypeDefId,
    ) -> Result<OperationOutcome, ResolutionMiss> {
        let method = match &self.signature {
            Some(signature) => find_method(module, type_def, &self.method, signature),
            None => find_method_by_name(module, type_def, &self.method),
        }
        .ok_or_else(|| method_miss(&self.method, self.signature.as_deref()))?;

        let replacement = find_type_name(module, &self.replacement).ok_or_else(|| {
            match &self.replacement.assembly {
                Some(assembly) if find_assembly_reference_by_name(module, assembly).is_none() => {
                    ResolutionMiss::AssemblyReference(assembly.clone())
                }
                _ => ResolutionMiss::Type(self.replacement.to_string()),
            }
        })?;

        let replacement_name = if self.replacement.namespace.is_empty() {
            self.replacement.name.clone()
        } else {
            format!("{}.{}", self.replacement.namespace, self.replacement.name)
        };
        if replacement_name == self.target {
            return Ok(OperationOutcome::Unchanged);
        }

        let count = TypeReferenceRewriter::new(&self.target)
            .rewrite(module, method, |module| replacement.import(module));
        Ok(OperationOutcome::from_count(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        builders::{AssemblyRefBuilder, MethodDefBuilder, ParamBuilder, TypeDefBuilder},
        signatures::TypeSig,
    };

    struct Fixture {
        module: Module,
        type_def: TypeDefId,
        foo: MethodId,
        bar: MethodId,
    }

    fn fixture() -> Fixture {
        let mut module = Module::new("Target.dll");
        AssemblyRefBuilder::new()
            .name("System.Runtime")
            .build(&mut module)
            .unwrap();
        let type_def = TypeDefBuilder::new()
            .namespace("App")
            .name("Widget")
            .build(&mut module)
            .unwrap();
        let foo = MethodDefBuilder::new()
            .name("Foo")
            .owner(type_def)
            .build(&mut module)
            .unwrap();
        let bar = MethodDefBuilder::new()
            .name("Bar")
            .owner(type_def)
            .signature(MethodSig::new_instance(
                TypeSig::Void,
                vec![TypeSig::I4, TypeSig::String],
            ))
            .build(&mut module)
            .unwrap();
        ParamBuilder::new().name("count").owner(bar).build(&mut module).unwrap();
        ParamBuilder::new().name("label").owner(bar).build(&mut module).unwrap();

        Fixture {
            module,
            type_def,
            foo,
            bar,
        }
    }

    fn on_foo(attribute: TypeName) -> PatchOperation {
        AddAttributeOnMethod {
            method: "Foo".into(),
            signature: "System.Void Foo()".into(),
            attribute,
        }
        .into()
    }

    #[test]
    fn method_attribute_is_added_once() {
        let mut f = fixture();
        let op = on_foo(TypeName::new("System.Diagnostics", "ConditionalAttribute"));

        assert_eq!(op.apply(&mut f.module, f.type_def), OperationOutcome::Applied(1));
        let once = f.module.to_bytes().unwrap();
        assert_eq!(op.apply(&mut f.module, f.type_def), OperationOutcome::Unchanged);
        assert_eq!(f.module.to_bytes().unwrap(), once);

        assert_eq!(
            f.module
                .custom_attributes_of(AttributeParent::Method(f.foo))
                .count(),
            1
        );
        assert!(f.module.has_custom_attribute(
            AttributeParent::Method(f.foo),
            "System.Diagnostics",
            "ConditionalAttribute"
        ));
    }

    #[test]
    fn locally_defined_attribute_uses_its_constructor() {
        let mut f = fixture();
        let attr = TypeDefBuilder::new()
            .namespace("NS")
            .name("Attr")
            .build(&mut f.module)
            .unwrap();
        let op = on_foo(TypeName::new("NS", "Attr"));
        assert_eq!(
            op.apply(&mut f.module, f.type_def),
            OperationOutcome::Failed(ResolutionMiss::Constructor("NS.Attr".into()))
        );

        let ctor = MethodDefBuilder::new()
            .constructor()
            .owner(attr)
            .build(&mut f.module)
            .unwrap();
        assert!(op.execute(&mut f.module, f.type_def));
        let attribute = f
            .module
            .custom_attributes_of(AttributeParent::Method(f.foo))
            .next()
            .unwrap();
        assert_eq!(attribute.constructor, AttributeConstructor::Def(ctor));
    }

    #[test]
    fn misses_are_reported() {
        let mut f = fixture();
        let wrong_signature: PatchOperation = AddAttributeOnMethod {
            method: "Foo".into(),
            signature: "System.Void Foo(System.Int32)".into(),
            attribute: TypeName::new("NS", "Attr"),
        }
        .into();
        assert!(matches!(
            wrong_signature.apply(&mut f.module, f.type_def),
            OperationOutcome::Failed(ResolutionMiss::Method { .. })
        ));

        let mut bare = Module::new("Bare.dll");
        let type_def = TypeDefBuilder::new()
            .namespace("App")
            .name("Widget")
            .build(&mut bare)
            .unwrap();
        MethodDefBuilder::new()
            .name("Foo")
            .owner(type_def)
            .build(&mut bare)
            .unwrap();
        assert!(!on_foo(TypeName::new("NS", "Attr")).execute(&mut bare, type_def));
    }

    #[test]
    fn parameters_are_annotated_individually() {
        let mut f = fixture();
        let op: PatchOperation = AddAttributeOnParameters {
            method: "Bar".into(),
            signature: "System.Void Bar(System.Int32, System.String)".into(),
            attribute: TypeName::new("System.Runtime.CompilerServices", "ScopedRefAttribute"),
            parameters: vec!["label".into(), "missing".into()],
        }
        .into();

        assert_eq!(op.apply(&mut f.module, f.type_def), OperationOutcome::Applied(1));
        assert_eq!(op.apply(&mut f.module, f.type_def), OperationOutcome::Unchanged);

        let params = &f.module.method(f.bar).unwrap().params;
        assert_eq!(
            f.module
                .custom_attributes_of(AttributeParent::Param(params[0]))
                .count(),
            0
        );
        assert_eq!(
            f.module
                .custom_attributes_of(AttributeParent::Param(params[1]))
                .count(),
            1
        );
    }

    #[test]
    fn replacement_must_resolve() {
        let mut f = fixture();
        let op: PatchOperation = ReplaceTypeReferenceInBody {
            method: "Foo".into(),
            signature: None,
            target: "Old.Type".into(),
            replacement: TypeName::in_assembly("Missing.Assembly", "New", "Type"),
        }
        .into();
        assert_eq!(
            op.apply(&mut f.module, f.type_def),
            OperationOutcome::Failed(ResolutionMiss::AssemblyReference(
                "Missing.Assembly".into()
            ))
        );

        let no_body: PatchOperation = ReplaceTypeReferenceInBody {
            method: "Foo".into(),
            signature: Some("System.Void Foo()".into()),
            target: "Old.Type".into(),
            replacement: TypeName::new("System", "Object"),
        }
        .into();
        let before = f.module.to_bytes().unwrap();
        assert_eq!(no_body.apply(&mut f.module, f.type_def), OperationOutcome::Unchanged);
        assert_eq!(f.module.to_bytes().unwrap(), before);
        assert_eq!(no_body.name(), "ReplaceTypeReferenceInBody");
        assert_eq!(no_body.method(), "Foo");
    }
}
