//! Fluent builders for new metadata rows.
//!
//! Builders validate their input and append one row to a [`Module`], linking it into its
//! owner (nested type into its enclosing type, field and method into the declaring type,
//! parameter into its method). They are used by the type importer when cloning and by tests
//! that assemble modules in memory.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::metadata::{builders::{MethodDefBuilder, TypeDefBuilder}, module::Module};
//!
//! let mut module = Module::new("Sample.dll");
//! let ty = TypeDefBuilder::new().namespace("NS").name("Widget").build(&mut module)?;
//! let foo = MethodDefBuilder::new().name("Foo").owner(ty).build(&mut module)?;
//! assert_eq!(module.method_signature_text(foo).as_deref(), Some("System.Void Foo()"));
//! # Ok::<(), dotpatch::Error>(())
//! ```

use crate::{
    assembly::MethodBody,
    metadata::{
        flags::{FieldAttributes, MethodAttributes, ParamAttributes, TypeAttributes},
        handles::{AssemblyRefId, FieldId, MethodId, ParamId, TypeDefId, TypeDefOrRef},
        module::{AssemblyRef, AssemblyVersion, Field, Method, Module, Param, TypeDef},
        signatures::{MethodSig, TypeSig},
    },
    Error, Result,
};

/// Builder for `TypeDef` rows
pub struct TypeDefBuilder {
    name: Option<String>,
    namespace: Option<String>,
    flags: Option<TypeAttributes>,
    extends: Option<TypeDefOrRef>,
    enclosing: Option<TypeDefId>,
}

impl Default for TypeDefBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeDefBuilder {
    /// Creates a new `TypeDefBuilder`
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            namespace: None,
            flags: None,
            extends: None,
            enclosing: None,
        }
    }

    /// Sets the type name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the namespace
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the type flags
    #[must_use]
    pub fn flags(mut self, flags: TypeAttributes) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Sets the base type
    #[must_use]
    pub fn extends(mut self, extends: TypeDefOrRef) -> Self {
        self.extends = Some(extends);
        self
    }

    /// Nests the new type inside `enclosing`
    #[must_use]
    pub fn nested_in(mut self, enclosing: TypeDefId) -> Self {
        self.enclosing = Some(enclosing);
        self
    }

    /// Builds the type and appends it to `module`.
    ///
    /// # Errors
    /// Returns an error if no name was given or the enclosing type does not exist.
    pub fn build(self, module: &mut Module) -> Result<TypeDefId> {
        let name = self
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| malformed_error!("TypeDef name is required"))?;

        if let Some(enclosing) = self.enclosing {
            if module.type_def(enclosing).is_none() {
                return Err(Error::InvalidToken(enclosing.token()));
            }
        }

        let flags = self.flags.unwrap_or(if self.enclosing.is_some() {
            TypeAttributes::NESTED_PUBLIC | TypeAttributes::BEFORE_FIELD_INIT
        } else {
            TypeAttributes::PUBLIC | TypeAttributes::BEFORE_FIELD_INIT
        });

        let mut type_def = TypeDef::new(flags, self.namespace.unwrap_or_default(), name);
        type_def.extends = self.extends;
        type_def.enclosing = self.enclosing;
        Ok(module.push_type_def(type_def))
    }
}

/// Builder for `Field` rows
pub struct FieldBuilder {
    name: Option<String>,
    owner: Option<TypeDefId>,
    flags: Option<FieldAttributes>,
    signature: Option<TypeSig>,
}

impl Default for FieldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldBuilder {
    /// Creates a new `FieldBuilder`
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            owner: None,
            flags: None,
            signature: None,
        }
    }

    /// Sets the field name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the declaring type
    #[must_use]
    pub fn owner(mut self, owner: TypeDefId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Sets the field flags
    #[must_use]
    pub fn flags(mut self, flags: FieldAttributes) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Sets the field type
    #[must_use]
    pub fn signature(mut self, signature: TypeSig) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Builds the field and appends it to its declaring type.
    ///
    /// # Errors
    /// Returns an error if name, owner or type are missing, or the owner does not exist.
    pub fn build(self, module: &mut Module) -> Result<FieldId> {
        let name = self
            .name
            .ok_or_else(|| malformed_error!("Field name is required"))?;
        let owner = self
            .owner
            .ok_or_else(|| malformed_error!("Field owner is required"))?;
        let signature = self
            .signature
            .ok_or_else(|| malformed_error!("Field signature is required"))?;

        if module.type_def(owner).is_none() {
            return Err(Error::InvalidToken(owner.token()));
        }

        Ok(module.push_field(Field::new(
            owner,
            self.flags.unwrap_or(FieldAttributes::PUBLIC),
            name,
            signature,
        )))
    }
}

/// Builder for `MethodDef` rows
pub struct MethodDefBuilder {
    name: Option<String>,
    owner: Option<TypeDefId>,
    flags: Option<MethodAttributes>,
    impl_flags: u16,
    signature: Option<MethodSig>,
    body: Option<MethodBody>,
}

impl Default for MethodDefBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodDefBuilder {
    /// Creates a new `MethodDefBuilder`
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            owner: None,
            flags: None,
            impl_flags: 0,
            signature: None,
            body: None,
        }
    }

    /// Sets the method name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the declaring type
    #[must_use]
    pub fn owner(mut self, owner: TypeDefId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Sets the method flags
    #[must_use]
    pub fn flags(mut self, flags: MethodAttributes) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Sets the raw `MethodImplAttributes`
    #[must_use]
    pub fn impl_flags(mut self, impl_flags: u16) -> Self {
        self.impl_flags = impl_flags;
        self
    }

    /// Sets the signature; without one the method is `void ()`
    #[must_use]
    pub fn signature(mut self, signature: MethodSig) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Sets the CIL body
    #[must_use]
    pub fn body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Shortcut for a public parameterless instance constructor
    #[must_use]
    pub fn constructor(self) -> Self {
        self.name(".ctor")
            .flags(
                MethodAttributes::PUBLIC
                    | MethodAttributes::HIDE_BY_SIG
                    | MethodAttributes::SPECIAL_NAME
                    | MethodAttributes::RT_SPECIAL_NAME,
            )
            .signature(MethodSig::parameterless_constructor())
    }

    /// Builds the method and appends it to its declaring type.
    ///
    /// # Errors
    /// Returns an error if name or owner are missing, or the owner does not exist.
    pub fn build(self, module: &mut Module) -> Result<MethodId> {
        let name = self
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| malformed_error!("MethodDef name is required"))?;
        let owner = self
            .owner
            .ok_or_else(|| malformed_error!("MethodDef owner is required"))?;

        if module.type_def(owner).is_none() {
            return Err(Error::InvalidToken(owner.token()));
        }

        let flags = self
            .flags
            .unwrap_or(MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG);
        let signature = self.signature.unwrap_or_else(|| {
            if flags.contains(MethodAttributes::STATIC) {
                MethodSig::new_static(TypeSig::Void, Vec::new())
            } else {
                MethodSig::new_instance(TypeSig::Void, Vec::new())
            }
        });

        let mut method = Method::new(owner, flags, name, signature);
        method.impl_flags = self.impl_flags;
        method.body = self.body;
        Ok(module.push_method(method))
    }
}

/// Builder for `Param` rows
pub struct ParamBuilder {
    name: Option<String>,
    owner: Option<MethodId>,
    sequence: Option<u16>,
    flags: ParamAttributes,
}

impl Default for ParamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamBuilder {
    /// Creates a new `ParamBuilder`
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            owner: None,
            sequence: None,
            flags: ParamAttributes::empty(),
        }
    }

    /// Sets the parameter name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the declaring method
    #[must_use]
    pub fn owner(mut self, owner: MethodId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Sets the 1-based position (0 is the return value)
    #[must_use]
    pub fn sequence(mut self, sequence: u16) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Sets the parameter flags
    #[must_use]
    pub fn flags(mut self, flags: ParamAttributes) -> Self {
        self.flags = flags;
        self
    }

    /// Builds the parameter and appends it to its method.
    ///
    /// Without an explicit sequence the parameter takes the next free position.
    ///
    /// # Errors
    /// Returns an error if name or owner are missing, or the owner does not exist.
    pub fn build(self, module: &mut Module) -> Result<ParamId> {
        let name = self
            .name
            .ok_or_else(|| malformed_error!("Param name is required"))?;
        let owner = self
            .owner
            .ok_or_else(|| malformed_error!("Param owner is required"))?;

        let Some(method) = module.method(owner) else {
            return Err(Error::InvalidToken(owner.token()));
        };

        #[allow(clippy::cast_possible_truncation)]
        let sequence = self
            .sequence
            .unwrap_or(method.params.len() as u16 + 1);

        Ok(module.push_param(Param {
            owner,
            flags: self.flags,
            sequence,
            name,
            constant: None,
            marshal: None,
        }))
    }
}

/// Builder for `AssemblyRef` rows
pub struct AssemblyRefBuilder {
    name: Option<String>,
    version: AssemblyVersion,
    culture: String,
    public_key_token: Vec<u8>,
}

impl Default for AssemblyRefBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AssemblyRefBuilder {
    /// Creates a new `AssemblyRefBuilder`
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            version: AssemblyVersion::default(),
            culture: String::new(),
            public_key_token: Vec::new(),
        }
    }

    /// Sets the simple assembly name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the version
    #[must_use]
    pub fn version(mut self, version: AssemblyVersion) -> Self {
        self.version = version;
        self
    }

    /// Sets the culture
    #[must_use]
    pub fn culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = culture.into();
        self
    }

    /// Sets the public key token
    #[must_use]
    pub fn public_key_token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.public_key_token = token.into();
        self
    }

    /// Appends the assembly reference to `module`.
    ///
    /// # Errors
    /// Returns an error if no name was given.
    pub fn build(self, module: &mut Module) -> Result<AssemblyRefId> {
        let name = self
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| malformed_error!("AssemblyRef name is required"))?;

        Ok(module.push_assembly_ref(AssemblyRef {
            name,
            version: self.version,
            flags: 0,
            culture: self.culture,
            public_key_token: self.public_key_token,
            hash_value: Vec::new(),
        }))
    }
}
