//! The in-memory metadata model of one module.
//!
//! A [`Module`] owns one arena per metadata table. Entities are addressed by the typed ids in
//! [`crate::metadata::handles`]; the position of an entity in its arena is its row, so ids and
//! tokens of entities that were present when the module was loaded stay stable while the
//! module is patched. New entities are only ever appended.
//!
//! Besides plain accessors, the module answers the naming questions the patch engine asks:
//! the full name of a type (`Namespace.Outer+Inner`), the canonical text of a method
//! signature (`System.Void Foo(System.Int32)`) and whether an entity already carries an
//! attribute of a given namespace and name.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use uguid::Guid;

use crate::{
    assembly::MethodBody,
    file::{pe::PeImage, File},
    metadata::{
        flags::{FieldAttributes, MethodAttributes, ParamAttributes, TypeAttributes},
        handles::{
            AssemblyRefId, AttributeConstructor, AttributeParent, DeclSecurityId, EventId,
            ExportedTypeId, FieldId, FileId, GenericParamConstraintId, GenericParamId,
            GenericParamOwner, Implementation, InterfaceImplId, ManifestResourceId, MemberRefId,
            MemberRefParent, MethodId, MethodRef, MethodSpecId, ModuleRefId, ParamId, PropertyId,
            ResolutionScope, SecurityParent, StandAloneSigId, TypeDefId, TypeDefOrRef, TypeRefId,
            TypeSpecId,
        },
        image,
        root::DEFAULT_VERSION,
        signatures::{MemberSig, MethodSig, PropertySig, StandAloneSig, TypeSig},
    },
    Result,
};

/// Name of the pseudo type that owns global fields and methods; always `TypeDef` row 1
pub const MODULE_TYPE_NAME: &str = "<Module>";

/// Assembly names that identify the core library of a module.
pub const CORLIB_NAMES: [&str; 4] = [
    "System.Private.CoreLib",
    "System.Runtime",
    "mscorlib",
    "netstandard",
];

// Nesting deeper than this is treated as a cycle when formatting names.
const MAX_NESTING: usize = 64;

/// Four-part assembly version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub struct AssemblyVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl AssemblyVersion {
    /// Create a version from its four parts
    #[must_use]
    pub fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        AssemblyVersion {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// The assembly manifest (`Assembly` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyDef {
    /// Hash algorithm id of the file hashes, `0x8004` for SHA-1
    pub hash_algorithm: u32,
    /// Assembly version
    pub version: AssemblyVersion,
    /// `AssemblyFlags`, kept as raw bits
    pub flags: u32,
    /// Public key, empty if the assembly is not strong-named
    pub public_key: Vec<u8>,
    /// Simple assembly name
    pub name: String,
    /// Culture, empty for neutral
    pub culture: String,
}

/// A referenced assembly (`AssemblyRef` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRef {
    /// Simple assembly name, e.g. `System.Runtime`
    pub name: String,
    /// Referenced version
    pub version: AssemblyVersion,
    /// `AssemblyFlags`; bit 0 means `public_key_token` holds the full key
    pub flags: u32,
    /// Culture, empty for neutral
    pub culture: String,
    /// Public key token, empty if the reference is not strong-named
    pub public_key_token: Vec<u8>,
    /// Hash of the referenced assembly, usually empty
    pub hash_value: Vec<u8>,
}

/// A reference to another module of the same assembly or a native library (`ModuleRef` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    /// File name of the module
    pub name: String,
}

/// A type reference (`TypeRef` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    /// Where the type is resolved
    pub scope: ResolutionScope,
    /// Namespace, empty for nested references
    pub namespace: String,
    /// Simple name
    pub name: String,
}

/// Explicit layout of a type (`ClassLayout` row)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLayout {
    /// Field alignment, 0 for the default
    pub packing_size: u16,
    /// Total size in bytes, 0 if not fixed
    pub class_size: u32,
}

/// An explicit interface method implementation (`MethodImpl` row)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodOverride {
    /// The implementing method
    pub body: MethodRef,
    /// The implemented interface or base method
    pub declaration: MethodRef,
}

/// A type definition (`TypeDef` row) together with its nesting and member lists
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// Visibility, layout and semantics flags
    pub flags: TypeAttributes,
    /// Namespace; usually empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Base type, `None` for `System.Object` and interfaces
    pub extends: Option<TypeDefOrRef>,
    /// Enclosing type of a nested type
    pub enclosing: Option<TypeDefId>,
    /// Directly nested types
    pub nested: Vec<TypeDefId>,
    /// Fields in declaration order
    pub fields: Vec<FieldId>,
    /// Methods in declaration order
    pub methods: Vec<MethodId>,
    /// Properties in declaration order
    pub properties: Vec<PropertyId>,
    /// Events in declaration order
    pub events: Vec<EventId>,
    /// Packing and size for sequential and explicit layout
    pub layout: Option<ClassLayout>,
    /// Explicit method implementations
    pub overrides: Vec<MethodOverride>,
}

impl TypeDef {
    /// A type with no members
    #[must_use]
    pub fn new(flags: TypeAttributes, namespace: String, name: String) -> Self {
        TypeDef {
            flags,
            namespace,
            name,
            extends: None,
            enclosing: None,
            nested: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            layout: None,
            overrides: Vec::new(),
        }
    }
}

/// A compile-time constant of a field, parameter or property (`Constant` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    /// `ELEMENT_TYPE_*` of the value; `CLASS` for a null reference
    pub element_type: u8,
    /// Little-endian value bytes, UTF-16 for strings
    pub value: Vec<u8>,
}

/// The initial value of a static field mapped into the image (`FieldRVA` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldData {
    /// Data at an RVA of the image the module was loaded from
    Rva(u32),
    /// Data that is written into the image on save
    Bytes(Vec<u8>),
}

/// A field definition (`Field` row)
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Declaring type
    pub owner: TypeDefId,
    /// Field flags
    pub flags: FieldAttributes,
    /// Field name
    pub name: String,
    /// Field type
    pub signature: TypeSig,
    /// Byte offset for explicit layout (`FieldLayout`)
    pub offset: Option<u32>,
    /// Mapped initial data (`FieldRVA`)
    pub initial_value: Option<FieldData>,
    /// Literal value
    pub constant: Option<Constant>,
    /// Native marshalling descriptor blob (`FieldMarshal`)
    pub marshal: Option<Vec<u8>>,
}

impl Field {
    /// A field with no layout, data or marshalling information
    #[must_use]
    pub fn new(owner: TypeDefId, flags: FieldAttributes, name: String, signature: TypeSig) -> Self {
        Field {
            owner,
            flags,
            name,
            signature,
            offset: None,
            initial_value: None,
            constant: None,
            marshal: None,
        }
    }
}

/// Platform invoke information of a method (`ImplMap` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PInvokeMap {
    /// `PInvokeAttributes`, kept as raw bits
    pub flags: u16,
    /// Name of the native entry point
    pub import_name: String,
    /// The native library
    pub scope: ModuleRefId,
}

/// A method definition (`MethodDef` row) and its body
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    /// Declaring type
    pub owner: TypeDefId,
    /// Method flags
    pub flags: MethodAttributes,
    /// `MethodImplAttributes`, kept as raw bits
    pub impl_flags: u16,
    /// Method name
    pub name: String,
    /// Method signature
    pub signature: MethodSig,
    /// Named parameters, ordered by sequence
    pub params: Vec<ParamId>,
    /// CIL body, `None` for abstract, extern and runtime methods
    pub body: Option<MethodBody>,
    /// Native import of a P/Invoke method
    pub pinvoke: Option<PInvokeMap>,
}

impl Method {
    /// A method without parameters, body or native import
    #[must_use]
    pub fn new(owner: TypeDefId, flags: MethodAttributes, name: String, signature: MethodSig) -> Self {
        Method {
            owner,
            flags,
            impl_flags: 0,
            name,
            signature,
            params: Vec::new(),
            body: None,
            pinvoke: None,
        }
    }
}

/// A parameter (`Param` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Declaring method
    pub owner: MethodId,
    /// Parameter flags
    pub flags: ParamAttributes,
    /// 1-based position; 0 names the return value
    pub sequence: u16,
    /// Parameter name
    pub name: String,
    /// Default value
    pub constant: Option<Constant>,
    /// Native marshalling descriptor blob
    pub marshal: Option<Vec<u8>>,
}

/// A reference to a method or field through its declaring type (`MemberRef` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Declaring type, module or vararg method
    pub parent: MemberRefParent,
    /// Member name
    pub name: String,
    /// Member signature
    pub signature: MemberSig,
}

/// A generic method instantiation (`MethodSpec` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    /// The generic method
    pub method: MethodRef,
    /// Generic arguments
    pub instantiation: Vec<TypeSig>,
}

/// An attribute instance (`CustomAttribute` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomAttribute {
    /// The entity carrying the attribute
    pub parent: AttributeParent,
    /// The attribute constructor
    pub constructor: AttributeConstructor,
    /// Encoded constructor arguments and named arguments (II.23.3)
    pub value: Vec<u8>,
}

/// An interface implemented by a type (`InterfaceImpl` row)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceImpl {
    /// The implementing type
    pub class: TypeDefId,
    /// The interface
    pub interface: TypeDefOrRef,
}

/// A generic parameter of a type or method (`GenericParam` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericParam {
    /// The generic type or method
    pub owner: GenericParamOwner,
    /// 0-based position in the parameter list
    pub number: u16,
    /// `GenericParamAttributes` (variance and special constraints)
    pub flags: u16,
    /// Parameter name
    pub name: String,
}

/// A type constraint on a generic parameter (`GenericParamConstraint` row)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericParamConstraint {
    /// The constrained parameter
    pub owner: GenericParamId,
    /// The required base type or interface
    pub constraint: TypeDefOrRef,
}

/// A method bound to a property or event (`MethodSemantics` row)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSemantic {
    /// `MethodSemanticsAttributes`: setter 0x1, getter 0x2, other 0x4, add 0x8, remove 0x10,
    /// fire 0x20
    pub attributes: u16,
    /// The accessor
    pub method: MethodId,
}

/// A property (`Property` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Declaring type
    pub owner: TypeDefId,
    /// `PropertyAttributes`, kept as raw bits
    pub flags: u16,
    /// Property name
    pub name: String,
    /// Property signature
    pub signature: PropertySig,
    /// Default value
    pub constant: Option<Constant>,
    /// Getter, setter and other accessors
    pub semantics: Vec<MethodSemantic>,
}

/// An event (`Event` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Declaring type
    pub owner: TypeDefId,
    /// `EventAttributes`, kept as raw bits
    pub flags: u16,
    /// Event name
    pub name: String,
    /// Delegate type of the event
    pub event_type: Option<TypeDefOrRef>,
    /// Add, remove, fire and other accessors
    pub semantics: Vec<MethodSemantic>,
}

/// A declarative security permission set (`DeclSecurity` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclSecurity {
    /// The protected type, method or assembly
    pub parent: SecurityParent,
    /// `SecurityAction`
    pub action: u16,
    /// Encoded permission set
    pub permission_set: Vec<u8>,
}

/// Another file of a multi-file assembly (`File` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// `FileAttributes`; 1 marks a file without metadata
    pub flags: u32,
    /// File name
    pub name: String,
    /// Hash of the file contents
    pub hash_value: Vec<u8>,
}

/// A type exported or forwarded by the assembly (`ExportedType` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedType {
    /// `TypeAttributes` of the exported type, kept as raw bits
    pub flags: u32,
    /// `TypeDef` row of the type in its own module, a hint only
    pub type_def_hint: u32,
    /// Simple name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Where the type lives
    pub implementation: Option<Implementation>,
}

/// A managed resource (`ManifestResource` row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestResource {
    /// Offset into the resources of the image, or into the implementing file
    pub offset: u32,
    /// `ManifestResourceAttributes`, public 1 or private 2
    pub flags: u32,
    /// Resource name
    pub name: String,
    /// `None` for a resource embedded in this image
    pub implementation: Option<Implementation>,
}

/// One loaded module: its name, identity, backing file and metadata arenas.
///
/// A module read from disk keeps its PE image. Writing reuses that container: every
/// original section stays in place and the new metadata is appended, see
/// [`crate::file::pe`].
#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    mvid: Guid,
    path: Option<PathBuf>,
    pub(crate) runtime_version: String,
    pub(crate) image: Option<Arc<PeImage>>,
    pub(crate) assembly: Option<AssemblyDef>,
    pub(crate) assembly_refs: Vec<AssemblyRef>,
    pub(crate) module_refs: Vec<ModuleRef>,
    pub(crate) type_refs: Vec<TypeRef>,
    pub(crate) type_defs: Vec<TypeDef>,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
    pub(crate) params: Vec<Param>,
    pub(crate) member_refs: Vec<MemberRef>,
    pub(crate) custom_attributes: Vec<CustomAttribute>,
    pub(crate) standalone_sigs: Vec<StandAloneSig>,
    pub(crate) type_specs: Vec<TypeSig>,
    pub(crate) method_specs: Vec<MethodSpec>,
    pub(crate) interface_impls: Vec<InterfaceImpl>,
    pub(crate) generic_params: Vec<GenericParam>,
    pub(crate) generic_param_constraints: Vec<GenericParamConstraint>,
    pub(crate) properties: Vec<Property>,
    pub(crate) events: Vec<Event>,
    pub(crate) decl_security: Vec<DeclSecurity>,
    pub(crate) files: Vec<FileRef>,
    pub(crate) exported_types: Vec<ExportedType>,
    pub(crate) manifest_resources: Vec<ManifestResource>,
}

macro_rules! arena_accessors {
    ($get:ident, $get_mut:ident, $iter:ident, $field:ident, $id:ty, $entity:ty) => {
        #[doc = concat!("Look up a `", stringify!($entity), "` by id")]
        #[must_use]
        pub fn $get(&self, id: $id) -> Option<&$entity> {
            self.$field.get(id.index())
        }

        #[doc = concat!("Mutable access to a `", stringify!($entity), "`")]
        pub fn $get_mut(&mut self, id: $id) -> Option<&mut $entity> {
            self.$field.get_mut(id.index())
        }

        #[doc = concat!("Iterate all `", stringify!($entity), "` entries with their ids")]
        pub fn $iter(&self) -> impl Iterator<Item = ($id, &$entity)> + '_ {
            self.$field
                .iter()
                .enumerate()
                .map(|(index, entity)| (<$id>::from_index(index), entity))
        }
    };
}

impl Module {
    /// Create a module named `name` that holds only the `<Module>` type.
    ///
    /// It has no image yet; writing it produces a minimal IL-only PE file, an executable if
    /// the name ends in `.exe` and a library otherwise.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut module = Self::blank(name.into());
        module.type_defs.push(TypeDef::new(
            TypeAttributes::empty(),
            String::new(),
            MODULE_TYPE_NAME.to_string(),
        ));
        module
    }

    pub(crate) fn blank(name: String) -> Self {
        Module {
            name,
            mvid: Guid::ZERO,
            path: None,
            runtime_version: DEFAULT_VERSION.to_string(),
            image: None,
            assembly: None,
            assembly_refs: Vec::new(),
            module_refs: Vec::new(),
            type_refs: Vec::new(),
            type_defs: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            params: Vec::new(),
            member_refs: Vec::new(),
            custom_attributes: Vec::new(),
            standalone_sigs: Vec::new(),
            type_specs: Vec::new(),
            method_specs: Vec::new(),
            interface_impls: Vec::new(),
            generic_params: Vec::new(),
            generic_param_constraints: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            decl_security: Vec::new(),
            files: Vec::new(),
            exported_types: Vec::new(),
            manifest_resources: Vec::new(),
        }
    }

    /// Load a module from a PE file on disk.
    ///
    /// The file is memory-mapped for the duration of parsing only; the returned module owns
    /// all of its data and remembers `path` as its backing file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a managed PE image.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Module> {
        let path = path.as_ref();
        let file = File::from_path(path)?;
        let mut module = image::read_image(file.data().to_vec())?;
        drop(file);
        module.path = Some(path.to_path_buf());
        Ok(module)
    }

    /// Parse a module from an in-memory PE image.
    ///
    /// # Errors
    /// Returns an error if `data` is not a managed PE image.
    pub fn from_bytes(data: &[u8]) -> Result<Module> {
        image::read_image(data.to_vec())
    }

    /// Serialize the module to a PE image.
    ///
    /// # Errors
    /// Returns an error if a method body cannot be encoded (e.g. a short branch whose
    /// displacement no longer fits) or the member lists are inconsistent.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        image::write_image(self)
    }

    /// The PE image the module was read from
    #[must_use]
    pub fn image(&self) -> Option<&PeImage> {
        self.image.as_deref()
    }

    /// The runtime version string of the metadata root, e.g. `v4.0.30319`
    #[must_use]
    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    /// The assembly manifest, `None` for a module that is not the manifest module
    #[must_use]
    pub fn assembly(&self) -> Option<&AssemblyDef> {
        self.assembly.as_ref()
    }

    /// Set or clear the assembly manifest
    pub fn set_assembly(&mut self, assembly: Option<AssemblyDef>) {
        self.assembly = assembly;
    }

    /// The module name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module version id
    #[must_use]
    pub fn mvid(&self) -> Guid {
        self.mvid
    }

    /// Replace the module version id
    pub fn set_mvid(&mut self, mvid: Guid) {
        self.mvid = mvid;
    }

    /// The backing file, if the module was loaded from disk
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Set the backing file used by persistence
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    arena_accessors!(assembly_ref, assembly_ref_mut, assembly_refs, assembly_refs, AssemblyRefId, AssemblyRef);
    arena_accessors!(module_ref, module_ref_mut, module_refs, module_refs, ModuleRefId, ModuleRef);
    arena_accessors!(type_ref, type_ref_mut, type_refs, type_refs, TypeRefId, TypeRef);
    arena_accessors!(type_def, type_def_mut, type_defs, type_defs, TypeDefId, TypeDef);
    arena_accessors!(field, field_mut, fields, fields, FieldId, Field);
    arena_accessors!(method, method_mut, methods, methods, MethodId, Method);
    arena_accessors!(param, param_mut, params, params, ParamId, Param);
    arena_accessors!(member_ref, member_ref_mut, member_refs, member_refs, MemberRefId, MemberRef);
    arena_accessors!(type_spec, type_spec_mut, type_specs, type_specs, TypeSpecId, TypeSig);
    arena_accessors!(method_spec, method_spec_mut, method_specs, method_specs, MethodSpecId, MethodSpec);
    arena_accessors!(
        interface_impl,
        interface_impl_mut,
        interface_impls,
        interface_impls,
        InterfaceImplId,
        InterfaceImpl
    );
    arena_accessors!(
        generic_param,
        generic_param_mut,
        generic_params,
        generic_params,
        GenericParamId,
        GenericParam
    );
    arena_accessors!(
        generic_param_constraint,
        generic_param_constraint_mut,
        generic_param_constraints,
        generic_param_constraints,
        GenericParamConstraintId,
        GenericParamConstraint
    );
    arena_accessors!(property, property_mut, properties, properties, PropertyId, Property);
    arena_accessors!(event, event_mut, events, events, EventId, Event);
    arena_accessors!(
        decl_security,
        decl_security_mut,
        decl_securities,
        decl_security,
        DeclSecurityId,
        DeclSecurity
    );
    arena_accessors!(file, file_mut, files, files, FileId, FileRef);
    arena_accessors!(
        exported_type,
        exported_type_mut,
        exported_types,
        exported_types,
        ExportedTypeId,
        ExportedType
    );
    arena_accessors!(
        manifest_resource,
        manifest_resource_mut,
        manifest_resources,
        manifest_resources,
        ManifestResourceId,
        ManifestResource
    );
    arena_accessors!(
        standalone_sig,
        standalone_sig_mut,
        standalone_sigs,
        standalone_sigs,
        StandAloneSigId,
        StandAloneSig
    );

    /// All custom attributes in row order
    #[must_use]
    pub fn custom_attributes(&self) -> &[CustomAttribute] {
        &self.custom_attributes
    }

    /// Custom attributes attached to `parent`
    pub fn custom_attributes_of(
        &self,
        parent: AttributeParent,
    ) -> impl Iterator<Item = &CustomAttribute> + '_ {
        self.custom_attributes
            .iter()
            .filter(move |attribute| attribute.parent == parent)
    }

    /// Attach an attribute instance, returning its row index
    pub fn add_custom_attribute(
        &mut self,
        parent: AttributeParent,
        constructor: AttributeConstructor,
        value: Vec<u8>,
    ) -> usize {
        self.custom_attributes.push(CustomAttribute {
            parent,
            constructor,
            value,
        });
        self.custom_attributes.len() - 1
    }

    pub(crate) fn push_assembly_ref(&mut self, assembly_ref: AssemblyRef) -> AssemblyRefId {
        self.assembly_refs.push(assembly_ref);
        AssemblyRefId::from_index(self.assembly_refs.len() - 1)
    }

    pub(crate) fn push_module_ref(&mut self, module_ref: ModuleRef) -> ModuleRefId {
        self.module_refs.push(module_ref);
        ModuleRefId::from_index(self.module_refs.len() - 1)
    }

    /// Record that `class` implements `interface`
    pub fn add_interface_impl(&mut self, class: TypeDefId, interface: TypeDefOrRef) -> InterfaceImplId {
        self.interface_impls.push(InterfaceImpl { class, interface });
        InterfaceImplId::from_index(self.interface_impls.len() - 1)
    }

    /// Append a generic parameter
    pub fn add_generic_param(&mut self, param: GenericParam) -> GenericParamId {
        self.generic_params.push(param);
        GenericParamId::from_index(self.generic_params.len() - 1)
    }

    /// Constrain a generic parameter to `constraint`
    pub fn add_generic_param_constraint(
        &mut self,
        owner: GenericParamId,
        constraint: TypeDefOrRef,
    ) -> GenericParamConstraintId {
        self.generic_param_constraints
            .push(GenericParamConstraint { owner, constraint });
        GenericParamConstraintId::from_index(self.generic_param_constraints.len() - 1)
    }

    /// Attach a permission set
    pub fn add_decl_security(&mut self, security: DeclSecurity) -> DeclSecurityId {
        self.decl_security.push(security);
        DeclSecurityId::from_index(self.decl_security.len() - 1)
    }

    pub(crate) fn push_type_ref(&mut self, type_ref: TypeRef) -> TypeRefId {
        self.type_refs.push(type_ref);
        TypeRefId::from_index(self.type_refs.len() - 1)
    }

    pub(crate) fn push_member_ref(&mut self, member_ref: MemberRef) -> MemberRefId {
        self.member_refs.push(member_ref);
        MemberRefId::from_index(self.member_refs.len() - 1)
    }

    pub(crate) fn push_type_spec(&mut self, sig: TypeSig) -> TypeSpecId {
        self.type_specs.push(sig);
        TypeSpecId::from_index(self.type_specs.len() - 1)
    }

    pub(crate) fn push_method_spec(&mut self, spec: MethodSpec) -> MethodSpecId {
        self.method_specs.push(spec);
        MethodSpecId::from_index(self.method_specs.len() - 1)
    }

    /// Append a standalone signature without deduplication
    pub fn push_standalone_sig(&mut self, sig: StandAloneSig) -> StandAloneSigId {
        self.standalone_sigs.push(sig);
        StandAloneSigId::from_index(self.standalone_sigs.len() - 1)
    }

    /// Append a type definition and link it into its enclosing type, if any.
    ///
    /// Member lists of `type_def` are expected to be empty; members are linked as they are
    /// added.
    pub(crate) fn push_type_def(&mut self, type_def: TypeDef) -> TypeDefId {
        let enclosing = type_def.enclosing;
        self.type_defs.push(type_def);
        let id = TypeDefId::from_index(self.type_defs.len() - 1);
        if let Some(parent) = enclosing.and_then(|parent| self.type_defs.get_mut(parent.index())) {
            parent.nested.push(id);
        }
        id
    }

    pub(crate) fn push_field(&mut self, field: Field) -> FieldId {
        let owner = field.owner;
        self.fields.push(field);
        let id = FieldId::from_index(self.fields.len() - 1);
        if let Some(owner) = self.type_defs.get_mut(owner.index()) {
            owner.fields.push(id);
        }
        id
    }

    pub(crate) fn push_method(&mut self, method: Method) -> MethodId {
        let owner = method.owner;
        self.methods.push(method);
        let id = MethodId::from_index(self.methods.len() - 1);
        if let Some(owner) = self.type_defs.get_mut(owner.index()) {
            owner.methods.push(id);
        }
        id
    }

    pub(crate) fn push_param(&mut self, param: Param) -> ParamId {
        let owner = param.owner;
        self.params.push(param);
        let id = ParamId::from_index(self.params.len() - 1);
        if let Some(owner) = self.methods.get_mut(owner.index()) {
            owner.params.push(id);
        }
        id
    }

    /// Append a property and link it into its declaring type
    pub fn push_property(&mut self, property: Property) -> PropertyId {
        let owner = property.owner;
        self.properties.push(property);
        let id = PropertyId::from_index(self.properties.len() - 1);
        if let Some(owner) = self.type_defs.get_mut(owner.index()) {
            owner.properties.push(id);
        }
        id
    }

    /// Append an event and link it into its declaring type
    pub fn push_event(&mut self, event: Event) -> EventId {
        let owner = event.owner;
        self.events.push(event);
        let id = EventId::from_index(self.events.len() - 1);
        if let Some(owner) = self.type_defs.get_mut(owner.index()) {
            owner.events.push(id);
        }
        id
    }

    /// Interfaces implemented directly by `class`
    pub fn interfaces_of(&self, class: TypeDefId) -> impl Iterator<Item = TypeDefOrRef> + '_ {
        self.interface_impls
            .iter()
            .filter(move |row| row.class == class)
            .map(|row| row.interface)
    }

    /// Generic parameters of a type or method, ordered by number
    #[must_use]
    pub fn generic_params_of(&self, owner: GenericParamOwner) -> Vec<GenericParamId> {
        let mut params: Vec<GenericParamId> = self
            .generic_params()
            .filter(|(_, param)| param.owner == owner)
            .map(|(id, _)| id)
            .collect();
        params.sort_by_key(|id| self.generic_params[id.index()].number);
        params
    }

    /// Constraints of a generic parameter
    pub fn constraints_of(&self, owner: GenericParamId) -> impl Iterator<Item = TypeDefOrRef> + '_ {
        self.generic_param_constraints
            .iter()
            .filter(move |row| row.owner == owner)
            .map(|row| row.constraint)
    }

    /// Permission sets attached to `parent`
    pub fn decl_security_of(&self, parent: SecurityParent) -> impl Iterator<Item = &DeclSecurity> + '_ {
        self.decl_security
            .iter()
            .filter(move |row| row.parent == parent)
    }

    /// The `<Module>` pseudo type, if present
    #[must_use]
    pub fn module_type(&self) -> Option<TypeDefId> {
        self.type_defs
            .first()
            .filter(|type_def| type_def.name == MODULE_TYPE_NAME && type_def.enclosing.is_none())
            .map(|_| TypeDefId::from_index(0))
    }

    /// Type definitions that are not nested in another type
    pub fn top_level_types(&self) -> impl Iterator<Item = TypeDefId> + '_ {
        self.type_defs()
            .filter(|(_, type_def)| type_def.enclosing.is_none())
            .map(|(id, _)| id)
    }

    /// Find a top-level type definition by namespace and name
    #[must_use]
    pub fn top_level_type(&self, namespace: &str, name: &str) -> Option<TypeDefId> {
        self.type_defs()
            .find(|(_, type_def)| {
                type_def.enclosing.is_none()
                    && type_def.name == name
                    && type_def.namespace == namespace
            })
            .map(|(id, _)| id)
    }

    /// Find a type nested directly in `enclosing` by name
    #[must_use]
    pub fn nested_type(&self, enclosing: TypeDefId, name: &str) -> Option<TypeDefId> {
        self.type_def(enclosing)?
            .nested
            .iter()
            .copied()
            .find(|nested| self.type_def(*nested).is_some_and(|t| t.name == name))
    }

    /// The outermost type enclosing `id` (or `id` itself for a top-level type)
    #[must_use]
    pub fn top_level_of(&self, id: TypeDefId) -> TypeDefId {
        let mut current = id;
        for _ in 0..MAX_NESTING {
            match self.type_def(current).and_then(|t| t.enclosing) {
                Some(enclosing) => current = enclosing,
                None => break,
            }
        }
        current
    }

    /// Find an existing type reference by scope, namespace and name
    #[must_use]
    pub fn find_type_ref(
        &self,
        scope: ResolutionScope,
        namespace: &str,
        name: &str,
    ) -> Option<TypeRefId> {
        self.type_refs()
            .find(|(_, r)| r.scope == scope && r.namespace == namespace && r.name == name)
            .map(|(id, _)| id)
    }

    /// The first assembly reference that names a core library
    #[must_use]
    pub fn corlib_scope(&self) -> Option<AssemblyRefId> {
        self.assembly_refs()
            .find(|(_, assembly_ref)| CORLIB_NAMES.contains(&assembly_ref.name.as_str()))
            .map(|(id, _)| id)
    }

    /// Full name of a type definition, `Namespace.Outer+Inner` for nested types
    #[must_use]
    pub fn type_def_full_name(&self, id: TypeDefId) -> String {
        self.type_def_name_at(id, 0)
    }

    fn type_def_name_at(&self, id: TypeDefId, depth: usize) -> String {
        let Some(type_def) = self.type_def(id) else {
            return format!("<{}>", id.token());
        };

        match type_def.enclosing {
            Some(enclosing) if depth < MAX_NESTING => format!(
                "{}+{}",
                self.type_def_name_at(enclosing, depth + 1),
                type_def.name
            ),
            _ => qualified(&type_def.namespace, &type_def.name),
        }
    }

    /// Full name of a type reference, `Namespace.Outer+Inner` for nested references
    #[must_use]
    pub fn type_ref_full_name(&self, id: TypeRefId) -> String {
        self.type_ref_name_at(id, 0)
    }

    fn type_ref_name_at(&self, id: TypeRefId, depth: usize) -> String {
        let Some(type_ref) = self.type_ref(id) else {
            return format!("<{}>", id.token());
        };

        match type_ref.scope {
            ResolutionScope::TypeRef(enclosing) if depth < MAX_NESTING => format!(
                "{}+{}",
                self.type_ref_name_at(enclosing, depth + 1),
                type_ref.name
            ),
            _ => qualified(&type_ref.namespace, &type_ref.name),
        }
    }

    /// Full name of any type handle
    #[must_use]
    pub fn type_full_name(&self, handle: TypeDefOrRef) -> String {
        match handle {
            TypeDefOrRef::Def(id) => self.type_def_full_name(id),
            TypeDefOrRef::Ref(id) => self.type_ref_full_name(id),
            TypeDefOrRef::Spec(id) => match self.type_spec(id) {
                Some(sig) => self.type_sig_name(sig),
                None => format!("<{}>", id.token()),
            },
        }
    }

    /// Full name of a signature type: `System.Int32`, `T[]`, `T&`, `T*`, `T<A, B>`, `!0`, `!!0`
    #[must_use]
    pub fn type_sig_name(&self, sig: &TypeSig) -> String {
        if let Some((_, name)) = sig.primitive() {
            return name.to_string();
        }

        match sig {
            TypeSig::Class(handle) | TypeSig::ValueType(handle) => self.type_full_name(*handle),
            TypeSig::SzArray(inner) => format!("{}[]", self.type_sig_name(inner)),
            TypeSig::ByRef(inner) => format!("{}&", self.type_sig_name(inner)),
            TypeSig::Ptr(inner) => format!("{}*", self.type_sig_name(inner)),
            TypeSig::Pinned(inner) => self.type_sig_name(inner),
            TypeSig::GenericInst(base, args) => {
                let args: Vec<String> = args.iter().map(|arg| self.type_sig_name(arg)).collect();
                format!("{}<{}>", self.type_sig_name(base), args.join(", "))
            }
            TypeSig::Var(index) => format!("!{index}"),
            TypeSig::MVar(index) => format!("!!{index}"),
            TypeSig::Array(inner, shape) => format!(
                "{}[{}]",
                self.type_sig_name(inner),
                ",".repeat(shape.rank.saturating_sub(1) as usize)
            ),
            TypeSig::CModReqd(modifier, inner) => format!(
                "{} modreq({})",
                self.type_sig_name(inner),
                self.type_full_name(*modifier)
            ),
            TypeSig::CModOpt(modifier, inner) => format!(
                "{} modopt({})",
                self.type_sig_name(inner),
                self.type_full_name(*modifier)
            ),
            TypeSig::FnPtr(sig) => {
                let params: Vec<String> =
                    sig.params.iter().map(|param| self.type_sig_name(param)).collect();
                format!(
                    "method {} *({})",
                    self.type_sig_name(&sig.return_type),
                    params.join(", ")
                )
            }
            _ => String::new(),
        }
    }

    /// Canonical text of a method signature, e.g. `System.Void Foo(System.Int32, System.String)`.
    ///
    /// This is the form patch definitions use to select an overload.
    #[must_use]
    pub fn method_signature_text(&self, id: MethodId) -> Option<String> {
        let method = self.method(id)?;
        Some(self.signature_text(&method.name, &method.signature))
    }

    /// Canonical text for a method name and signature
    #[must_use]
    pub fn signature_text(&self, name: &str, signature: &MethodSig) -> String {
        let params: Vec<String> = signature
            .params
            .iter()
            .map(|param| self.type_sig_name(param))
            .collect();

        format!(
            "{} {}({})",
            self.type_sig_name(&signature.return_type),
            name,
            params.join(", ")
        )
    }

    /// Namespace and simple name of a type handle.
    ///
    /// Generic instantiations report their generic type definition.
    #[must_use]
    pub fn type_namespace_and_name(&self, handle: TypeDefOrRef) -> Option<(&str, &str)> {
        match handle {
            TypeDefOrRef::Def(id) => self
                .type_def(id)
                .map(|t| (t.namespace.as_str(), t.name.as_str())),
            TypeDefOrRef::Ref(id) => self
                .type_ref(id)
                .map(|t| (t.namespace.as_str(), t.name.as_str())),
            TypeDefOrRef::Spec(id) => match self.type_spec(id)? {
                TypeSig::GenericInst(base, _) => {
                    self.type_namespace_and_name(base.type_handle()?)
                }
                other => self.type_namespace_and_name(other.type_handle()?),
            },
        }
    }

    /// The attribute type of an attribute instance (the declaring type of its constructor)
    #[must_use]
    pub fn attribute_type(&self, attribute: &CustomAttribute) -> Option<TypeDefOrRef> {
        match attribute.constructor {
            AttributeConstructor::Def(id) => self.method(id).map(|m| TypeDefOrRef::Def(m.owner)),
            AttributeConstructor::Ref(id) => self.member_ref(id).and_then(|m| m.parent.type_handle()),
        }
    }

    /// Returns true if `parent` carries an attribute whose type has the given namespace and name
    #[must_use]
    pub fn has_custom_attribute(&self, parent: AttributeParent, namespace: &str, name: &str) -> bool {
        self.custom_attributes_of(parent).any(|attribute| {
            self.attribute_type(attribute)
                .and_then(|handle| self.type_namespace_and_name(handle))
                .is_some_and(|(ns, n)| ns == namespace && n == name)
        })
    }

    /// Number of method bodies that use `sig` as their local signature
    #[must_use]
    pub fn standalone_sig_users(&self, sig: StandAloneSigId) -> usize {
        self.methods
            .iter()
            .filter_map(|method| method.body.as_ref())
            .filter(|body| body.local_sig == Some(sig))
            .count()
    }

    /// Size in bytes of a mapped field's initial data, when its type fixes one
    #[must_use]
    pub fn field_data_size(&self, field: &Field) -> Option<usize> {
        match &field.signature {
            TypeSig::Boolean | TypeSig::I1 | TypeSig::U1 => Some(1),
            TypeSig::Char | TypeSig::I2 | TypeSig::U2 => Some(2),
            TypeSig::I4 | TypeSig::U4 | TypeSig::R4 => Some(4),
            TypeSig::I8 | TypeSig::U8 | TypeSig::R8 => Some(8),
            TypeSig::ValueType(TypeDefOrRef::Def(id)) => self
                .type_def(*id)?
                .layout
                .filter(|layout| layout.class_size > 0)
                .map(|layout| layout.class_size as usize),
            _ => None,
        }
    }

    /// The initial data of a mapped field; data at an RVA is read from the image
    #[must_use]
    pub fn field_data(&self, id: FieldId) -> Option<&[u8]> {
        let field = self.field(id)?;
        match field.initial_value.as_ref()? {
            FieldData::Bytes(bytes) => Some(bytes),
            FieldData::Rva(rva) => self
                .image()?
                .slice_at_rva(*rva, self.field_data_size(field)?)
                .ok(),
        }
    }
}

fn qualified(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}
