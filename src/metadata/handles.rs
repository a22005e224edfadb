//! Typed row handles and the coded references between them.
//!
//! Every entity of a [`crate::metadata::module::Module`] lives in a per-table arena and is
//! addressed by a zero-based id. Ids convert to and from 1-based [`Token`]s, which is how they
//! are stored on disk and in CIL operands. A handle is only meaningful for the module that
//! issued it; moving an entity between modules goes through the type importer, which
//! translates every handle.

use crate::{
    metadata::token::{TableId, Token},
    Error, Result,
};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident => $table:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Create a handle from a zero-based arena index
            #[must_use]
            pub fn from_index(index: usize) -> Self {
                #[allow(clippy::cast_possible_truncation)]
                Self(index as u32)
            }

            /// The zero-based arena index
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }

            /// The metadata token of the row this handle addresses
            #[must_use]
            pub fn token(self) -> Token {
                Token::from_parts(TableId::$table, self.0 + 1)
            }

            /// Convert a token of the matching table into a handle.
            ///
            /// # Errors
            /// Returns [`Error::InvalidToken`] for a null token or a token of another table.
            pub fn from_token(token: Token) -> Result<Self> {
                if token.table_id() != Some(TableId::$table) || token.row() == 0 {
                    return Err(Error::InvalidToken(token));
                }
                Ok(Self(token.row() - 1))
            }
        }
    };
}

define_id!(
    /// Handle of a `TypeDef` row
    TypeDefId => TypeDef
);
define_id!(
    /// Handle of a `TypeRef` row
    TypeRefId => TypeRef
);
define_id!(
    /// Handle of a `TypeSpec` row
    TypeSpecId => TypeSpec
);
define_id!(
    /// Handle of a `Field` row
    FieldId => Field
);
define_id!(
    /// Handle of a `MethodDef` row
    MethodId => MethodDef
);
define_id!(
    /// Handle of a `Param` row
    ParamId => Param
);
define_id!(
    /// Handle of a `MemberRef` row
    MemberRefId => MemberRef
);
define_id!(
    /// Handle of a `MethodSpec` row
    MethodSpecId => MethodSpec
);
define_id!(
    /// Handle of an `AssemblyRef` row
    AssemblyRefId => AssemblyRef
);
define_id!(
    /// Handle of a `StandAloneSig` row
    StandAloneSigId => StandAloneSig
);
define_id!(
    /// Handle of a `ModuleRef` row
    ModuleRefId => ModuleRef
);
define_id!(
    /// Handle of an `InterfaceImpl` row
    InterfaceImplId => InterfaceImpl
);
define_id!(
    /// Handle of a `GenericParam` row
    GenericParamId => GenericParam
);
define_id!(
    /// Handle of a `GenericParamConstraint` row
    GenericParamConstraintId => GenericParamConstraint
);
define_id!(
    /// Handle of a `Property` row
    PropertyId => Property
);
define_id!(
    /// Handle of an `Event` row
    EventId => Event
);
define_id!(
    /// Handle of a `DeclSecurity` row
    DeclSecurityId => DeclSecurity
);
define_id!(
    /// Handle of a `File` row
    FileId => File
);
define_id!(
    /// Handle of an `ExportedType` row
    ExportedTypeId => ExportedType
);
define_id!(
    /// Handle of a `ManifestResource` row
    ManifestResourceId => ManifestResource
);

/// A type named by definition, reference or specification (`TypeDefOrRef` coded index).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TypeDefOrRef {
    /// A type defined in this module
    Def(TypeDefId),
    /// A type referenced by scope, namespace and name
    Ref(TypeRefId),
    /// A constructed type
    Spec(TypeSpecId),
}

impl TypeDefOrRef {
    /// The token of the referenced row
    #[must_use]
    pub fn token(self) -> Token {
        match self {
            TypeDefOrRef::Def(id) => id.token(),
            TypeDefOrRef::Ref(id) => id.token(),
            TypeDefOrRef::Spec(id) => id.token(),
        }
    }

    /// Decode a `TypeDef`, `TypeRef` or `TypeSpec` token.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for any other table.
    pub fn from_token(token: Token) -> Result<Self> {
        match token.table_id() {
            Some(TableId::TypeDef) => TypeDefId::from_token(token).map(TypeDefOrRef::Def),
            Some(TableId::TypeRef) => TypeRefId::from_token(token).map(TypeDefOrRef::Ref),
            Some(TableId::TypeSpec) => TypeSpecId::from_token(token).map(TypeDefOrRef::Spec),
            _ => Err(Error::InvalidToken(token)),
        }
    }

    /// The compressed form used inside signature blobs (II.23.2.8)
    #[must_use]
    pub fn compressed(self) -> u32 {
        match self {
            TypeDefOrRef::Def(id) => (id.0 + 1) << 2,
            TypeDefOrRef::Ref(id) => ((id.0 + 1) << 2) | 1,
            TypeDefOrRef::Spec(id) => ((id.0 + 1) << 2) | 2,
        }
    }
}

/// A method named by definition, member reference or generic instantiation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MethodRef {
    /// A method defined in this module
    Def(MethodId),
    /// A method referenced through a `MemberRef` row
    Ref(MemberRefId),
    /// A generic method instantiation
    Spec(MethodSpecId),
}

impl MethodRef {
    /// The token of the referenced row
    #[must_use]
    pub fn token(self) -> Token {
        match self {
            MethodRef::Def(id) => id.token(),
            MethodRef::Ref(id) => id.token(),
            MethodRef::Spec(id) => id.token(),
        }
    }

    /// Decode a `MethodDef`, `MemberRef` or `MethodSpec` token.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for any other table.
    pub fn from_token(token: Token) -> Result<Self> {
        match token.table_id() {
            Some(TableId::MethodDef) => MethodId::from_token(token).map(MethodRef::Def),
            Some(TableId::MemberRef) => MemberRefId::from_token(token).map(MethodRef::Ref),
            Some(TableId::MethodSpec) => MethodSpecId::from_token(token).map(MethodRef::Spec),
            _ => Err(Error::InvalidToken(token)),
        }
    }
}

/// A field named by definition or member reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FieldRef {
    /// A field defined in this module
    Def(FieldId),
    /// A field referenced through a `MemberRef` row
    Ref(MemberRefId),
}

impl FieldRef {
    /// The token of the referenced row
    #[must_use]
    pub fn token(self) -> Token {
        match self {
            FieldRef::Def(id) => id.token(),
            FieldRef::Ref(id) => id.token(),
        }
    }

    /// Decode a `Field` or `MemberRef` token.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for any other table.
    pub fn from_token(token: Token) -> Result<Self> {
        match token.table_id() {
            Some(TableId::Field) => FieldId::from_token(token).map(FieldRef::Def),
            Some(TableId::MemberRef) => MemberRefId::from_token(token).map(FieldRef::Ref),
            _ => Err(Error::InvalidToken(token)),
        }
    }
}

/// Where a `TypeRef` is resolved.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ResolutionScope {
    /// No scope (exported-type lookup); rare
    None,
    /// The module itself
    Module,
    /// Another module of the same assembly
    ModuleRef(ModuleRefId),
    /// A referenced assembly
    AssemblyRef(AssemblyRefId),
    /// The enclosing type of a nested type reference
    TypeRef(TypeRefId),
}

impl ResolutionScope {
    /// The token stored in the `TypeRef` row
    #[must_use]
    pub fn token(self) -> Token {
        match self {
            ResolutionScope::None => Token::default(),
            ResolutionScope::Module => Token::MODULE,
            ResolutionScope::ModuleRef(id) => id.token(),
            ResolutionScope::AssemblyRef(id) => id.token(),
            ResolutionScope::TypeRef(id) => id.token(),
        }
    }

    /// Decode a resolution scope token.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for tables that cannot scope a type reference.
    pub fn from_token(token: Token) -> Result<Self> {
        if token.is_null() {
            return Ok(ResolutionScope::None);
        }

        match token.table_id() {
            Some(TableId::Module) => Ok(ResolutionScope::Module),
            Some(TableId::ModuleRef) => ModuleRefId::from_token(token).map(ResolutionScope::ModuleRef),
            Some(TableId::AssemblyRef) => {
                AssemblyRefId::from_token(token).map(ResolutionScope::AssemblyRef)
            }
            Some(TableId::TypeRef) => TypeRefId::from_token(token).map(ResolutionScope::TypeRef),
            _ => Err(Error::InvalidToken(token)),
        }
    }
}

/// The entity a custom attribute is attached to (`HasCustomAttribute` coded index).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[allow(missing_docs)]
pub enum AttributeParent {
    /// The module itself (export markers live here)
    Module,
    /// A type definition
    TypeDef(TypeDefId),
    /// A method definition
    Method(MethodId),
    /// A field definition
    Field(FieldId),
    /// A method parameter
    Param(ParamId),
    TypeRef(TypeRefId),
    InterfaceImpl(InterfaceImplId),
    MemberRef(MemberRefId),
    DeclSecurity(DeclSecurityId),
    Property(PropertyId),
    Event(EventId),
    StandAloneSig(StandAloneSigId),
    ModuleRef(ModuleRefId),
    TypeSpec(TypeSpecId),
    /// The assembly manifest row
    Assembly,
    AssemblyRef(AssemblyRefId),
    File(FileId),
    ExportedType(ExportedTypeId),
    ManifestResource(ManifestResourceId),
    GenericParam(GenericParamId),
    GenericParamConstraint(GenericParamConstraintId),
    MethodSpec(MethodSpecId),
}

impl AttributeParent {
    /// The token stored in the `CustomAttribute` row
    #[must_use]
    pub fn token(self) -> Token {
        match self {
            AttributeParent::Module => Token::MODULE,
            AttributeParent::Assembly => Token::ASSEMBLY,
            AttributeParent::TypeDef(id) => id.token(),
            AttributeParent::Method(id) => id.token(),
            AttributeParent::Field(id) => id.token(),
            AttributeParent::Param(id) => id.token(),
            AttributeParent::TypeRef(id) => id.token(),
            AttributeParent::InterfaceImpl(id) => id.token(),
            AttributeParent::MemberRef(id) => id.token(),
            AttributeParent::DeclSecurity(id) => id.token(),
            AttributeParent::Property(id) => id.token(),
            AttributeParent::Event(id) => id.token(),
            AttributeParent::StandAloneSig(id) => id.token(),
            AttributeParent::ModuleRef(id) => id.token(),
            AttributeParent::TypeSpec(id) => id.token(),
            AttributeParent::AssemblyRef(id) => id.token(),
            AttributeParent::File(id) => id.token(),
            AttributeParent::ExportedType(id) => id.token(),
            AttributeParent::ManifestResource(id) => id.token(),
            AttributeParent::GenericParam(id) => id.token(),
            AttributeParent::GenericParamConstraint(id) => id.token(),
            AttributeParent::MethodSpec(id) => id.token(),
        }
    }

    /// Decode an attribute parent token.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for tables that cannot carry attributes.
    pub fn from_token(token: Token) -> Result<Self> {
        let parent = match token.table_id() {
            Some(TableId::Module) if token.row() == 1 => AttributeParent::Module,
            Some(TableId::Assembly) if token.row() == 1 => AttributeParent::Assembly,
            Some(TableId::TypeDef) => AttributeParent::TypeDef(TypeDefId::from_token(token)?),
            Some(TableId::MethodDef) => AttributeParent::Method(MethodId::from_token(token)?),
            Some(TableId::Field) => AttributeParent::Field(FieldId::from_token(token)?),
            Some(TableId::Param) => AttributeParent::Param(ParamId::from_token(token)?),
            Some(TableId::TypeRef) => AttributeParent::TypeRef(TypeRefId::from_token(token)?),
            Some(TableId::InterfaceImpl) => {
                AttributeParent::InterfaceImpl(InterfaceImplId::from_token(token)?)
            }
            Some(TableId::MemberRef) => AttributeParent::MemberRef(MemberRefId::from_token(token)?),
            Some(TableId::DeclSecurity) => {
                AttributeParent::DeclSecurity(DeclSecurityId::from_token(token)?)
            }
            Some(TableId::Property) => AttributeParent::Property(PropertyId::from_token(token)?),
            Some(TableId::Event) => AttributeParent::Event(EventId::from_token(token)?),
            Some(TableId::StandAloneSig) => {
                AttributeParent::StandAloneSig(StandAloneSigId::from_token(token)?)
            }
            Some(TableId::ModuleRef) => AttributeParent::ModuleRef(ModuleRefId::from_token(token)?),
            Some(TableId::TypeSpec) => AttributeParent::TypeSpec(TypeSpecId::from_token(token)?),
            Some(TableId::AssemblyRef) => {
                AttributeParent::AssemblyRef(AssemblyRefId::from_token(token)?)
            }
            Some(TableId::File) => AttributeParent::File(FileId::from_token(token)?),
            Some(TableId::ExportedType) => {
                AttributeParent::ExportedType(ExportedTypeId::from_token(token)?)
            }
            Some(TableId::ManifestResource) => {
                AttributeParent::ManifestResource(ManifestResourceId::from_token(token)?)
            }
            Some(TableId::GenericParam) => {
                AttributeParent::GenericParam(GenericParamId::from_token(token)?)
            }
            Some(TableId::GenericParamConstraint) => AttributeParent::GenericParamConstraint(
                GenericParamConstraintId::from_token(token)?,
            ),
            Some(TableId::MethodSpec) => {
                AttributeParent::MethodSpec(MethodSpecId::from_token(token)?)
            }
            _ => return Err(Error::InvalidToken(token)),
        };
        Ok(parent)
    }
}

/// The constructor of a custom attribute (`CustomAttributeType` coded index).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum AttributeConstructor {
    /// A constructor defined in this module
    Def(MethodId),
    /// A constructor referenced through a `MemberRef` row
    Ref(MemberRefId),
}

impl AttributeConstructor {
    /// The token stored in the `CustomAttribute` row
    #[must_use]
    pub fn token(self) -> Token {
        match self {
            AttributeConstructor::Def(id) => id.token(),
            AttributeConstructor::Ref(id) => id.token(),
        }
    }

    /// Decode a constructor token.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for anything but `MethodDef` or `MemberRef`.
    pub fn from_token(token: Token) -> Result<Self> {
        match token.table_id() {
            Some(TableId::MethodDef) => MethodId::from_token(token).map(AttributeConstructor::Def),
            Some(TableId::MemberRef) => {
                MemberRefId::from_token(token).map(AttributeConstructor::Ref)
            }
            _ => Err(Error::InvalidToken(token)),
        }
    }
}

/// The parent of a `MemberRef` row (`MemberRefParent` coded index).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MemberRefParent {
    /// A member of a type (the common case)
    Type(TypeDefOrRef),
    /// A global member of another module
    ModuleRef(ModuleRefId),
    /// The vararg call site of a method definition
    Method(MethodId),
}

impl MemberRefParent {
    /// The token stored in the `MemberRef` row
    #[must_use]
    pub fn token(self) -> Token {
        match self {
            MemberRefParent::Type(handle) => handle.token(),
            MemberRefParent::ModuleRef(id) => id.token(),
            MemberRefParent::Method(id) => id.token(),
        }
    }

    /// Decode a member reference parent token.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for tables that cannot parent a member reference.
    pub fn from_token(token: Token) -> Result<Self> {
        match token.table_id() {
            Some(TableId::ModuleRef) => ModuleRefId::from_token(token).map(MemberRefParent::ModuleRef),
            Some(TableId::MethodDef) => MethodId::from_token(token).map(MemberRefParent::Method),
            _ => TypeDefOrRef::from_token(token).map(MemberRefParent::Type),
        }
    }

    /// The declaring type, if the parent is one
    #[must_use]
    pub fn type_handle(self) -> Option<TypeDefOrRef> {
        match self {
            MemberRefParent::Type(handle) => Some(handle),
            _ => None,
        }
    }
}

impl From<TypeDefOrRef> for MemberRefParent {
    fn from(handle: TypeDefOrRef) -> Self {
        MemberRefParent::Type(handle)
    }
}

/// The owner of a generic parameter (`TypeOrMethodDef` coded index).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GenericParamOwner {
    /// A generic type definition
    Type(TypeDefId),
    /// A generic method definition
    Method(MethodId),
}

impl GenericParamOwner {
    /// The token stored in the `GenericParam` row
    #[must_use]
    pub fn token(self) -> Token {
        match self {
            GenericParamOwner::Type(id) => id.token(),
            GenericParamOwner::Method(id) => id.token(),
        }
    }

    /// Decode a `TypeDef` or `MethodDef` token.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for any other table.
    pub fn from_token(token: Token) -> Result<Self> {
        match token.table_id() {
            Some(TableId::TypeDef) => TypeDefId::from_token(token).map(GenericParamOwner::Type),
            Some(TableId::MethodDef) => MethodId::from_token(token).map(GenericParamOwner::Method),
            _ => Err(Error::InvalidToken(token)),
        }
    }
}

/// The entity a permission set applies to (`HasDeclSecurity` coded index).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SecurityParent {
    /// A type definition
    TypeDef(TypeDefId),
    /// A method definition
    Method(MethodId),
    /// The assembly manifest row
    Assembly,
}

impl SecurityParent {
    /// The token stored in the `DeclSecurity` row
    #[must_use]
    pub fn token(self) -> Token {
        match self {
            SecurityParent::TypeDef(id) => id.token(),
            SecurityParent::Method(id) => id.token(),
            SecurityParent::Assembly => Token::ASSEMBLY,
        }
    }

    /// Decode a `TypeDef`, `MethodDef` or `Assembly` token.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for any other table.
    pub fn from_token(token: Token) -> Result<Self> {
        match token.table_id() {
            Some(TableId::TypeDef) => TypeDefId::from_token(token).map(SecurityParent::TypeDef),
            Some(TableId::MethodDef) => MethodId::from_token(token).map(SecurityParent::Method),
            Some(TableId::Assembly) if token.row() == 1 => Ok(SecurityParent::Assembly),
            _ => Err(Error::InvalidToken(token)),
        }
    }
}

/// Where an exported type or manifest resource lives (`Implementation` coded index).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Implementation {
    /// Another file of this assembly
    File(FileId),
    /// Another assembly (type forwarders)
    AssemblyRef(AssemblyRefId),
    /// The enclosing exported type of a nested exported type
    ExportedType(ExportedTypeId),
}

impl Implementation {
    /// The token stored in the row
    #[must_use]
    pub fn token(self) -> Token {
        match self {
            Implementation::File(id) => id.token(),
            Implementation::AssemblyRef(id) => id.token(),
            Implementation::ExportedType(id) => id.token(),
        }
    }

    /// Decode an implementation token; a null token means "this file".
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for any other table.
    pub fn from_token(token: Token) -> Result<Option<Self>> {
        if token.row() == 0 {
            return Ok(None);
        }
        match token.table_id() {
            Some(TableId::File) => FileId::from_token(token).map(|id| Some(Implementation::File(id))),
            Some(TableId::AssemblyRef) => {
                AssemblyRefId::from_token(token).map(|id| Some(Implementation::AssemblyRef(id)))
            }
            Some(TableId::ExportedType) => {
                ExportedTypeId::from_token(token).map(|id| Some(Implementation::ExportedType(id)))
            }
            _ => Err(Error::InvalidToken(token)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_token_roundtrip() {
        let id = MethodId::from_index(4);
        assert_eq!(id.token(), Token(0x0600_0005));
        assert_eq!(MethodId::from_token(Token(0x0600_0005)).unwrap(), id);
        assert!(MethodId::from_token(Token(0x0600_0000)).is_err());
        assert!(MethodId::from_token(Token(0x0200_0001)).is_err());
    }

    #[test]
    fn coded_references() {
        let def = TypeDefOrRef::from_token(Token(0x0200_0002)).unwrap();
        assert_eq!(def, TypeDefOrRef::Def(TypeDefId(1)));
        assert_eq!(def.compressed(), 0x08);
        assert_eq!(TypeDefOrRef::Ref(TypeRefId(1)).compressed(), 0x09);
        assert!(TypeDefOrRef::from_token(Token(0x0600_0001)).is_err());

        assert_eq!(
            ResolutionScope::from_token(Token::MODULE).unwrap(),
            ResolutionScope::Module
        );
        assert_eq!(
            ResolutionScope::from_token(Token(0)).unwrap(),
            ResolutionScope::None
        );
        assert_eq!(
            AttributeParent::from_token(Token(0x0800_0003)).unwrap(),
            AttributeParent::Param(ParamId(2))
        );
        assert!(AttributeConstructor::from_token(Token(0x0100_0001)).is_err());
    }

    #[test]
    fn attribute_parents_cover_all_kinds() {
        assert_eq!(
            AttributeParent::from_token(Token(0x2A00_0002)).unwrap(),
            AttributeParent::GenericParam(GenericParamId(1))
        );
        assert_eq!(
            AttributeParent::from_token(Token(0x2000_0001)).unwrap(),
            AttributeParent::Assembly
        );
        assert_eq!(AttributeParent::Assembly.token(), Token::ASSEMBLY);
        assert_eq!(
            AttributeParent::Property(PropertyId(0)).token(),
            Token(0x1700_0001)
        );
        assert!(AttributeParent::from_token(Token(0x2000_0002)).is_err());
        assert!(AttributeParent::from_token(Token(0x0B00_0001)).is_err());
    }

    #[test]
    fn member_ref_parents() {
        let parent = MemberRefParent::from_token(Token(0x1A00_0001)).unwrap();
        assert_eq!(parent, MemberRefParent::ModuleRef(ModuleRefId(0)));
        assert_eq!(parent.type_handle(), None);

        let parent = MemberRefParent::from(TypeDefOrRef::Ref(TypeRefId(3)));
        assert_eq!(parent.token(), Token(0x0100_0004));
        assert_eq!(parent.type_handle(), Some(TypeDefOrRef::Ref(TypeRefId(3))));

        assert_eq!(Implementation::from_token(Token(0x2600_0000)).unwrap(), None);
        assert_eq!(
            SecurityParent::from_token(Token::ASSEMBLY).unwrap(),
            SecurityParent::Assembly
        );
    }
}
