//! Signature blobs: types, method signatures, field and local-variable signatures.
//!
//! Signatures are kept in decoded form inside a module so that the patch engine can compare
//! them textually (see [`crate::metadata::module::Module::method_signature_text`]) and so that
//! the type importer can translate every embedded type handle when cloning members into
//! another module. [`parse_method_sig`] and friends decode ECMA-335 blobs (II.23.2);
//! the `encode_*` functions produce the same encoding back.

mod encoder;
mod parser;

pub use encoder::{
    encode_field_sig, encode_local_sig, encode_member_sig, encode_method_sig,
    encode_method_spec, encode_property_sig, encode_standalone_sig, encode_type_sig,
};
pub use parser::{
    parse_field_sig, parse_local_sig, parse_member_sig, parse_method_sig, parse_method_spec,
    parse_property_sig, parse_standalone_sig, parse_type_sig,
};

use crate::metadata::handles::TypeDefOrRef;

/// Maximum nesting depth accepted when decoding a type signature
pub const MAX_RECURSION_DEPTH: usize = 50;

/// `ELEMENT_TYPE_*` constants (II.23.1.16)
#[allow(non_snake_case, missing_docs)]
pub mod ELEMENT_TYPE {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    pub const PTR: u8 = 0x0f;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1b;
    pub const OBJECT: u8 = 0x1c;
    pub const SZARRAY: u8 = 0x1d;
    pub const MVAR: u8 = 0x1e;
    pub const CMOD_REQD: u8 = 0x1f;
    pub const CMOD_OPT: u8 = 0x20;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
}

/// Calling convention bits of the first signature byte (II.23.2.1 - II.23.2.6)
#[allow(non_snake_case, missing_docs)]
pub mod CALLING_CONVENTION {
    pub const DEFAULT: u8 = 0x00;
    pub const C: u8 = 0x01;
    pub const STDCALL: u8 = 0x02;
    pub const THISCALL: u8 = 0x03;
    pub const FASTCALL: u8 = 0x04;
    pub const VARARG: u8 = 0x05;
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const PROPERTY: u8 = 0x08;
    pub const UNMANAGED: u8 = 0x09;
    pub const GENERIC_INST: u8 = 0x0a;
    pub const KIND_MASK: u8 = 0x0f;
    pub const GENERIC: u8 = 0x10;
    pub const HAS_THIS: u8 = 0x20;
    pub const EXPLICIT_THIS: u8 = 0x40;
}

/// Shape of a general array (`ELEMENT_TYPE_ARRAY`, II.23.2.13)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ArrayShape {
    /// Number of dimensions
    pub rank: u32,
    /// Sizes of the leading dimensions that have one
    pub sizes: Vec<u32>,
    /// Lower bounds of the leading dimensions that have one
    pub lower_bounds: Vec<i32>,
}

/// A type as it appears inside a signature blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TypeSig {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Object,
    I,
    U,
    TypedByRef,
    /// A reference type named by a `TypeDefOrRef` handle
    Class(TypeDefOrRef),
    /// A value type named by a `TypeDefOrRef` handle
    ValueType(TypeDefOrRef),
    /// Single-dimensional, zero-based array
    SzArray(Box<TypeSig>),
    /// Managed pointer
    ByRef(Box<TypeSig>),
    /// Unmanaged pointer
    Ptr(Box<TypeSig>),
    /// Pinned local (only valid in local signatures)
    Pinned(Box<TypeSig>),
    /// Generic instantiation of a class or value type
    GenericInst(Box<TypeSig>, Vec<TypeSig>),
    /// Generic type parameter `!n`
    Var(u32),
    /// Generic method parameter `!!n`
    MVar(u32),
    /// Multi-dimensional or non-zero-based array
    Array(Box<TypeSig>, ArrayShape),
    /// Required custom modifier applied to the inner type (`modreq`)
    CModReqd(TypeDefOrRef, Box<TypeSig>),
    /// Optional custom modifier applied to the inner type (`modopt`)
    CModOpt(TypeDefOrRef, Box<TypeSig>),
    /// Function pointer
    FnPtr(Box<MethodSig>),
}

impl TypeSig {
    /// The primitive element type code and canonical full name, if this is a primitive
    #[must_use]
    pub fn primitive(&self) -> Option<(u8, &'static str)> {
        let primitive = match self {
            TypeSig::Void => (ELEMENT_TYPE::VOID, "System.Void"),
            TypeSig::Boolean => (ELEMENT_TYPE::BOOLEAN, "System.Boolean"),
            TypeSig::Char => (ELEMENT_TYPE::CHAR, "System.Char"),
            TypeSig::I1 => (ELEMENT_TYPE::I1, "System.SByte"),
            TypeSig::U1 => (ELEMENT_TYPE::U1, "System.Byte"),
            TypeSig::I2 => (ELEMENT_TYPE::I2, "System.Int16"),
            TypeSig::U2 => (ELEMENT_TYPE::U2, "System.UInt16"),
            TypeSig::I4 => (ELEMENT_TYPE::I4, "System.Int32"),
            TypeSig::U4 => (ELEMENT_TYPE::U4, "System.UInt32"),
            TypeSig::I8 => (ELEMENT_TYPE::I8, "System.Int64"),
            TypeSig::U8 => (ELEMENT_TYPE::U8, "System.UInt64"),
            TypeSig::R4 => (ELEMENT_TYPE::R4, "System.Single"),
            TypeSig::R8 => (ELEMENT_TYPE::R8, "System.Double"),
            TypeSig::String => (ELEMENT_TYPE::STRING, "System.String"),
            TypeSig::Object => (ELEMENT_TYPE::OBJECT, "System.Object"),
            TypeSig::I => (ELEMENT_TYPE::I, "System.IntPtr"),
            TypeSig::U => (ELEMENT_TYPE::U, "System.UIntPtr"),
            TypeSig::TypedByRef => (ELEMENT_TYPE::TYPEDBYREF, "System.TypedReference"),
            _ => return None,
        };
        Some(primitive)
    }

    /// Map a primitive element type code back to its signature
    #[must_use]
    pub fn from_primitive(element_type: u8) -> Option<TypeSig> {
        let sig = match element_type {
            ELEMENT_TYPE::VOID => TypeSig::Void,
            ELEMENT_TYPE::BOOLEAN => TypeSig::Boolean,
            ELEMENT_TYPE::CHAR => TypeSig::Char,
            ELEMENT_TYPE::I1 => TypeSig::I1,
            ELEMENT_TYPE::U1 => TypeSig::U1,
            ELEMENT_TYPE::I2 => TypeSig::I2,
            ELEMENT_TYPE::U2 => TypeSig::U2,
            ELEMENT_TYPE::I4 => TypeSig::I4,
            ELEMENT_TYPE::U4 => TypeSig::U4,
            ELEMENT_TYPE::I8 => TypeSig::I8,
            ELEMENT_TYPE::U8 => TypeSig::U8,
            ELEMENT_TYPE::R4 => TypeSig::R4,
            ELEMENT_TYPE::R8 => TypeSig::R8,
            ELEMENT_TYPE::STRING => TypeSig::String,
            ELEMENT_TYPE::OBJECT => TypeSig::Object,
            ELEMENT_TYPE::I => TypeSig::I,
            ELEMENT_TYPE::U => TypeSig::U,
            ELEMENT_TYPE::TYPEDBYREF => TypeSig::TypedByRef,
            _ => return None,
        };
        Some(sig)
    }

    /// The type handle of a `Class` or `ValueType` signature
    #[must_use]
    pub fn type_handle(&self) -> Option<TypeDefOrRef> {
        match self {
            TypeSig::Class(handle) | TypeSig::ValueType(handle) => Some(*handle),
            _ => None,
        }
    }

    /// Rebuild this signature with every embedded type handle passed through `map`.
    ///
    /// # Errors
    /// Propagates the first error returned by `map`.
    pub fn try_map_types<E, F>(&self, map: &mut F) -> std::result::Result<TypeSig, E>
    where
        F: FnMut(TypeDefOrRef) -> std::result::Result<TypeDefOrRef, E>,
    {
        Ok(match self {
            TypeSig::Class(handle) => TypeSig::Class(map(*handle)?),
            TypeSig::ValueType(handle) => TypeSig::ValueType(map(*handle)?),
            TypeSig::SzArray(inner) => TypeSig::SzArray(Box::new(inner.try_map_types(map)?)),
            TypeSig::ByRef(inner) => TypeSig::ByRef(Box::new(inner.try_map_types(map)?)),
            TypeSig::Ptr(inner) => TypeSig::Ptr(Box::new(inner.try_map_types(map)?)),
            TypeSig::Pinned(inner) => TypeSig::Pinned(Box::new(inner.try_map_types(map)?)),
            TypeSig::Array(inner, shape) => {
                TypeSig::Array(Box::new(inner.try_map_types(map)?), shape.clone())
            }
            TypeSig::CModReqd(modifier, inner) => {
                TypeSig::CModReqd(map(*modifier)?, Box::new(inner.try_map_types(map)?))
            }
            TypeSig::CModOpt(modifier, inner) => {
                TypeSig::CModOpt(map(*modifier)?, Box::new(inner.try_map_types(map)?))
            }
            TypeSig::FnPtr(sig) => TypeSig::FnPtr(Box::new(sig.try_map_types(map)?)),
            TypeSig::GenericInst(base, args) => TypeSig::GenericInst(
                Box::new(base.try_map_types(map)?),
                args.iter()
                    .map(|arg| arg.try_map_types(map))
                    .collect::<std::result::Result<_, _>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Visit every type handle embedded in this signature
    pub fn for_each_type(&self, visit: &mut impl FnMut(TypeDefOrRef)) {
        match self {
            TypeSig::Class(handle) | TypeSig::ValueType(handle) => visit(*handle),
            TypeSig::SzArray(inner)
            | TypeSig::ByRef(inner)
            | TypeSig::Ptr(inner)
            | TypeSig::Pinned(inner)
            | TypeSig::Array(inner, _) => inner.for_each_type(visit),
            TypeSig::CModReqd(modifier, inner) | TypeSig::CModOpt(modifier, inner) => {
                visit(*modifier);
                inner.for_each_type(visit);
            }
            TypeSig::FnPtr(sig) => sig.for_each_type(visit),
            TypeSig::GenericInst(base, args) => {
                base.for_each_type(visit);
                for arg in args {
                    arg.for_each_type(visit);
                }
            }
            _ => {}
        }
    }
}

/// A method signature (`MethodDefSig` / `MethodRefSig`, II.23.2.1-2).
///
/// Call-site signatures of vararg methods carry the extra arguments after a sentinel;
/// `sentinel` is the index in `params` where they start.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Calling convention kind, one of the [`CALLING_CONVENTION`] kinds
    pub calling_convention: u8,
    /// Instance method (`HASTHIS`)
    pub has_this: bool,
    /// `this` is passed explicitly as the first parameter
    pub explicit_this: bool,
    /// Number of generic method parameters (0 if not generic)
    pub generic_param_count: u32,
    /// Return type
    pub return_type: TypeSig,
    /// Parameter types in declaration order
    pub params: Vec<TypeSig>,
    /// Position of the vararg sentinel in `params`
    pub sentinel: Option<usize>,
}

impl MethodSig {
    /// A static method signature
    #[must_use]
    pub fn new_static(return_type: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            calling_convention: CALLING_CONVENTION::DEFAULT,
            has_this: false,
            explicit_this: false,
            generic_param_count: 0,
            return_type,
            params,
            sentinel: None,
        }
    }

    /// An instance method signature
    #[must_use]
    pub fn new_instance(return_type: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            has_this: true,
            ..Self::new_static(return_type, params)
        }
    }

    /// The signature of a parameterless instance constructor: `instance void ()`
    #[must_use]
    pub fn parameterless_constructor() -> Self {
        Self::new_instance(TypeSig::Void, Vec::new())
    }

    /// Rebuild this signature with every embedded type handle passed through `map`.
    ///
    /// # Errors
    /// Propagates the first error returned by `map`.
    pub fn try_map_types<E, F>(&self, map: &mut F) -> std::result::Result<MethodSig, E>
    where
        F: FnMut(TypeDefOrRef) -> std::result::Result<TypeDefOrRef, E>,
    {
        Ok(MethodSig {
            calling_convention: self.calling_convention,
            has_this: self.has_this,
            explicit_this: self.explicit_this,
            generic_param_count: self.generic_param_count,
            return_type: self.return_type.try_map_types(map)?,
            params: self
                .params
                .iter()
                .map(|param| param.try_map_types(map))
                .collect::<std::result::Result<_, _>>()?,
            sentinel: self.sentinel,
        })
    }

    /// Visit every type handle embedded in this signature
    pub fn for_each_type(&self, visit: &mut impl FnMut(TypeDefOrRef)) {
        self.return_type.for_each_type(visit);
        for param in &self.params {
            param.for_each_type(visit);
        }
    }
}

/// A property signature (`PropertySig`, II.23.2.5)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertySig {
    /// Instance property (`HASTHIS`)
    pub has_this: bool,
    /// Property type
    pub property_type: TypeSig,
    /// Indexer parameter types
    pub params: Vec<TypeSig>,
}

impl PropertySig {
    /// Rebuild this signature with every embedded type handle passed through `map`.
    ///
    /// # Errors
    /// Propagates the first error returned by `map`.
    pub fn try_map_types<E, F>(&self, map: &mut F) -> std::result::Result<PropertySig, E>
    where
        F: FnMut(TypeDefOrRef) -> std::result::Result<TypeDefOrRef, E>,
    {
        Ok(PropertySig {
            has_this: self.has_this,
            property_type: self.property_type.try_map_types(map)?,
            params: self
                .params
                .iter()
                .map(|param| param.try_map_types(map))
                .collect::<std::result::Result<_, _>>()?,
        })
    }

    /// Visit every type handle embedded in this signature
    pub fn for_each_type(&self, visit: &mut impl FnMut(TypeDefOrRef)) {
        self.property_type.for_each_type(visit);
        for param in &self.params {
            param.for_each_type(visit);
        }
    }
}

/// The signature of a `MemberRef`: either a method or a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberSig {
    /// Method reference signature
    Method(MethodSig),
    /// Field reference signature
    Field(TypeSig),
}

impl MemberSig {
    /// Returns true for a method reference
    #[must_use]
    pub fn is_method(&self) -> bool {
        matches!(self, MemberSig::Method(_))
    }

    /// Rebuild this signature with every embedded type handle passed through `map`.
    ///
    /// # Errors
    /// Propagates the first error returned by `map`.
    pub fn try_map_types<E, F>(&self, map: &mut F) -> std::result::Result<MemberSig, E>
    where
        F: FnMut(TypeDefOrRef) -> std::result::Result<TypeDefOrRef, E>,
    {
        Ok(match self {
            MemberSig::Method(sig) => MemberSig::Method(sig.try_map_types(map)?),
            MemberSig::Field(sig) => MemberSig::Field(sig.try_map_types(map)?),
        })
    }

    /// Visit every type handle embedded in this signature
    pub fn for_each_type(&self, visit: &mut impl FnMut(TypeDefOrRef)) {
        match self {
            MemberSig::Method(sig) => sig.for_each_type(visit),
            MemberSig::Field(sig) => sig.for_each_type(visit),
        }
    }
}

/// The content of a `StandAloneSig` row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StandAloneSig {
    /// Local variable types of a method body, in slot order
    Locals(Vec<TypeSig>),
    /// A `calli` call-site signature
    Method(MethodSig),
}

impl StandAloneSig {
    /// Rebuild this signature with every embedded type handle passed through `map`.
    ///
    /// # Errors
    /// Propagates the first error returned by `map`.
    pub fn try_map_types<E, F>(&self, map: &mut F) -> std::result::Result<StandAloneSig, E>
    where
        F: FnMut(TypeDefOrRef) -> std::result::Result<TypeDefOrRef, E>,
    {
        Ok(match self {
            StandAloneSig::Locals(locals) => StandAloneSig::Locals(
                locals
                    .iter()
                    .map(|local| local.try_map_types(map))
                    .collect::<std::result::Result<_, _>>()?,
            ),
            StandAloneSig::Method(sig) => StandAloneSig::Method(sig.try_map_types(map)?),
        })
    }

    /// Visit every type handle embedded in this signature
    pub fn for_each_type(&self, visit: &mut impl FnMut(TypeDefOrRef)) {
        match self {
            StandAloneSig::Locals(locals) => {
                for local in locals {
                    local.for_each_type(visit);
                }
            }
            StandAloneSig::Method(sig) => sig.for_each_type(visit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::handles::{TypeDefId, TypeRefId};

    #[test]
    fn primitive_mapping() {
        for code in [ELEMENT_TYPE::VOID, ELEMENT_TYPE::I4, ELEMENT_TYPE::STRING] {
            let sig = TypeSig::from_primitive(code).unwrap();
            assert_eq!(sig.primitive().unwrap().0, code);
        }
        assert_eq!(TypeSig::I4.primitive().unwrap().1, "System.Int32");
        assert!(TypeSig::from_primitive(ELEMENT_TYPE::CLASS).is_none());
        assert!(TypeSig::Var(0).primitive().is_none());
    }

    #[test]
    fn map_types_reaches_nested_handles() {
        let sig = TypeSig::GenericInst(
            Box::new(TypeSig::Class(TypeDefOrRef::Ref(TypeRefId(0)))),
            vec![
                TypeSig::SzArray(Box::new(TypeSig::ValueType(TypeDefOrRef::Def(TypeDefId(1))))),
                TypeSig::I4,
            ],
        );

        let mut seen = Vec::new();
        sig.for_each_type(&mut |handle| seen.push(handle));
        assert_eq!(seen.len(), 2);

        let mapped = sig
            .try_map_types::<(), _>(&mut |_| Ok(TypeDefOrRef::Def(TypeDefId(7))))
            .unwrap();
        let mut mapped_seen = Vec::new();
        mapped.for_each_type(&mut |handle| mapped_seen.push(handle));
        assert_eq!(mapped_seen, vec![TypeDefOrRef::Def(TypeDefId(7)); 2]);
    }

    #[test]
    fn modifiers_and_function_pointers_expose_handles() {
        let sig = TypeSig::CModReqd(
            TypeDefOrRef::Ref(TypeRefId(4)),
            Box::new(TypeSig::FnPtr(Box::new(MethodSig::new_static(
                TypeSig::Class(TypeDefOrRef::Def(TypeDefId(2))),
                vec![TypeSig::Array(Box::new(TypeSig::I4), ArrayShape { rank: 2, ..ArrayShape::default() })],
            )))),
        );

        let mut seen = Vec::new();
        sig.for_each_type(&mut |handle| seen.push(handle));
        assert_eq!(
            seen,
            vec![TypeDefOrRef::Ref(TypeRefId(4)), TypeDefOrRef::Def(TypeDefId(2))]
        );
    }
}
