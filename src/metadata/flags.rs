//! Attribute flag sets for type, method, field and parameter rows (ECMA-335 II.23.1).
//!
//! Flags are stored with `from_bits_retain` so bits this crate does not name survive a
//! read/write cycle unchanged.

use bitflags::bitflags;

bitflags! {
    /// `TypeAttributes` of a `TypeDef` row
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeAttributes: u32 {
        /// Type is visible outside its assembly
        const PUBLIC = 0x0000_0001;
        /// Nested type with public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Nested type with private visibility
        const NESTED_PRIVATE = 0x0000_0003;
        /// Nested type visible to its assembly only
        const NESTED_ASSEMBLY = 0x0000_0005;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Type is abstract
        const ABSTRACT = 0x0000_0080;
        /// Type cannot be derived from
        const SEALED = 0x0000_0100;
        /// Name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Type is imported from COM
        const IMPORT = 0x0000_1000;
        /// Type is serializable
        const SERIALIZABLE = 0x0000_2000;
        /// Static initializer may run lazily
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

bitflags! {
    /// `MethodAttributes` of a `MethodDef` row
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodAttributes: u16 {
        /// Accessible only by the declaring type
        const PRIVATE = 0x0001;
        /// Accessible by the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible by everyone
        const PUBLIC = 0x0006;
        /// Defined on the type rather than per instance
        const STATIC = 0x0010;
        /// Cannot be overridden
        const FINAL = 0x0020;
        /// Virtual dispatch
        const VIRTUAL = 0x0040;
        /// Hidden by name and signature
        const HIDE_BY_SIG = 0x0080;
        /// Always gets a new vtable slot
        const NEW_SLOT = 0x0100;
        /// No implementation provided
        const ABSTRACT = 0x0400;
        /// Name is special
        const SPECIAL_NAME = 0x0800;
        /// Runtime interprets the name (`.ctor`, `.cctor`)
        const RT_SPECIAL_NAME = 0x1000;
        /// Implemented by a native import (`ImplMap`)
        const PINVOKE_IMPL = 0x2000;
    }
}

bitflags! {
    /// `FieldAttributes` of a `Field` row
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldAttributes: u16 {
        /// Accessible only by the declaring type
        const PRIVATE = 0x0001;
        /// Accessible by the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible by everyone
        const PUBLIC = 0x0006;
        /// Defined on the type rather than per instance
        const STATIC = 0x0010;
        /// Assignable only in constructors
        const INIT_ONLY = 0x0020;
        /// Compile-time constant
        const LITERAL = 0x0040;
        /// Has mapped initial data (`FieldRVA`)
        const HAS_FIELD_RVA = 0x0100;
        /// Has a marshalling descriptor
        const HAS_FIELD_MARSHAL = 0x1000;
        /// Has a default value (`Constant`)
        const HAS_DEFAULT = 0x8000;
    }
}

bitflags! {
    /// `ParamAttributes` of a `Param` row
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParamAttributes: u16 {
        /// Input parameter
        const IN = 0x0001;
        /// Output parameter
        const OUT = 0x0002;
        /// Optional parameter
        const OPTIONAL = 0x0010;
        /// Has a default value
        const HAS_DEFAULT = 0x1000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_are_retained() {
        let flags = TypeAttributes::from_bits_retain(0x0010_0101 | 0x4000_0000);
        assert!(flags.contains(TypeAttributes::PUBLIC | TypeAttributes::SEALED));
        assert_eq!(flags.bits(), 0x4010_0101);
    }

    #[test]
    fn method_flags() {
        let flags = MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG;
        assert_eq!(flags.bits(), 0x0086);
        assert!(!flags.contains(MethodAttributes::STATIC));
    }
}
