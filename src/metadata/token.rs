//! Metadata tokens and the tables they index.
//!
//! A token is a 32-bit value whose high byte names a metadata table and whose low 24 bits
//! hold a 1-based row index. Tokens appear in table rows, in signature blobs (compressed) and
//! as CIL instruction operands. Because module entities map 1:1 onto rows, the token of a
//! type, member or reference that existed when a module was loaded never changes while the
//! module is patched, and the writer keeps it unchanged on disk. Rows of the sorted tables
//! (custom attributes, interface implementations, generic parameters, ...) are reordered by
//! their parent on write.

use std::fmt;

use strum::{EnumCount, EnumIter, FromRepr};

/// Table byte used by `ldstr` operands, which index the `#US` heap rather than a table.
pub const USER_STRING_TABLE: u8 = 0x70;

/// The metadata tables of ECMA-335 II.22.
///
/// The discriminant is the table number used in tokens and in the `valid` bit vector of the
/// tables stream; declaration order is the on-disk order of row counts and row data.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, EnumIter, EnumCount, FromRepr, strum::Display)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TableId {
    /// `Module` (0x00) - the single row naming this module
    Module = 0x00,
    /// `TypeRef` (0x01) - references to types, usually in other assemblies
    TypeRef = 0x01,
    /// `TypeDef` (0x02) - types defined in this module
    TypeDef = 0x02,
    FieldPtr = 0x03,
    /// `Field` (0x04) - field definitions
    Field = 0x04,
    MethodPtr = 0x05,
    /// `MethodDef` (0x06) - method definitions, optionally with a CIL body
    MethodDef = 0x06,
    ParamPtr = 0x07,
    /// `Param` (0x08) - named parameters of method definitions
    Param = 0x08,
    InterfaceImpl = 0x09,
    /// `MemberRef` (0x0A) - references to methods and fields by parent, name and signature
    MemberRef = 0x0A,
    Constant = 0x0B,
    /// `CustomAttribute` (0x0C) - attribute instances attached to metadata entities
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    /// `StandAloneSig` (0x11) - local variable and `calli` signatures
    StandAloneSig = 0x11,
    EventMap = 0x12,
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    /// `TypeSpec` (0x1B) - constructed types (generic instances, arrays, ...)
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRVA = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
    /// `Assembly` (0x20) - the manifest of an assembly's main module
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOS = 0x22,
    /// `AssemblyRef` (0x23) - referenced assemblies
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOS = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    /// `NestedClass` (0x29) - nesting relation between type definitions
    NestedClass = 0x29,
    GenericParam = 0x2A,
    /// `MethodSpec` (0x2B) - generic method instantiations
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
}

/// A metadata token representing a reference to a metadata table entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// The token of the module row, used as the parent of module-level attributes
    pub const MODULE: Token = Token(0x0000_0001);

    /// The token of the assembly manifest row
    pub const ASSEMBLY: Token = Token(0x2000_0001);

    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table and a 1-based row index
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table byte from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the table, if the table byte names one this crate understands
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_repr(self.table())
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
