//! The physical schema of the metadata tables (ECMA-335 II.22 and II.24.2.6).
//!
//! Rows are read into and written from a fixed-width [`Row`] of raw column values. The width
//! of a heap index, a plain table index or a coded index on disk depends on the heap sizes and
//! the row counts of the tables it can point at; [`TableInfo`] captures those counts and
//! computes every column and row size from them.

use strum::EnumCount;

use crate::{
    file::{io::write_le, parser::Parser},
    metadata::token::{TableId, Token},
    Error::OutOfBounds,
    Result,
};

/// Largest number of columns of any table (`Assembly` and `AssemblyRef`)
pub const MAX_COLUMNS: usize = 9;

/// Raw column values of one row; unused trailing slots are zero
pub type Row = [u32; MAX_COLUMNS];

/// Heap size flag: `#Strings` indexes are 4 bytes wide
pub const HEAP_LARGE_STRINGS: u8 = 0x01;
/// Heap size flag: `#GUID` indexes are 4 bytes wide
pub const HEAP_LARGE_GUID: u8 = 0x02;
/// Heap size flag: `#Blob` indexes are 4 bytes wide
pub const HEAP_LARGE_BLOB: u8 = 0x04;
/// Heap size flag: four extra bytes follow the row counts
pub const HEAP_EXTRA_DATA: u8 = 0x40;

/// Tables whose rows must be sorted by their primary key column
pub const SORTED_TABLES: u64 = 0x0000_1600_3301_FA00;

/// The coded index kinds of II.24.2.6.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
#[allow(missing_docs)]
pub enum CodedIndexType {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndexType {
    /// The tables addressed by each tag value; `None` marks an unused tag
    #[must_use]
    pub fn tables(self) -> &'static [Option<TableId>] {
        use TableId as T;
        match self {
            CodedIndexType::TypeDefOrRef => &[Some(T::TypeDef), Some(T::TypeRef), Some(T::TypeSpec)],
            CodedIndexType::HasConstant => &[Some(T::Field), Some(T::Param), Some(T::Property)],
            CodedIndexType::HasCustomAttribute => &[
                Some(T::MethodDef),
                Some(T::Field),
                Some(T::TypeRef),
                Some(T::TypeDef),
                Some(T::Param),
                Some(T::InterfaceImpl),
                Some(T::MemberRef),
                Some(T::Module),
                Some(T::DeclSecurity),
                Some(T::Property),
                Some(T::Event),
                Some(T::StandAloneSig),
                Some(T::ModuleRef),
                Some(T::TypeSpec),
                Some(T::Assembly),
                Some(T::AssemblyRef),
                Some(T::File),
                Some(T::ExportedType),
                Some(T::ManifestResource),
                Some(T::GenericParam),
                Some(T::GenericParamConstraint),
                Some(T::MethodSpec),
            ],
            CodedIndexType::HasFieldMarshal => &[Some(T::Field), Some(T::Param)],
            CodedIndexType::HasDeclSecurity => &[Some(T::TypeDef), Some(T::MethodDef), Some(T::Assembly)],
            CodedIndexType::MemberRefParent => &[
                Some(T::TypeDef),
                Some(T::TypeRef),
                Some(T::ModuleRef),
                Some(T::MethodDef),
                Some(T::TypeSpec),
            ],
            CodedIndexType::HasSemantics => &[Some(T::Event), Some(T::Property)],
            CodedIndexType::MethodDefOrRef => &[Some(T::MethodDef), Some(T::MemberRef)],
            CodedIndexType::MemberForwarded => &[Some(T::Field), Some(T::MethodDef)],
            CodedIndexType::Implementation => &[Some(T::File), Some(T::AssemblyRef), Some(T::ExportedType)],
            // tags 0, 1 and 4 are reserved
            CodedIndexType::CustomAttributeType => {
                &[None, None, Some(T::MethodDef), Some(T::MemberRef), None]
            }
            CodedIndexType::ResolutionScope => &[
                Some(T::Module),
                Some(T::ModuleRef),
                Some(T::AssemblyRef),
                Some(T::TypeRef),
            ],
            CodedIndexType::TypeOrMethodDef => &[Some(T::TypeDef), Some(T::MethodDef)],
        }
    }

    /// Number of low bits holding the tag
    #[must_use]
    pub fn tag_bits(self) -> u32 {
        let count = self.tables().len() as u32;
        u32::BITS - (count - 1).leading_zeros()
    }
}

/// The kind of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    /// A 1-based row index into one table
    Index(TableId),
    Coded(CodedIndexType),
}

/// The column layout of `table`
#[must_use]
pub fn columns(table: TableId) -> &'static [Column] {
    use CodedIndexType as C;
    use Column::{Blob, Coded, Guid, Index, Str, U16, U32};
    use TableId as T;

    match table {
        T::Module => &[U16, Str, Guid, Guid, Guid],
        T::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
        T::TypeDef => &[U32, Str, Str, Coded(C::TypeDefOrRef), Index(T::Field), Index(T::MethodDef)],
        T::FieldPtr => &[Index(T::Field)],
        T::Field => &[U16, Str, Blob],
        T::MethodPtr => &[Index(T::MethodDef)],
        T::MethodDef => &[U32, U16, U16, Str, Blob, Index(T::Param)],
        T::ParamPtr => &[Index(T::Param)],
        T::Param => &[U16, U16, Str],
        T::InterfaceImpl => &[Index(T::TypeDef), Coded(C::TypeDefOrRef)],
        T::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
        T::Constant => &[U16, Coded(C::HasConstant), Blob],
        T::CustomAttribute => &[Coded(C::HasCustomAttribute), Coded(C::CustomAttributeType), Blob],
        T::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
        T::DeclSecurity => &[U16, Coded(C::HasDeclSecurity), Blob],
        T::ClassLayout => &[U16, U32, Index(T::TypeDef)],
        T::FieldLayout => &[U32, Index(T::Field)],
        T::StandAloneSig => &[Blob],
        T::EventMap => &[Index(T::TypeDef), Index(T::Event)],
        T::EventPtr => &[Index(T::Event)],
        T::Event => &[U16, Str, Coded(C::TypeDefOrRef)],
        T::PropertyMap => &[Index(T::TypeDef), Index(T::Property)],
        T::PropertyPtr => &[Index(T::Property)],
        T::Property => &[U16, Str, Blob],
        T::MethodSemantics => &[U16, Index(T::MethodDef), Coded(C::HasSemantics)],
        T::MethodImpl => &[Index(T::TypeDef), Coded(C::MethodDefOrRef), Coded(C::MethodDefOrRef)],
        T::ModuleRef => &[Str],
        T::TypeSpec => &[Blob],
        T::ImplMap => &[U16, Coded(C::MemberForwarded), Str, Index(T::ModuleRef)],
        T::FieldRVA => &[U32, Index(T::Field)],
        T::EncLog => &[U32, U32],
        T::EncMap => &[U32],
        T::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        T::AssemblyProcessor => &[U32],
        T::AssemblyOS => &[U32, U32, U32],
        T::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        T::AssemblyRefProcessor => &[U32, Index(T::AssemblyRef)],
        T::AssemblyRefOS => &[U32, U32, U32, Index(T::AssemblyRef)],
        T::File => &[U32, Str, Blob],
        T::ExportedType => &[U32, U32, Str, Str, Coded(C::Implementation)],
        T::ManifestResource => &[U32, U32, Str, Coded(C::Implementation)],
        T::NestedClass => &[Index(T::TypeDef), Index(T::TypeDef)],
        T::GenericParam => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
        T::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
        T::GenericParamConstraint => &[Index(T::GenericParam), Coded(C::TypeDefOrRef)],
    }
}

/// Row counts and heap index widths of one tables stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    rows: [u32; TableId::COUNT],
    heap_sizes: u8,
}

impl Default for TableInfo {
    fn default() -> Self {
        TableInfo {
            rows: [0; TableId::COUNT],
            heap_sizes: 0,
        }
    }
}

impl TableInfo {
    /// Create table info from per-table row counts and the heap size flags
    #[must_use]
    pub fn new(rows: [u32; TableId::COUNT], heap_sizes: u8) -> Self {
        TableInfo { rows, heap_sizes }
    }

    /// Number of rows in `table`
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[table as usize]
    }

    /// Set the number of rows in `table`
    pub fn set_rows(&mut self, table: TableId, count: u32) {
        self.rows[table as usize] = count;
    }

    /// The heap size flags byte
    #[must_use]
    pub fn heap_sizes(&self) -> u8 {
        self.heap_sizes
    }

    /// The `valid` bit vector: one bit per non-empty table
    #[must_use]
    pub fn valid(&self) -> u64 {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, rows)| **rows > 0)
            .fold(0, |valid, (table, _)| valid | (1 << table))
    }

    /// Returns true if `token` names an existing row
    #[must_use]
    pub fn contains(&self, token: Token) -> bool {
        match token.table_id() {
            Some(table) => token.row() >= 1 && token.row() <= self.rows(table),
            None => false,
        }
    }

    fn coded_is_large(&self, kind: CodedIndexType) -> bool {
        let limit = 1_u32 << (16 - kind.tag_bits());
        kind.tables()
            .iter()
            .flatten()
            .any(|table| self.rows(*table) >= limit)
    }

    /// Size of one column in bytes
    #[must_use]
    pub fn column_size(&self, column: Column) -> usize {
        let large = match column {
            Column::U16 => false,
            Column::U32 => true,
            Column::Str => self.heap_sizes & HEAP_LARGE_STRINGS != 0,
            Column::Guid => self.heap_sizes & HEAP_LARGE_GUID != 0,
            Column::Blob => self.heap_sizes & HEAP_LARGE_BLOB != 0,
            Column::Index(table) => self.rows(table) > 0xFFFF,
            Column::Coded(kind) => self.coded_is_large(kind),
        };
        if large {
            4
        } else {
            2
        }
    }

    /// Size of one row of `table` in bytes
    #[must_use]
    pub fn row_size(&self, table: TableId) -> usize {
        columns(table)
            .iter()
            .map(|column| self.column_size(*column))
            .sum()
    }

    /// Turn a coded index value into a token; a zero row yields a null-row token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unused tag.
    pub fn decode_coded_index(&self, value: u32, kind: CodedIndexType) -> Result<Token> {
        let bits = kind.tag_bits();
        let tag = (value & ((1 << bits) - 1)) as usize;
        let row = value >> bits;
        match kind.tables().get(tag).copied().flatten() {
            Some(table) => Ok(Token::from_parts(table, row)),
            None => Err(malformed_error!("Invalid {:?} tag - {}", kind, tag)),
        }
    }

    /// Turn a token into a coded index value; a null token encodes as 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidToken`] if `token` names a table `kind` cannot address.
    pub fn encode_coded_index(&self, token: Token, kind: CodedIndexType) -> Result<u32> {
        if token.is_null() {
            return Ok(0);
        }
        let tag = kind
            .tables()
            .iter()
            .position(|table| table.is_some_and(|table| table as u8 == token.table()))
            .ok_or(crate::Error::InvalidToken(token))?;
        Ok((token.row() << kind.tag_bits()) | tag as u32)
    }

    /// Read one row of `table` at the parser's position
    ///
    /// # Errors
    /// Returns an out-of-bounds error if the row is truncated.
    pub fn read_row(&self, parser: &mut Parser, table: TableId) -> Result<Row> {
        let mut row = Row::default();
        for (slot, column) in columns(table).iter().enumerate() {
            row[slot] = match self.column_size(*column) {
                2 => u32::from(parser.read_le::<u16>()?),
                _ => parser.read_le::<u32>()?,
            };
        }
        Ok(row)
    }

    /// Append one row of `table` to `out`.
    ///
    /// # Errors
    /// Returns an out-of-bounds error if a value does not fit its column.
    pub fn write_row(&self, out: &mut Vec<u8>, table: TableId, row: &Row) -> Result<()> {
        for (slot, column) in columns(table).iter().enumerate() {
            if self.column_size(*column) == 2 {
                let value = u16::try_from(row[slot]).map_err(|_| OutOfBounds)?;
                write_le(out, value);
            } else {
                write_le(out, row[slot]);
            }
        }
        Ok(())
    }
}
