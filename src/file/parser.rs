//! Sequential reader over a borrowed byte slice.
//!
//! [`Parser`] is the single cursor type behind every structured read in the crate. The PE
//! headers, the CLI header, the metadata root, table rows, heap entries, signature blobs,
//! custom attribute values and CIL code streams are all decoded through it, so every format
//! shares the same bounds checks and the same error reporting.
//!
//! # Architecture
//!
//! - **Borrowed input**: the parser never copies. Byte slices and strings it returns borrow
//!   from the input with the input's lifetime.
//! - **Checked position**: every read and every seek is validated against the input length and
//!   reports [`crate::Error::OutOfBounds`] instead of panicking.
//! - **Typed primitives**: fixed-width values go through the `CilIO` trait, which is
//!   implemented for the integer and float widths used by ECMA-335.
//! - **Compressed encodings**: the variable-length unsigned integers and `TypeDefOrRef` tokens
//!   of II.23.2 are decoded in place.
//!
//! # Key Components
//!
//! ## Navigation
//!
//! - [`Parser::pos`], [`Parser::seek`] and [`Parser::advance_by`] move the cursor
//! - [`Parser::align`] skips to the next multiple of an alignment
//! - [`Parser::has_more_data`] and [`Parser::peek_byte`] look ahead without consuming
//!
//! ## Reading
//!
//! - [`Parser::read_le`] for fixed-width little-endian values
//! - [`Parser::read_bytes`] for raw slices
//! - [`Parser::read_compressed_uint`] and [`Parser::read_compressed_token`] for signature data
//! - [`Parser::read_string_utf8`] for NUL-terminated heap and stream names
//! - [`Parser::read_ser_string`] for custom attribute `SerString` values
//!
//! # Usage Examples
//!
//! ## Fixed-width fields
//!
//! ```rust
//! use dotpatch::Parser;
//!
//! let data = [0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_le::<u16>()?, 0x5A4D);
//! parser.advance_by(2)?;
//! assert_eq!(parser.read_le::<u32>()?, 3);
//! assert!(!parser.has_more_data());
//! assert!(parser.read_le::<u8>().is_err());
//! # Ok::<(), dotpatch::Error>(())
//! ```
//!
//! ## Signature blobs
//!
//! ```rust
//! use dotpatch::Parser;
//!
//! // One-, two- and four-byte compressed integers, then a TypeRef token (row 0x12)
//! let blob = [0x03, 0x80, 0x80, 0xC0, 0x00, 0x40, 0x00, 0x49];
//! let mut parser = Parser::new(&blob);
//!
//! assert_eq!(parser.read_compressed_uint()?, 0x03);
//! assert_eq!(parser.read_compressed_uint()?, 0x80);
//! assert_eq!(parser.read_compressed_uint()?, 0x4000);
//!
//! let token = parser.read_compressed_token()?;
//! assert_eq!(token.table(), 0x01);
//! assert_eq!(token.row(), 0x12);
//! # Ok::<(), dotpatch::Error>(())
//! ```
//!
//! ## Strings
//!
//! ```rust
//! use dotpatch::Parser;
//!
//! let data = b"#Strings\0\x05Hello\xFF";
//! let mut parser = Parser::new(data);
//!
//! assert_eq!(parser.read_string_utf8()?, "#Strings");
//! assert_eq!(parser.read_ser_string()?, Some("Hello"));
//! assert_eq!(parser.read_ser_string()?, None);
//! # Ok::<(), dotpatch::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilIO},
    metadata::token::{TableId, Token},
    Result,
};

/// A cursor over a byte slice with little-endian and ECMA-335 compressed reads.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying data
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the underlying data is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if unread bytes remain
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current read position
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move to an absolute position.
    ///
    /// # Errors
    /// Returns an out-of-bounds error if `pos` lies beyond the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Skip `step` bytes.
    ///
    /// # Errors
    /// Returns an out-of-bounds error if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        match self.position.checked_add(step) {
            Some(end) if end <= self.data.len() => {
                self.position = end;
                Ok(())
            }
            _ => Err(out_of_bounds_error!()),
        }
    }

    /// Skip padding up to the next multiple of `alignment`.
    ///
    /// # Errors
    /// Returns an out-of-bounds error if the padding runs past the end of the data.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Look at the next byte without consuming it.
    ///
    /// # Errors
    /// Returns an out-of-bounds error at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(out_of_bounds_error!())
    }

    /// Read a little-endian primitive.
    ///
    /// # Errors
    /// Returns an out-of-bounds error if the value does not fit in the remaining data.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read the next `len` bytes as a slice of the underlying data.
    ///
    /// # Errors
    /// Returns an out-of-bounds error if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let start = self.position;
        self.advance_by(len)?;
        Ok(&self.data[start..self.position])
    }

    /// Read an ECMA-335 compressed unsigned integer (II.23.2).
    ///
    /// # Errors
    /// Returns a malformed error for an invalid leading byte, or out-of-bounds on truncation.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            return Ok(((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte));
        }

        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            return Ok(((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed `TypeDefOrRefOrSpec` token as used inside signature blobs.
    ///
    /// # Errors
    /// Returns a malformed error if the tag bits do not name a valid table.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table = match compressed_token & 0x3 {
            0x0 => TableId::TypeDef,
            0x1 => TableId::TypeRef,
            0x2 => TableId::TypeSpec,
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::from_parts(table, compressed_token >> 2))
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator.
    ///
    /// # Errors
    /// Returns a malformed error if no terminator is found or the bytes are not UTF-8.
    pub fn read_string_utf8(&mut self) -> Result<&'a str> {
        let start = self.position;
        let Some(len) = self.data[start..].iter().position(|&b| b == 0) else {
            return Err(malformed_error!("Unterminated string at offset {}", start));
        };

        let bytes = &self.data[start..start + len];
        self.position = start + len + 1;

        std::str::from_utf8(bytes)
            .map_err(|_| malformed_error!("Invalid UTF-8 string at offset {}", start))
    }

    /// Read a length-prefixed custom attribute string (`SerString`).
    ///
    /// Returns `None` for the null string marker `0xFF`.
    ///
    /// # Errors
    /// Returns an error on truncation or invalid UTF-8.
    pub fn read_ser_string(&mut self) -> Result<Option<&'a str>> {
        if self.peek_byte()? == 0xFF {
            self.position += 1;
            return Ok(None);
        }

        let len = self.read_compressed_uint()? as usize;
        let start = self.position;
        let bytes = self.read_bytes(len)?;

        std::str::from_utf8(bytes)
            .map(Some)
            .map_err(|_| malformed_error!("Invalid UTF-8 SerString at offset {}", start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_uint() {
        let data = [0x03, 0xAE, 0x57, 0xC0, 0x00, 0x40, 0x00];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x03);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x2E57);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x4000);
        assert!(!parser.has_more_data());
    }

    #[test]
    fn compressed_uint_invalid() {
        let mut parser = Parser::new(&[0xFF]);
        assert!(parser.read_compressed_uint().is_err());
    }

    #[test]
    fn compressed_token() {
        // TypeRef row 2 => (2 << 2) | 1
        let mut parser = Parser::new(&[0x09, 0x08, 0x0E]);
        assert_eq!(parser.read_compressed_token().unwrap(), Token::new(0x0100_0002));
        assert_eq!(parser.read_compressed_token().unwrap(), Token::new(0x0200_0002));
        assert_eq!(parser.read_compressed_token().unwrap(), Token::new(0x1B00_0003));
    }

    #[test]
    fn strings() {
        let data = b"System\0Object\0\x04Test\xFF";
        let mut parser = Parser::new(data);
        assert_eq!(parser.read_string_utf8().unwrap(), "System");
        assert_eq!(parser.read_string_utf8().unwrap(), "Object");
        assert_eq!(parser.read_ser_string().unwrap(), Some("Test"));
        assert_eq!(parser.read_ser_string().unwrap(), None);
        assert!(parser.read_string_utf8().is_err());
    }

    #[test]
    fn bounds() {
        let mut parser = Parser::new(&[0x01, 0x02, 0x03]);
        assert!(parser.advance_by(4).is_err());
        parser.advance_by(1).unwrap();
        assert_eq!(parser.read_bytes(2).unwrap(), &[0x02, 0x03]);
        assert!(parser.peek_byte().is_err());
        parser.seek(0).unwrap();
        parser.advance_by(1).unwrap();
        parser.align(4).unwrap_err();
    }
}
