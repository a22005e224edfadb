//! Metadata heaps: `#Strings`, `#Blob`, `#US` and `#GUID` (ECMA-335 II.24.2.2 - II.24.2.5).
//!
//! The readers borrow the heap bytes of a loaded image and hand out slices. The builders are
//! used by the image writer: each interns its values so that identical strings and blobs are
//! stored once, and index 0 always holds the empty entry.

use std::collections::HashMap;

use uguid::Guid;
use widestring::{U16Str, U16String};

use crate::{
    file::{io::write_compressed_uint, parser::Parser},
    Error::OutOfBounds,
    Result,
};

/// The `#Strings` heap: NUL-terminated UTF-8 identifiers.
pub struct Strings<'a> {
    data: &'a [u8],
}

impl<'a> Strings<'a> {
    /// Wrap the raw heap bytes.
    ///
    /// # Errors
    /// Returns an error if the heap does not start with the empty string.
    pub fn from(data: &'a [u8]) -> Result<Strings<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Invalid memory for #Strings heap"));
        }

        Ok(Strings { data })
    }

    /// Get the string starting at `index`.
    ///
    /// # Errors
    /// Returns an error if the index is out of bounds, unterminated or not UTF-8.
    pub fn get(&self, index: usize) -> Result<&'a str> {
        if index >= self.data.len() {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(&self.data[index..]);
        parser.read_string_utf8()
    }
}

/// The `#Blob` heap: length-prefixed binary values (signatures, attribute values, ...).
pub struct Blob<'a> {
    data: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Wrap the raw heap bytes.
    ///
    /// # Errors
    /// Returns an error if the heap does not start with the empty blob.
    pub fn from(data: &'a [u8]) -> Result<Blob<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Invalid memory for #Blob heap"));
        }

        Ok(Blob { data })
    }

    /// Get the blob starting at `index`.
    ///
    /// # Errors
    /// Returns an error if the length prefix or data run past the end of the heap.
    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
        if index >= self.data.len() {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;
        parser.read_bytes(len)
    }
}

/// The `#US` heap: UTF-16 string literals referenced by `ldstr`.
pub struct UserStrings<'a> {
    data: &'a [u8],
}

impl<'a> UserStrings<'a> {
    /// Wrap the raw heap bytes.
    ///
    /// # Errors
    /// Returns an error if the heap does not start with the empty entry.
    pub fn from(data: &'a [u8]) -> Result<UserStrings<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(OutOfBounds);
        }

        Ok(UserStrings { data })
    }

    /// Decode the user string at `index`.
    ///
    /// # Errors
    /// Returns an error if the entry is truncated or has an even byte length (the trailing
    /// flag byte is missing).
    pub fn get(&self, index: usize) -> Result<String> {
        if index >= self.data.len() {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        if len % 2 == 0 {
            return Err(malformed_error!(
                "Invalid user string length {} at index - {}",
                len,
                index
            ));
        }

        let bytes = parser.read_bytes(len - 1)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(U16Str::from_slice(&units).to_string_lossy())
    }
}

/// The `#GUID` heap: 16-byte values addressed by 1-based index.
pub struct Guids<'a> {
    data: &'a [u8],
}

impl<'a> Guids<'a> {
    /// Wrap the raw heap bytes.
    ///
    /// # Errors
    /// Returns an error if the heap is not a whole number of GUIDs.
    pub fn from(data: &'a [u8]) -> Result<Guids<'a>> {
        if data.len() % 16 != 0 {
            return Err(malformed_error!("Invalid memory for #GUID heap - {} bytes", data.len()));
        }

        Ok(Guids { data })
    }

    /// Get the GUID at 1-based `index`; index 0 is the null GUID.
    ///
    /// # Errors
    /// Returns an error if the index lies past the end of the heap.
    pub fn get(&self, index: usize) -> Result<Guid> {
        if index == 0 {
            return Ok(Guid::ZERO);
        }

        let start = (index - 1) * 16;
        let Some(bytes) = self.data.get(start..start + 16) else {
            return Err(OutOfBounds);
        };
        let mut raw = [0_u8; 16];
        raw.copy_from_slice(bytes);
        Ok(Guid::from_bytes(raw))
    }
}

/// Builds a `#Strings` heap, storing each distinct string once.
pub struct StringHeapBuilder {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Default for StringHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StringHeapBuilder {
    /// A heap holding only the empty string
    #[must_use]
    pub fn new() -> Self {
        StringHeapBuilder {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }

    /// Intern `value`, returning its heap index
    pub fn add(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(offset) = self.offsets.get(value) {
            return *offset;
        }

        #[allow(clippy::cast_possible_truncation)]
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.offsets.insert(value.to_string(), offset);
        offset
    }

    /// The finished heap bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Builds a `#Blob` heap, storing each distinct blob once.
pub struct BlobHeapBuilder {
    data: Vec<u8>,
    offsets: HashMap<Vec<u8>, u32>,
}

impl Default for BlobHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobHeapBuilder {
    /// A heap holding only the empty blob
    #[must_use]
    pub fn new() -> Self {
        BlobHeapBuilder {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }

    /// Intern `value`, returning its heap index
    pub fn add(&mut self, value: &[u8]) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(offset) = self.offsets.get(value) {
            return *offset;
        }

        #[allow(clippy::cast_possible_truncation)]
        let offset = self.data.len() as u32;
        #[allow(clippy::cast_possible_truncation)]
        write_compressed_uint(value.len() as u32, &mut self.data);
        self.data.extend_from_slice(value);
        self.offsets.insert(value.to_vec(), offset);
        offset
    }

    /// The finished heap bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Builds a `#US` heap, storing each distinct literal once.
pub struct UserStringHeapBuilder {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Default for UserStringHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStringHeapBuilder {
    /// A heap holding only the empty entry
    #[must_use]
    pub fn new() -> Self {
        UserStringHeapBuilder {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }

    /// Intern `value`, returning its heap index (the low 24 bits of an `ldstr` token)
    pub fn add(&mut self, value: &str) -> u32 {
        if let Some(offset) = self.offsets.get(value) {
            return *offset;
        }

        let units = U16String::from_str(value).into_vec();

        #[allow(clippy::cast_possible_truncation)]
        let offset = self.data.len() as u32;
        #[allow(clippy::cast_possible_truncation)]
        write_compressed_uint((units.len() * 2 + 1) as u32, &mut self.data);
        for unit in &units {
            self.data.extend_from_slice(&unit.to_le_bytes());
        }
        self.data.push(u8::from(units.iter().any(|&unit| needs_special_handling(unit))));

        self.offsets.insert(value.to_string(), offset);
        offset
    }

    /// The finished heap bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Builds a `#GUID` heap, storing each distinct GUID once.
#[derive(Default)]
pub struct GuidHeapBuilder {
    data: Vec<u8>,
}

impl GuidHeapBuilder {
    /// An empty heap
    #[must_use]
    pub fn new() -> Self {
        GuidHeapBuilder { data: Vec::new() }
    }

    /// Intern `value`, returning its 1-based index; the null GUID is index 0
    pub fn add(&mut self, value: Guid) -> u32 {
        if value == Guid::ZERO {
            return 0;
        }

        let bytes = value.to_bytes();
        let existing = self.data.chunks_exact(16).position(|chunk| chunk == bytes);
        let slot = existing.unwrap_or_else(|| {
            self.data.extend_from_slice(&bytes);
            self.data.len() / 16 - 1
        });
        #[allow(clippy::cast_possible_truncation)]
        let index = slot as u32 + 1;
        index
    }

    /// The finished heap bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

// II.24.2.4: the trailing byte is 1 if any character needs more than a plain 8-bit copy.
fn needs_special_handling(unit: u16) -> bool {
    unit > 0xFF || matches!(unit, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_dedup_and_lookup() {
        let mut builder = StringHeapBuilder::new();
        let first = builder.add("Foo");
        let empty = builder.add("");
        let again = builder.add("Foo");
        let second = builder.add("Bar");
        let data = builder.into_bytes();

        assert_eq!(first, again);
        assert_eq!(empty, 0);
        assert_eq!(data, b"\0Foo\0Bar\0");

        let heap = Strings::from(&data).unwrap();
        assert_eq!(heap.get(first as usize).unwrap(), "Foo");
        assert_eq!(heap.get(second as usize).unwrap(), "Bar");
        assert_eq!(heap.get(0).unwrap(), "");
        assert!(heap.get(data.len()).is_err());
    }

    #[test]
    fn blob_dedup_and_lookup() {
        let mut builder = BlobHeapBuilder::new();
        let sig = builder.add(&[0x20, 0x00, 0x01]);
        assert_eq!(builder.add(&[0x20, 0x00, 0x01]), sig);
        let big = builder.add(&[0xAB; 200]);
        let data = builder.into_bytes();

        let heap = Blob::from(&data).unwrap();
        assert_eq!(heap.get(sig as usize).unwrap(), &[0x20, 0x00, 0x01]);
        assert_eq!(heap.get(big as usize).unwrap(), &[0xAB; 200][..]);
        assert!(heap.get(0).unwrap().is_empty());
    }

    #[test]
    fn blob_truncated() {
        let data = [0x00, 0x05, 0x01, 0x02];
        let heap = Blob::from(&data).unwrap();
        assert!(heap.get(1).is_err());
        assert!(Blob::from(&[0x01]).is_err());
    }

    #[test]
    fn user_strings() {
        let mut builder = UserStringHeapBuilder::new();
        let hello = builder.add("Hello, World!");
        let umlaut = builder.add("Grüße");
        assert_eq!(builder.add("Hello, World!"), hello);
        let data = builder.into_bytes();

        // 13 UTF-16 units -> 26 bytes + flag
        assert_eq!(data[hello as usize], 27);
        assert_eq!(data[hello as usize + 27], 0);

        let heap = UserStrings::from(&data).unwrap();
        assert_eq!(heap.get(hello as usize).unwrap(), "Hello, World!");
        assert_eq!(heap.get(umlaut as usize).unwrap(), "Grüße");
    }

    #[test]
    fn guid_heap() {
        let first = uguid::guid!("01234567-89ab-cdef-0123-456789abcdef");
        let second = uguid::guid!("fedcba98-7654-3210-fedc-ba9876543210");
        let mut builder = GuidHeapBuilder::new();
        assert_eq!(builder.add(Guid::ZERO), 0);
        assert_eq!(builder.add(first), 1);
        assert_eq!(builder.add(second), 2);
        assert_eq!(builder.add(first), 1);
        let data = builder.into_bytes();
        assert_eq!(data.len(), 32);

        let heap = Guids::from(&data).unwrap();
        assert_eq!(heap.get(0).unwrap(), Guid::ZERO);
        assert_eq!(heap.get(2).unwrap(), second);
        assert!(heap.get(3).is_err());
        assert!(Guids::from(&data[..20]).is_err());
    }

    #[test]
    fn user_string_flag() {
        let mut builder = UserStringHeapBuilder::new();
        let index = builder.add("it's") as usize;
        let data = builder.into_bytes();
        assert_eq!(data[index + 9], 1);
    }
}
