//! Little-endian primitive I/O and ECMA-335 compressed integer encoding.
//!
//! Reading goes through [`read_le_at`], which is bounds checked and advances the caller's
//! offset. Writing appends to a growable `Vec<u8>` since every image and body is assembled in
//! memory before it is committed to disk.

use crate::{Error::OutOfBounds, Result};

/// Primitive types that can be read from and written to little-endian byte buffers.
pub trait CilIO: Sized {
    /// The fixed-size byte array backing this type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode a value from its little-endian representation
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encode a value into its little-endian representation
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $size:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $size];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
);

/// Reads a value of type `T` in little-endian order at `offset`, advancing the offset.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };

    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = T::Bytes::try_from(&data[*offset..end]) else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Reads a value of type `T` in little-endian order from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Appends `value` to `out` in little-endian order.
pub fn write_le<T: CilIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Appends an ECMA-335 compressed unsigned integer (II.23.2).
///
/// Values up to `0x7F` take one byte, up to `0x3FFF` two bytes, and up to `0x1FFF_FFFF` four
/// bytes. Larger values cannot be represented and are clamped by the caller's validation.
pub fn write_compressed_uint(value: u32, out: &mut Vec<u8>) {
    if value <= 0x7F {
        #[allow(clippy::cast_possible_truncation)]
        out.push(value as u8);
    } else if value <= 0x3FFF {
        #[allow(clippy::cast_possible_truncation)]
        {
            out.push(((value >> 8) as u8) | 0x80);
            out.push(value as u8);
        }
    } else {
        #[allow(clippy::cast_possible_truncation)]
        {
            out.push(((value >> 24) as u8 & 0x1F) | 0xC0);
            out.push((value >> 16) as u8);
            out.push((value >> 8) as u8);
            out.push(value as u8);
        }
    }
}

/// Number of bytes [`write_compressed_uint`] emits for `value`.
#[must_use]
pub fn compressed_uint_size(value: u32) -> usize {
    if value <= 0x7F {
        1
    } else if value <= 0x3FFF {
        2
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_le_advances() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        let mut offset = 0;
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 0x0201);
        assert_eq!(offset, 2);
        assert_eq!(read_le_at::<u8>(&data, &mut offset).unwrap(), 0x03);
        assert!(read_le_at::<u32>(&data, &mut offset).is_err());
        assert_eq!(offset, 3);
    }

    #[test]
    fn write_le_appends() {
        let mut out = Vec::new();
        write_le(&mut out, 0x1234_5678_u32);
        write_le(&mut out, -1_i16);
        assert_eq!(out, vec![0x78, 0x56, 0x34, 0x12, 0xFF, 0xFF]);
    }

    #[test]
    fn compressed_uint_sizes() {
        let cases: [(u32, &[u8]); 6] = [
            (0x03, &[0x03]),
            (0x7F, &[0x7F]),
            (0x80, &[0x80, 0x80]),
            (0x2E57, &[0xAE, 0x57]),
            (0x3FFF, &[0xBF, 0xFF]),
            (0x4000, &[0xC0, 0x00, 0x40, 0x00]),
        ];

        for (value, expected) in cases {
            let mut out = Vec::new();
            write_compressed_uint(value, &mut out);
            assert_eq!(out, expected, "encoding of {value:#x}");
            assert_eq!(compressed_uint_size(value), expected.len());
        }
    }
}
