//! Custom attribute value blobs (ECMA-335 II.23.3).
//!
//! The engine only ever writes attributes with a parameterless constructor, and only ever
//! reads one kind of argument: the single `System.Type` argument of an export marker, which
//! is stored as a `SerString` holding the (possibly assembly-qualified) type name.

use crate::{
    file::{io::write_compressed_uint, parser::Parser},
    Result,
};

/// Prolog that starts every custom attribute value
pub const PROLOG: u16 = 0x0001;

/// The value of an attribute constructed without arguments: prolog and zero named arguments
#[must_use]
pub fn parameterless_value() -> Vec<u8> {
    vec![0x01, 0x00, 0x00, 0x00]
}

/// Encode an attribute value whose constructor takes one `System.Type` argument.
#[must_use]
pub fn encode_type_argument(type_name: &str) -> Vec<u8> {
    let mut value = Vec::with_capacity(type_name.len() + 6);
    value.extend_from_slice(&PROLOG.to_le_bytes());
    #[allow(clippy::cast_possible_truncation)]
    write_compressed_uint(type_name.len() as u32, &mut value);
    value.extend_from_slice(type_name.as_bytes());
    value.extend_from_slice(&[0x00, 0x00]);
    value
}

/// Decode the single `System.Type` argument of an attribute value.
///
/// Returns `Ok(None)` for a null type argument.
///
/// # Errors
/// Returns an error if the prolog is wrong or the string is truncated or not UTF-8.
pub fn decode_type_argument(value: &[u8]) -> Result<Option<String>> {
    let mut parser = Parser::new(value);
    let prolog = parser.read_le::<u16>()?;
    if prolog != PROLOG {
        return Err(malformed_error!(
            "Invalid custom attribute prolog - 0x{:04x}",
            prolog
        ));
    }

    Ok(parser.read_ser_string()?.map(str::to_string))
}

/// Drop the assembly qualification of a serialized type name.
///
/// `NS.Attr, Support, Version=1.0.0.0` becomes `NS.Attr`.
#[must_use]
pub fn strip_assembly_qualifier(type_name: &str) -> &str {
    match type_name.split_once(',') {
        Some((name, _)) => name.trim(),
        None => type_name.trim(),
    }
}

/// Split a full type name into namespace and simple name at the last `.` before any `+`.
///
/// Nested names (`NS.Outer+Inner`) keep the nesting in the returned name.
#[must_use]
pub fn split_type_name(full_name: &str) -> (&str, &str) {
    let top_level_end = full_name.find('+').unwrap_or(full_name.len());
    match full_name[..top_level_end].rfind('.') {
        Some(dot) => (&full_name[..dot], &full_name[dot + 1..]),
        None => ("", full_name),
    }
}
