use crate::{
    file::parser::Parser,
    metadata::{
        handles::TypeDefOrRef,
        signatures::{
            ArrayShape, MemberSig, MethodSig, PropertySig, StandAloneSig, TypeSig,
            CALLING_CONVENTION, ELEMENT_TYPE, MAX_RECURSION_DEPTH,
        },
    },
    Error, Result,
};

fn read_type(parser: &mut Parser, depth: usize) -> Result<TypeSig> {
    if depth >= MAX_RECURSION_DEPTH {
        return Err(Error::RecursionLimit(MAX_RECURSION_DEPTH));
    }

    let element_type = parser.read_le::<u8>()?;
    if let Some(primitive) = TypeSig::from_primitive(element_type) {
        return Ok(primitive);
    }

    match element_type {
        ELEMENT_TYPE::CLASS => Ok(TypeSig::Class(read_type_handle(parser)?)),
        ELEMENT_TYPE::VALUETYPE => Ok(TypeSig::ValueType(read_type_handle(parser)?)),
        ELEMENT_TYPE::SZARRAY => Ok(TypeSig::SzArray(Box::new(read_type(parser, depth + 1)?))),
        ELEMENT_TYPE::BYREF => Ok(TypeSig::ByRef(Box::new(read_type(parser, depth + 1)?))),
        ELEMENT_TYPE::PTR => Ok(TypeSig::Ptr(Box::new(read_type(parser, depth + 1)?))),
        ELEMENT_TYPE::PINNED => Ok(TypeSig::Pinned(Box::new(read_type(parser, depth + 1)?))),
        ELEMENT_TYPE::VAR => Ok(TypeSig::Var(parser.read_compressed_uint()?)),
        ELEMENT_TYPE::MVAR => Ok(TypeSig::MVar(parser.read_compressed_uint()?)),
        ELEMENT_TYPE::CMOD_REQD => {
            let modifier = read_type_handle(parser)?;
            Ok(TypeSig::CModReqd(modifier, Box::new(read_type(parser, depth + 1)?)))
        }
        ELEMENT_TYPE::CMOD_OPT => {
            let modifier = read_type_handle(parser)?;
            Ok(TypeSig::CModOpt(modifier, Box::new(read_type(parser, depth + 1)?)))
        }
        ELEMENT_TYPE::FNPTR => Ok(TypeSig::FnPtr(Box::new(read_method(parser, depth + 1)?))),
        ELEMENT_TYPE::ARRAY => {
            let element = read_type(parser, depth + 1)?;
            let rank = parser.read_compressed_uint()?;

            let size_count = parser.read_compressed_uint()?;
            if size_count > rank {
                return Err(malformed_error!("Array has {} sizes for rank {}", size_count, rank));
            }
            let mut sizes = Vec::with_capacity(size_count as usize);
            for _ in 0..size_count {
                sizes.push(parser.read_compressed_uint()?);
            }

            let bound_count = parser.read_compressed_uint()?;
            if bound_count > rank {
                return Err(malformed_error!("Array has {} bounds for rank {}", bound_count, rank));
            }
            let mut lower_bounds = Vec::with_capacity(bound_count as usize);
            for _ in 0..bound_count {
                lower_bounds.push(read_compressed_int(parser)?);
            }

            Ok(TypeSig::Array(
                Box::new(element),
                ArrayShape {
                    rank,
                    sizes,
                    lower_bounds,
                },
            ))
        }
        ELEMENT_TYPE::GENERICINST => {
            let base = read_type(parser, depth + 1)?;
            if !matches!(base, TypeSig::Class(_) | TypeSig::ValueType(_)) {
                return Err(malformed_error!(
                    "Generic instantiation over non-nominal type {:?}",
                    base
                ));
            }

            let count = parser.read_compressed_uint()?;
            let mut args = Vec::with_capacity(count.min(64) as usize);
            for _ in 0..count {
                args.push(read_type(parser, depth + 1)?);
            }

            Ok(TypeSig::GenericInst(Box::new(base), args))
        }
        _ => Err(malformed_error!(
            "Unsupported element type in signature - 0x{:02x}",
            element_type
        )),
    }
}

fn read_type_handle(parser: &mut Parser) -> Result<TypeDefOrRef> {
    TypeDefOrRef::from_token(parser.read_compressed_token()?)
}

/// A compressed signed integer (II.23.2): the sign is carried in the lowest bit of the
/// rotated value, and the width of the encoding decides where the sign extends from.
fn read_compressed_int(parser: &mut Parser) -> Result<i32> {
    let start = parser.pos();
    let raw = parser.read_compressed_uint()?;
    let negative = raw & 1 != 0;
    #[allow(clippy::cast_possible_wrap)]
    let magnitude = (raw >> 1) as i32;

    if !negative {
        return Ok(magnitude);
    }
    Ok(match parser.pos() - start {
        1 => magnitude - 0x40,
        2 => magnitude - 0x2000,
        _ => magnitude - 0x1000_0000,
    })
}

fn read_method(parser: &mut Parser, depth: usize) -> Result<MethodSig> {
    let convention = parser.read_le::<u8>()?;
    let kind = convention & CALLING_CONVENTION::KIND_MASK;
    if !matches!(
        kind,
        CALLING_CONVENTION::DEFAULT
            | CALLING_CONVENTION::C
            | CALLING_CONVENTION::STDCALL
            | CALLING_CONVENTION::THISCALL
            | CALLING_CONVENTION::FASTCALL
            | CALLING_CONVENTION::VARARG
            | CALLING_CONVENTION::UNMANAGED
    ) {
        return Err(malformed_error!(
            "Invalid method calling convention - 0x{:02x}",
            kind
        ));
    }

    let generic_param_count = if convention & CALLING_CONVENTION::GENERIC != 0 {
        parser.read_compressed_uint()?
    } else {
        0
    };

    let param_count = parser.read_compressed_uint()?;
    let return_type = read_type(parser, depth)?;

    let mut params = Vec::with_capacity(param_count.min(64) as usize);
    let mut sentinel = None;
    for _ in 0..param_count {
        if parser.peek_byte()? == ELEMENT_TYPE::SENTINEL {
            if kind != CALLING_CONVENTION::VARARG || sentinel.is_some() {
                return Err(malformed_error!("Unexpected sentinel at offset {}", parser.pos()));
            }
            parser.advance_by(1)?;
            sentinel = Some(params.len());
        }
        params.push(read_type(parser, depth)?);
    }

    Ok(MethodSig {
        calling_convention: kind,
        has_this: convention & CALLING_CONVENTION::HAS_THIS != 0,
        explicit_this: convention & CALLING_CONVENTION::EXPLICIT_THIS != 0,
        generic_param_count,
        return_type,
        params,
        sentinel,
    })
}

fn expect_consumed(parser: &Parser, what: &str) -> Result<()> {
    if parser.has_more_data() {
        return Err(malformed_error!(
            "Trailing data after {} signature at offset {}",
            what,
            parser.pos()
        ));
    }
    Ok(())
}

/// Parse a standalone type blob (as stored in a `TypeSpec` row).
///
/// # Errors
/// Returns an error if the blob is truncated, malformed or nested too deeply.
pub fn parse_type_sig(blob: &[u8]) -> Result<TypeSig> {
    let mut parser = Parser::new(blob);
    let sig = read_type(&mut parser, 0)?;
    expect_consumed(&parser, "type")?;
    Ok(sig)
}

/// Parse a `MethodDefSig` / `MethodRefSig` blob.
///
/// # Errors
/// Returns an error if the blob is truncated or malformed.
pub fn parse_method_sig(blob: &[u8]) -> Result<MethodSig> {
    let mut parser = Parser::new(blob);
    let sig = read_method(&mut parser, 0)?;
    expect_consumed(&parser, "method")?;
    Ok(sig)
}

/// Parse a `FieldSig` blob.
///
/// # Errors
/// Returns an error if the blob does not start with the `FIELD` marker or is malformed.
pub fn parse_field_sig(blob: &[u8]) -> Result<TypeSig> {
    let mut parser = Parser::new(blob);
    let marker = parser.read_le::<u8>()?;
    if marker != CALLING_CONVENTION::FIELD {
        return Err(malformed_error!("Invalid field signature marker - 0x{:02x}", marker));
    }

    let sig = read_type(&mut parser, 0)?;
    expect_consumed(&parser, "field")?;
    Ok(sig)
}

/// Parse a `PropertySig` blob.
///
/// # Errors
/// Returns an error if the blob does not start with the `PROPERTY` marker or is malformed.
pub fn parse_property_sig(blob: &[u8]) -> Result<PropertySig> {
    let mut parser = Parser::new(blob);
    let marker = parser.read_le::<u8>()?;
    if marker & !CALLING_CONVENTION::HAS_THIS != CALLING_CONVENTION::PROPERTY {
        return Err(malformed_error!("Invalid property signature marker - 0x{:02x}", marker));
    }

    let count = parser.read_compressed_uint()?;
    let property_type = read_type(&mut parser, 0)?;
    let mut params = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        params.push(read_type(&mut parser, 0)?);
    }

    expect_consumed(&parser, "property")?;
    Ok(PropertySig {
        has_this: marker & CALLING_CONVENTION::HAS_THIS != 0,
        property_type,
        params,
    })
}

/// Parse a `MemberRef` signature, which is either a method or a field signature.
///
/// # Errors
/// Returns an error if the blob is empty or malformed.
pub fn parse_member_sig(blob: &[u8]) -> Result<MemberSig> {
    match blob.first() {
        None => Err(Error::Empty),
        Some(&CALLING_CONVENTION::FIELD) => parse_field_sig(blob).map(MemberSig::Field),
        Some(_) => parse_method_sig(blob).map(MemberSig::Method),
    }
}

/// Parse a `LocalVarSig` blob into the local slot types.
///
/// # Errors
/// Returns an error if the blob does not start with the `LOCAL_SIG` marker or is malformed.
pub fn parse_local_sig(blob: &[u8]) -> Result<Vec<TypeSig>> {
    let mut parser = Parser::new(blob);
    let marker = parser.read_le::<u8>()?;
    if marker != CALLING_CONVENTION::LOCAL_SIG {
        return Err(malformed_error!("Invalid local signature marker - 0x{:02x}", marker));
    }

    let count = parser.read_compressed_uint()?;
    let mut locals = Vec::with_capacity(count.min(256) as usize);
    for _ in 0..count {
        locals.push(read_type(&mut parser, 0)?);
    }

    expect_consumed(&parser, "local")?;
    Ok(locals)
}

/// Parse the blob of a `StandAloneSig` row.
///
/// # Errors
/// Returns an error if the blob is empty or malformed.
pub fn parse_standalone_sig(blob: &[u8]) -> Result<StandAloneSig> {
    match blob.first() {
        None => Err(Error::Empty),
        Some(&CALLING_CONVENTION::LOCAL_SIG) => parse_local_sig(blob).map(StandAloneSig::Locals),
        Some(_) => parse_method_sig(blob).map(StandAloneSig::Method),
    }
}

/// Parse a `MethodSpec` instantiation blob into its generic arguments.
///
/// # Errors
/// Returns an error if the blob does not start with the `GENERICINST` marker or is malformed.
pub fn parse_method_spec(blob: &[u8]) -> Result<Vec<TypeSig>> {
    let mut parser = Parser::new(blob);
    let marker = parser.read_le::<u8>()?;
    if marker != CALLING_CONVENTION::GENERIC_INST {
        return Err(malformed_error!(
            "Invalid method spec signature marker - 0x{:02x}",
            marker
        ));
    }

    let count = parser.read_compressed_uint()?;
    let mut args = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        args.push(read_type(&mut parser, 0)?);
    }

    expect_consumed(&parser, "method spec")?;
    Ok(args)
}
