//! Signature blob encoders, the inverse of the functions in `parser.rs`.
//!
//! Encoding is infallible: every [`TypeSig`] that can be built in memory has a blob form.
//! The output is canonical, so a blob that was decoded and encoded again is byte-identical
//! to the original as long as the original used the shortest compressed integers.

use crate::{
    file::io::write_compressed_uint,
    metadata::signatures::{
        MemberSig, MethodSig, PropertySig, StandAloneSig, TypeSig, CALLING_CONVENTION,
        ELEMENT_TYPE,
    },
};

fn write_type(sig: &TypeSig, out: &mut Vec<u8>) {
    if let Some((code, _)) = sig.primitive() {
        out.push(code);
        return;
    }

    match sig {
        TypeSig::Class(handle) => {
            out.push(ELEMENT_TYPE::CLASS);
            write_compressed_uint(handle.compressed(), out);
        }
        TypeSig::ValueType(handle) => {
            out.push(ELEMENT_TYPE::VALUETYPE);
            write_compressed_uint(handle.compressed(), out);
        }
        TypeSig::SzArray(inner) => {
            out.push(ELEMENT_TYPE::SZARRAY);
            write_type(inner, out);
        }
        TypeSig::ByRef(inner) => {
            out.push(ELEMENT_TYPE::BYREF);
            write_type(inner, out);
        }
        TypeSig::Ptr(inner) => {
            out.push(ELEMENT_TYPE::PTR);
            write_type(inner, out);
        }
        TypeSig::Pinned(inner) => {
            out.push(ELEMENT_TYPE::PINNED);
            write_type(inner, out);
        }
        TypeSig::GenericInst(base, args) => {
            out.push(ELEMENT_TYPE::GENERICINST);
            write_type(base, out);
            write_count(args.len(), out);
            for arg in args {
                write_type(arg, out);
            }
        }
        TypeSig::Var(index) => {
            out.push(ELEMENT_TYPE::VAR);
            write_compressed_uint(*index, out);
        }
        TypeSig::MVar(index) => {
            out.push(ELEMENT_TYPE::MVAR);
            write_compressed_uint(*index, out);
        }
        TypeSig::Array(element, shape) => {
            out.push(ELEMENT_TYPE::ARRAY);
            write_type(element, out);
            write_compressed_uint(shape.rank, out);
            write_count(shape.sizes.len(), out);
            for size in &shape.sizes {
                write_compressed_uint(*size, out);
            }
            write_count(shape.lower_bounds.len(), out);
            for bound in &shape.lower_bounds {
                write_compressed_int(*bound, out);
            }
        }
        TypeSig::CModReqd(modifier, inner) => {
            out.push(ELEMENT_TYPE::CMOD_REQD);
            write_compressed_uint(modifier.compressed(), out);
            write_type(inner, out);
        }
        TypeSig::CModOpt(modifier, inner) => {
            out.push(ELEMENT_TYPE::CMOD_OPT);
            write_compressed_uint(modifier.compressed(), out);
            write_type(inner, out);
        }
        TypeSig::FnPtr(sig) => {
            out.push(ELEMENT_TYPE::FNPTR);
            write_method(sig, out);
        }
        // primitives are handled above
        _ => {}
    }
}

fn write_count(count: usize, out: &mut Vec<u8>) {
    #[allow(clippy::cast_possible_truncation)]
    write_compressed_uint(count as u32, out);
}

// II.23.2: the value is rotated left by one with the sign in bit 0, in the smallest width
// whose range holds it
fn write_compressed_int(value: i32, out: &mut Vec<u8>) {
    let sign = u32::from(value < 0);
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    if (-0x40..0x40).contains(&value) {
        out.push(((((value as u32) & 0x3F) << 1) | sign) as u8);
    } else if (-0x2000..0x2000).contains(&value) {
        let raw = (((value as u32) & 0x1FFF) << 1) | sign;
        out.push(((raw >> 8) as u8) | 0x80);
        out.push(raw as u8);
    } else {
        let raw = (((value as u32) & 0x0FFF_FFFF) << 1) | sign;
        out.push(((raw >> 24) as u8 & 0x1F) | 0xC0);
        out.push((raw >> 16) as u8);
        out.push((raw >> 8) as u8);
        out.push(raw as u8);
    }
}

fn write_method(sig: &MethodSig, out: &mut Vec<u8>) {
    let mut convention = sig.calling_convention & CALLING_CONVENTION::KIND_MASK;
    if sig.has_this {
        convention |= CALLING_CONVENTION::HAS_THIS;
    }
    if sig.explicit_this {
        convention |= CALLING_CONVENTION::EXPLICIT_THIS;
    }
    if sig.generic_param_count > 0 {
        convention |= CALLING_CONVENTION::GENERIC;
    }

    out.push(convention);
    if sig.generic_param_count > 0 {
        write_compressed_uint(sig.generic_param_count, out);
    }

    write_count(sig.params.len(), out);
    write_type(&sig.return_type, out);
    for (index, param) in sig.params.iter().enumerate() {
        if sig.sentinel == Some(index) {
            out.push(ELEMENT_TYPE::SENTINEL);
        }
        write_type(param, out);
    }
}

/// Encode a type signature as stored in a `TypeSpec` row
#[must_use]
pub fn encode_type_sig(sig: &TypeSig) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    write_type(sig, &mut out);
    out
}

/// Encode a method signature
#[must_use]
pub fn encode_method_sig(sig: &MethodSig) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + sig.params.len() * 2);
    write_method(sig, &mut out);
    out
}

/// Encode a field signature
#[must_use]
pub fn encode_field_sig(sig: &TypeSig) -> Vec<u8> {
    let mut out = vec![CALLING_CONVENTION::FIELD];
    write_type(sig, &mut out);
    out
}

/// Encode a `MemberRef` signature
#[must_use]
pub fn encode_member_sig(sig: &MemberSig) -> Vec<u8> {
    match sig {
        MemberSig::Method(method) => encode_method_sig(method),
        MemberSig::Field(field) => encode_field_sig(field),
    }
}

/// Encode a local variable signature
#[must_use]
pub fn encode_local_sig(locals: &[TypeSig]) -> Vec<u8> {
    let mut out = vec![CALLING_CONVENTION::LOCAL_SIG];
    write_count(locals.len(), &mut out);
    for local in locals {
        write_type(local, &mut out);
    }
    out
}

/// Encode the blob of a `StandAloneSig` row
#[must_use]
pub fn encode_standalone_sig(sig: &StandAloneSig) -> Vec<u8> {
    match sig {
        StandAloneSig::Locals(locals) => encode_local_sig(locals),
        StandAloneSig::Method(method) => encode_method_sig(method),
    }
}

/// Encode a property signature
#[must_use]
pub fn encode_property_sig(sig: &PropertySig) -> Vec<u8> {
    let mut out = vec![if sig.has_this {
        CALLING_CONVENTION::PROPERTY | CALLING_CONVENTION::HAS_THIS
    } else {
        CALLING_CONVENTION::PROPERTY
    }];
    write_count(sig.params.len(), &mut out);
    write_type(&sig.property_type, &mut out);
    for param in &sig.params {
        write_type(param, &mut out);
    }
    out
}

/// Encode the instantiation blob of a `MethodSpec` row
#[must_use]
pub fn encode_method_spec(args: &[TypeSig]) -> Vec<u8> {
    let mut out = vec![CALLING_CONVENTION::GENERIC_INST];
    write_count(args.len(), &mut out);
    for arg in args {
        write_type(arg, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        handles::{TypeDefOrRef, TypeRefId, TypeSpecId},
        signatures::{parse_local_sig, parse_method_sig, parse_property_sig, parse_type_sig},
    };

    #[test]
    fn parameterless_constructor_bytes() {
        assert_eq!(
            encode_method_sig(&MethodSig::parameterless_constructor()),
            vec![0x20, 0x00, 0x01]
        );
    }

    #[test]
    fn generic_method_bytes() {
        let mut sig = MethodSig::new_instance(TypeSig::MVar(0), vec![TypeSig::Var(0)]);
        sig.generic_param_count = 1;
        assert_eq!(
            encode_method_sig(&sig),
            vec![0x30, 0x01, 0x01, 0x1E, 0x00, 0x13, 0x00]
        );
    }

    #[test]
    fn large_handles_use_wide_compression() {
        // TypeSpec row 0x40 -> coded 0x102, which needs two bytes
        let sig = TypeSig::Class(TypeDefOrRef::Spec(TypeSpecId(0x3F)));
        assert_eq!(encode_type_sig(&sig), vec![0x12, 0x81, 0x02]);
    }

    #[test]
    fn locals_survive_reencoding() {
        let blob = [0x07, 0x03, 0x12, 0x05, 0x1D, 0x0E, 0x45, 0x10, 0x08];
        let locals = parse_local_sig(&blob).unwrap();
        assert_eq!(encode_local_sig(&locals), blob.to_vec());
    }

    #[test]
    fn field_sig_bytes() {
        let sig = TypeSig::Class(TypeDefOrRef::Ref(TypeRefId(2)));
        assert_eq!(encode_field_sig(&sig), vec![0x06, 0x12, 0x0D]);
        assert_eq!(
            encode_member_sig(&MemberSig::Field(TypeSig::I4)),
            vec![0x06, 0x08]
        );
    }

    #[test]
    fn method_sig_with_handles() {
        let blob = [0x00, 0x02, 0x01, 0x12, 0x05, 0x15, 0x12, 0x09, 0x01, 0x08];
        let sig = parse_method_sig(&blob).unwrap();
        assert_eq!(encode_method_sig(&sig), blob.to_vec());
    }

    #[test]
    fn extended_forms_are_canonical() {
        for blob in [
            // vararg void (int32, ..., string)
            vec![0x05, 0x02, 0x01, 0x08, 0x41, 0x0E],
            // unmanaged cdecl void (modopt(TypeRef#1) int32*)
            vec![0x01, 0x01, 0x01, 0x20, 0x05, 0x0F, 0x08],
        ] {
            assert_eq!(encode_method_sig(&parse_method_sig(&blob).unwrap()), blob);
        }

        for blob in [
            vec![0x14, 0x08, 0x02, 0x00, 0x01, 0x7F],
            vec![0x14, 0x0E, 0x03, 0x02, 0x05, 0x81, 0x00, 0x02, 0x80, 0x80, 0xBF, 0x7F],
            vec![0x1B, 0x00, 0x00, 0x01],
        ] {
            assert_eq!(encode_type_sig(&parse_type_sig(&blob).unwrap()), blob);
        }

        let property = [0x28, 0x01, 0x0E, 0x08];
        assert_eq!(
            encode_property_sig(&parse_property_sig(&property).unwrap()),
            property.to_vec()
        );
    }
}
