//! CIL method body encoding.
//!
//! Bodies are always written with a fat header so that the header size does not depend on
//! the code. Exception clauses are written as one fat section. `ldstr` literals are interned
//! into the `#US` heap under construction.

use crate::{
    assembly::{
        body::{HandlerKind, MethodBody},
        decoder::{FAT_FORMAT, INIT_LOCALS, MORE_SECTS, SECTION_EH_TABLE, SECTION_FAT_FORMAT},
        instruction::{Immediate, Instruction, Operand},
        opcodes::OperandType,
    },
    file::io::write_le,
    metadata::{
        streams::UserStringHeapBuilder,
        token::{Token, USER_STRING_TABLE},
    },
    Result,
};

/// Encode one instruction, appending it to `out`.
///
/// # Errors
/// Returns an error if the operand does not fit the opcode's operand shape, e.g. a short
/// branch whose displacement is outside `i8`.
pub fn encode_instruction(
    instruction: &Instruction,
    out: &mut Vec<u8>,
    user_strings: &mut UserStringHeapBuilder,
) -> Result<()> {
    let opcode = &instruction.opcode;
    if opcode.prefix != 0 {
        out.push(opcode.prefix);
    }
    out.push(opcode.value);

    match (opcode.operand_type, &instruction.operand) {
        (OperandType::None, Operand::None) => {}
        (OperandType::Int8, Operand::Immediate(Immediate::Int8(value))) => write_le(out, *value),
        (OperandType::UInt8, Operand::Immediate(Immediate::UInt8(value))) => write_le(out, *value),
        (OperandType::Int32, Operand::Immediate(Immediate::Int32(value))) => write_le(out, *value),
        (OperandType::Int64, Operand::Immediate(Immediate::Int64(value))) => write_le(out, *value),
        (OperandType::Float32, Operand::Immediate(Immediate::Float32(value))) => {
            write_le(out, *value);
        }
        (OperandType::Float64, Operand::Immediate(Immediate::Float64(value))) => {
            write_le(out, *value);
        }
        (OperandType::ShortVariable, Operand::Variable(index)) => {
            let index = u8::try_from(*index).map_err(|_| {
                malformed_error!("{} index {} does not fit in 8 bits", opcode.mnemonic, index)
            })?;
            write_le(out, index);
        }
        (OperandType::Variable, Operand::Variable(index)) => write_le(out, *index),
        (OperandType::ShortBranch, Operand::Branch(displacement)) => {
            let displacement = i8::try_from(*displacement).map_err(|_| {
                malformed_error!(
                    "{} displacement {} does not fit in 8 bits",
                    opcode.mnemonic,
                    displacement
                )
            })?;
            write_le(out, displacement);
        }
        (OperandType::Branch, Operand::Branch(displacement)) => write_le(out, *displacement),
        (OperandType::Switch, Operand::Switch(targets)) => {
            #[allow(clippy::cast_possible_truncation)]
            write_le(out, targets.len() as u32);
            for target in targets {
                write_le(out, *target);
            }
        }
        (OperandType::Method, Operand::Method(handle)) => write_le(out, handle.token().value()),
        (OperandType::Field, Operand::Field(handle)) => write_le(out, handle.token().value()),
        (OperandType::Type, Operand::Type(handle)) => write_le(out, handle.token().value()),
        (OperandType::Token, Operand::Token(handle)) => write_le(out, handle.token().value()),
        (OperandType::Signature, Operand::Signature(id)) => write_le(out, id.token().value()),
        (OperandType::String, Operand::String(value)) => {
            let index = user_strings.add(value);
            if index > 0x00FF_FFFF {
                return Err(malformed_error!("#US heap exceeds 16 MiB"));
            }
            let token = Token::new((u32::from(USER_STRING_TABLE) << 24) | index);
            write_le(out, token.value());
        }
        (operand_type, operand) => {
            return Err(malformed_error!(
                "Operand {:?} does not match {} ({:?})",
                operand,
                opcode.mnemonic,
                operand_type
            ))
        }
    }

    Ok(())
}

/// Encode a method body with a fat header.
///
/// The returned bytes assume the body starts at a 4-byte aligned position; exception
/// sections are padded accordingly.
///
/// # Errors
/// Returns an error if an instruction cannot be encoded.
pub fn encode_method_body(
    body: &MethodBody,
    user_strings: &mut UserStringHeapBuilder,
) -> Result<Vec<u8>> {
    let mut code = Vec::with_capacity(body.code_size());
    for instruction in &body.instructions {
        encode_instruction(instruction, &mut code, user_strings)?;
    }

    let mut flags = FAT_FORMAT | (3 << 12);
    if body.init_locals {
        flags |= INIT_LOCALS;
    }
    if !body.exception_handlers.is_empty() {
        flags |= MORE_SECTS;
    }

    let mut out = Vec::with_capacity(12 + code.len());
    write_le(&mut out, flags);
    write_le(&mut out, body.max_stack);
    #[allow(clippy::cast_possible_truncation)]
    write_le(&mut out, code.len() as u32);
    write_le(
        &mut out,
        body.local_sig.map_or(0, |sig| sig.token().value()),
    );
    out.extend_from_slice(&code);

    if !body.exception_handlers.is_empty() {
        while out.len() % 4 != 0 {
            out.push(0);
        }

        let size = 4 + body.exception_handlers.len() * 24;
        if size > 0x00FF_FFFF {
            return Err(malformed_error!(
                "Too many exception clauses - {}",
                body.exception_handlers.len()
            ));
        }

        out.push(SECTION_EH_TABLE | SECTION_FAT_FORMAT);
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&[size as u8, (size >> 8) as u8, (size >> 16) as u8]);

        for handler in &body.exception_handlers {
            let (flags, extra) = match handler.kind {
                HandlerKind::Catch(handle) => (0_u32, handle.token().value()),
                HandlerKind::Filter(offset) => (1, offset),
                HandlerKind::Finally => (2, 0),
                HandlerKind::Fault => (4, 0),
            };
            write_le(&mut out, flags);
            write_le(&mut out, handler.try_offset);
            write_le(&mut out, handler.try_length);
            write_le(&mut out, handler.handler_offset);
            write_le(&mut out, handler.handler_length);
            write_le(&mut out, extra);
        }
    }

    Ok(out)
}
