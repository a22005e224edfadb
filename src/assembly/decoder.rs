//! CIL method body decoding.
//!
//! [`decode_method_body`] parses a body header (tiny or fat), the instruction stream and any
//! exception handling sections. Token operands are checked against the owning module through
//! an [`OperandContext`] and turned into typed handles; `ldstr` operands are resolved to their
//! literal text so that a body can be moved between modules without its `#US` heap.

use crate::{
    assembly::{
        body::{ExceptionHandler, HandlerKind, MethodBody},
        instruction::{Immediate, Instruction, Operand, TokenRef},
        opcodes::{OpCode, OperandType},
    },
    file::parser::Parser,
    metadata::{
        handles::{FieldRef, MethodRef, StandAloneSigId, TypeDefOrRef},
        token::{TableId, Token, USER_STRING_TABLE},
    },
    Error, Result,
};

/// Tiny header format bits (`CorILMethod_TinyFormat`)
pub const TINY_FORMAT: u8 = 0x2;
/// Fat header format bits (`CorILMethod_FatFormat`)
pub const FAT_FORMAT: u16 = 0x3;
/// More sections follow the code
pub const MORE_SECTS: u16 = 0x8;
/// Zero-initialize locals
pub const INIT_LOCALS: u16 = 0x10;

/// Section kind: exception handling table
pub const SECTION_EH_TABLE: u8 = 0x01;
/// Section kind: fat clause layout
pub const SECTION_FAT_FORMAT: u8 = 0x40;
/// Section kind: another section follows
pub const SECTION_MORE_SECTS: u8 = 0x80;

/// What the decoder needs to know about the module that owns a body.
pub trait OperandContext {
    /// Returns true if `token` names an existing row
    fn contains(&self, token: Token) -> bool;

    /// Returns true if the `MemberRef` named by `token` references a field
    fn is_field_reference(&self, token: Token) -> bool;

    /// Resolve a `#US` heap index to its literal.
    ///
    /// # Errors
    /// Returns an error if the index does not name a valid user string.
    fn user_string(&self, index: u32) -> Result<String>;
}

fn checked(token: Token, context: &impl OperandContext) -> Result<Token> {
    if context.contains(token) {
        Ok(token)
    } else {
        Err(Error::InvalidToken(token))
    }
}

/// Decode one instruction at the parser's position.
///
/// # Errors
/// Returns an error for unknown opcodes, truncated operands or tokens that do not resolve.
pub fn decode_instruction(parser: &mut Parser, context: &impl OperandContext) -> Result<Instruction> {
    #[allow(clippy::cast_possible_truncation)]
    let offset = parser.pos() as u32;
    let first = parser.read_le::<u8>()?;

    let opcode = if first == 0xFE {
        let second = parser.read_le::<u8>()?;
        OpCode::lookup(0xFE, second)
            .ok_or_else(|| malformed_error!("Invalid opcode: FE {:02X}", second))?
    } else {
        OpCode::lookup(0, first).ok_or_else(|| malformed_error!("Invalid opcode: {:02X}", first))?
    };

    let operand = match opcode.operand_type {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::ShortVariable => Operand::Variable(u16::from(parser.read_le::<u8>()?)),
        OperandType::Variable => Operand::Variable(parser.read_le::<u16>()?),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::ShortBranch => Operand::Branch(i32::from(parser.read_le::<i8>()?)),
        OperandType::Branch => Operand::Branch(parser.read_le::<i32>()?),
        OperandType::Switch => {
            let count = parser.read_le::<u32>()? as usize;
            if count > parser.len().saturating_sub(parser.pos()) / 4 {
                return Err(malformed_error!(
                    "Switch at offset {} has too many targets - {}",
                    offset,
                    count
                ));
            }

            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(parser.read_le::<i32>()?);
            }
            Operand::Switch(targets)
        }
        OperandType::Method => {
            let token = checked(Token::new(parser.read_le::<u32>()?), context)?;
            Operand::Method(MethodRef::from_token(token)?)
        }
        OperandType::Field => {
            let token = checked(Token::new(parser.read_le::<u32>()?), context)?;
            Operand::Field(FieldRef::from_token(token)?)
        }
        OperandType::Type => {
            let token = checked(Token::new(parser.read_le::<u32>()?), context)?;
            Operand::Type(TypeDefOrRef::from_token(token)?)
        }
        OperandType::Signature => {
            let token = checked(Token::new(parser.read_le::<u32>()?), context)?;
            Operand::Signature(StandAloneSigId::from_token(token)?)
        }
        OperandType::String => {
            let token = Token::new(parser.read_le::<u32>()?);
            if token.table() != USER_STRING_TABLE {
                return Err(Error::InvalidToken(token));
            }
            Operand::String(context.user_string(token.row())?)
        }
        OperandType::Token => {
            let token = checked(Token::new(parser.read_le::<u32>()?), context)?;
            Operand::Token(decode_token_ref(token, context)?)
        }
    };

    Ok(Instruction {
        offset,
        opcode: *opcode,
        operand,
    })
}

fn decode_token_ref(token: Token, context: &impl OperandContext) -> Result<TokenRef> {
    match token.table_id() {
        Some(TableId::TypeDef | TableId::TypeRef | TableId::TypeSpec) => {
            TypeDefOrRef::from_token(token).map(TokenRef::Type)
        }
        Some(TableId::MethodDef | TableId::MethodSpec) => {
            MethodRef::from_token(token).map(TokenRef::Method)
        }
        Some(TableId::Field) => FieldRef::from_token(token).map(TokenRef::Field),
        Some(TableId::MemberRef) if context.is_field_reference(token) => {
            FieldRef::from_token(token).map(TokenRef::Field)
        }
        Some(TableId::MemberRef) => MethodRef::from_token(token).map(TokenRef::Method),
        _ => Err(Error::InvalidToken(token)),
    }
}

/// Decode a full method body starting at the first byte of `data`.
///
/// `data` may extend past the body; only the bytes the header and sections describe are read.
///
/// # Errors
/// Returns an error for malformed headers, instructions or exception sections.
pub fn decode_method_body(data: &[u8], context: &impl OperandContext) -> Result<MethodBody> {
    let mut parser = Parser::new(data);
    let first = parser.peek_byte()?;

    let (max_stack, code_size, flags, local_sig) = match first & 0x3 {
        TINY_FORMAT => {
            parser.advance_by(1)?;
            (8_u16, usize::from(first >> 2), 0_u16, None)
        }
        0x3 => {
            let flags_and_size = parser.read_le::<u16>()?;
            let header_size = usize::from(flags_and_size >> 12) * 4;
            if header_size < 12 {
                return Err(malformed_error!(
                    "Invalid fat method header size - {}",
                    header_size
                ));
            }

            let max_stack = parser.read_le::<u16>()?;
            let code_size = parser.read_le::<u32>()? as usize;
            let local_token = Token::new(parser.read_le::<u32>()?);
            parser.advance_by(header_size - 12)?;

            let local_sig = if local_token.is_null() {
                None
            } else {
                Some(StandAloneSigId::from_token(checked(local_token, context)?)?)
            };

            (max_stack, code_size, flags_and_size & 0x0FFF, local_sig)
        }
        _ => {
            return Err(malformed_error!(
                "Invalid method header format - 0x{:02x}",
                first
            ))
        }
    };

    let code = parser.read_bytes(code_size)?;
    let mut code_parser = Parser::new(code);
    let mut instructions = Vec::new();
    while code_parser.has_more_data() {
        instructions.push(decode_instruction(&mut code_parser, context)?);
    }

    let exception_handlers = if flags & MORE_SECTS != 0 {
        decode_sections(&mut parser, context)?
    } else {
        Vec::new()
    };

    Ok(MethodBody {
        max_stack,
        init_locals: flags & INIT_LOCALS != 0,
        local_sig,
        instructions,
        exception_handlers,
    })
}

fn decode_sections(
    parser: &mut Parser,
    context: &impl OperandContext,
) -> Result<Vec<ExceptionHandler>> {
    let mut handlers = Vec::new();

    loop {
        parser.align(4)?;
        let kind = parser.read_le::<u8>()?;
        if kind & SECTION_EH_TABLE == 0 {
            return Err(malformed_error!(
                "Unsupported method data section - 0x{:02x}",
                kind
            ));
        }

        if kind & SECTION_FAT_FORMAT != 0 {
            let size = usize::from(parser.read_le::<u8>()?)
                | usize::from(parser.read_le::<u8>()?) << 8
                | usize::from(parser.read_le::<u8>()?) << 16;
            for _ in 0..size.saturating_sub(4) / 24 {
                let flags = parser.read_le::<u32>()?;
                let try_offset = parser.read_le::<u32>()?;
                let try_length = parser.read_le::<u32>()?;
                let handler_offset = parser.read_le::<u32>()?;
                let handler_length = parser.read_le::<u32>()?;
                let extra = parser.read_le::<u32>()?;
                handlers.push(ExceptionHandler {
                    kind: decode_handler_kind(flags, extra, context)?,
                    try_offset,
                    try_length,
                    handler_offset,
                    handler_length,
                });
            }
        } else {
            let size = usize::from(parser.read_le::<u8>()?);
            parser.advance_by(2)?;
            for _ in 0..size.saturating_sub(4) / 12 {
                let flags = u32::from(parser.read_le::<u16>()?);
                let try_offset = u32::from(parser.read_le::<u16>()?);
                let try_length = u32::from(parser.read_le::<u8>()?);
                let handler_offset = u32::from(parser.read_le::<u16>()?);
                let handler_length = u32::from(parser.read_le::<u8>()?);
                let extra = parser.read_le::<u32>()?;
                handlers.push(ExceptionHandler {
                    kind: decode_handler_kind(flags, extra, context)?,
                    try_offset,
                    try_length,
                    handler_offset,
                    handler_length,
                });
            }
        }

        if kind & SECTION_MORE_SECTS == 0 {
            break;
        }
    }

    Ok(handlers)
}

fn decode_handler_kind(flags: u32, extra: u32, context: &impl OperandContext) -> Result<HandlerKind> {
    match flags {
        0x0 => {
            let token = checked(Token::new(extra), context)?;
            Ok(HandlerKind::Catch(TypeDefOrRef::from_token(token)?))
        }
        0x1 => Ok(HandlerKind::Filter(extra)),
        0x2 => Ok(HandlerKind::Finally),
        0x4 => Ok(HandlerKind::Fault),
        _ => Err(malformed_error!(
            "Invalid exception clause flags - 0x{:x}",
            flags
        )),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metadata::handles::{MemberRefId, TypeRefId};

    /// Accepts every row of the listed tables; `MemberRef` rows above 0x10 are fields.
    pub(crate) struct TestContext;

    impl OperandContext for TestContext {
        fn contains(&self, token: Token) -> bool {
            token.table_id().is_some() && token.row() > 0
        }

        fn is_field_reference(&self, token: Token) -> bool {
            token.row() > 0x10
        }

        fn user_string(&self, index: u32) -> Result<String> {
            Ok(format!("us{index}"))
        }
    }

    #[test]
    fn tiny_body() {
        // ldarg.0; ret
        let body = decode_method_body(&[0x0A, 0x02, 0x2A], &TestContext).unwrap();
        assert_eq!(body.instructions.len(), 2);
        assert_eq!(body.instructions[1].mnemonic(), "ret");
        assert_eq!(body.instructions[1].offset, 1);
        assert!(body.local_sig.is_none());
        assert!(!body.init_locals);
    }

    #[test]
    fn fat_body_with_operands() {
        #[rustfmt::skip]
        let data = [
            0x13, 0x30, 0x02, 0x00,             // fat, init locals, header 12 bytes, max stack 2
            0x12, 0x00, 0x00, 0x00,             // code size 18
            0x01, 0x00, 0x00, 0x11,             // locals: StandAloneSig #1
            0x72, 0x05, 0x00, 0x00, 0x70,       // ldstr us5
            0x8C, 0x01, 0x00, 0x00, 0x01,       // box TypeRef #1
            0xD0, 0x11, 0x00, 0x00, 0x0A,       // ldtoken MemberRef #0x11 (field)
            0x2B, 0xFE,                         // br.s -2
            0x2A,                               // ret
        ];

        let body = decode_method_body(&data, &TestContext).unwrap();
        assert_eq!(body.max_stack, 2);
        assert!(body.init_locals);
        assert_eq!(body.local_sig, Some(StandAloneSigId::from_index(0)));
        assert_eq!(body.instructions[0].operand, Operand::String("us5".into()));
        assert_eq!(
            body.instructions[1].operand,
            Operand::Type(TypeDefOrRef::Ref(TypeRefId(0)))
        );
        assert_eq!(
            body.instructions[2].operand,
            Operand::Token(TokenRef::Field(FieldRef::Ref(MemberRefId(0x10))))
        );
        assert_eq!(body.instructions[3].branch_targets(), vec![15]);
    }

    #[test]
    fn small_exception_section() {
        #[rustfmt::skip]
        let data = [
            0x1B, 0x30, 0x01, 0x00,             // fat, more sects, init locals
            0x03, 0x00, 0x00, 0x00,             // code size 3
            0x00, 0x00, 0x00, 0x00,             // no locals
            0x00, 0xDC, 0x2A,                   // nop; endfinally; ret
            0x00,                               // pad to 4
            0x01, 0x10, 0x00, 0x00,             // small EH table, 16 bytes
            0x02, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
        ];

        let body = decode_method_body(&data, &TestContext).unwrap();
        assert_eq!(
            body.exception_handlers,
            vec![ExceptionHandler {
                kind: HandlerKind::Finally,
                try_offset: 0,
                try_length: 1,
                handler_offset: 1,
                handler_length: 1,
            }]
        );
    }

    #[test]
    fn invalid_input() {
        assert!(decode_method_body(&[0x00], &TestContext).is_err());
        // tiny body claiming 4 code bytes with only one present
        assert!(decode_method_body(&[0x12, 0x00], &TestContext).is_err());
        // unknown opcode 0x24
        assert!(decode_method_body(&[0x06, 0x24], &TestContext).is_err());
        // ldstr with a non-#US token
        assert!(decode_method_body(&[0x16, 0x72, 0x01, 0x00, 0x00, 0x02], &TestContext).is_err());
    }
}
