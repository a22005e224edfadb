//! Decoded CIL instructions with typed operands.
//!
//! Token operands are resolved to the typed handles of the owning module, so rewriting a
//! reference means swapping the handle inside the operand. Every token operand encodes to
//! exactly four bytes whatever it points at, which is why a substitution never moves any
//! other instruction.

use std::fmt;

use crate::{
    assembly::opcodes::{FlowType, OpCode, OperandType},
    metadata::{
        handles::{FieldRef, MethodRef, StandAloneSigId, TypeDefOrRef},
        token::Token,
    },
};

/// An inline immediate value
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub enum Immediate {
    Int8(i8),
    UInt8(u8),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

/// The operand of `ldtoken`, which may name a type, a method or a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenRef {
    /// A type handle
    Type(TypeDefOrRef),
    /// A method handle
    Method(MethodRef),
    /// A field handle
    Field(FieldRef),
}

impl TokenRef {
    /// The metadata token of the referenced row
    #[must_use]
    pub fn token(self) -> Token {
        match self {
            TokenRef::Type(handle) => handle.token(),
            TokenRef::Method(handle) => handle.token(),
            TokenRef::Field(handle) => handle.token(),
        }
    }
}

/// A decoded instruction operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Inline constant
    Immediate(Immediate),
    /// Argument or local variable index
    Variable(u16),
    /// Branch displacement relative to the next instruction
    Branch(i32),
    /// Jump table displacements relative to the next instruction
    Switch(Vec<i32>),
    /// Type operand (`box`, `newarr`, `castclass`, ...)
    Type(TypeDefOrRef),
    /// Method operand (`call`, `newobj`, `ldftn`, ...)
    Method(MethodRef),
    /// Field operand (`ldfld`, `stsfld`, ...)
    Field(FieldRef),
    /// `ldtoken` operand
    Token(TokenRef),
    /// `ldstr` literal
    String(String),
    /// `calli` call-site signature
    Signature(StandAloneSigId),
}

/// One CIL instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset inside the method body's code
    pub offset: u32,
    /// The opcode
    pub opcode: OpCode,
    /// The decoded operand
    pub operand: Operand,
}

impl Instruction {
    /// Create an instruction at offset 0; bodies assign offsets when built
    #[must_use]
    pub fn new(opcode: &OpCode, operand: Operand) -> Self {
        Instruction {
            offset: 0,
            opcode: *opcode,
            operand,
        }
    }

    /// The assembler mnemonic
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.mnemonic
    }

    /// Encoded size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        let operand = match (&self.opcode.operand_type, &self.operand) {
            (OperandType::Switch, Operand::Switch(targets)) => 4 + targets.len() * 4,
            (operand_type, _) => operand_type.size(),
        };
        self.opcode.size() + operand
    }

    /// Absolute offsets this instruction may branch to
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )]
    pub fn branch_targets(&self) -> Vec<u32> {
        let next = (self.offset as usize + self.size()) as i64;
        let absolute = |displacement: i32| (next + i64::from(displacement)) as u32;

        match (&self.opcode.flow, &self.operand) {
            (
                FlowType::ConditionalBranch | FlowType::UnconditionalBranch,
                Operand::Branch(displacement),
            ) => vec![absolute(*displacement)],
            (FlowType::Switch, Operand::Switch(targets)) => {
                targets.iter().map(|target| absolute(*target)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// The type handle this instruction refers to, directly or through `ldtoken`
    #[must_use]
    pub fn type_operand(&self) -> Option<TypeDefOrRef> {
        match self.operand {
            Operand::Type(handle) | Operand::Token(TokenRef::Type(handle)) => Some(handle),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.opcode.mnemonic)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Immediate(value) => match value {
                Immediate::Int8(v) => write!(f, " {v}"),
                Immediate::UInt8(v) => write!(f, " {v}"),
                Immediate::Int32(v) => write!(f, " {v}"),
                Immediate::Int64(v) => write!(f, " {v}"),
                Immediate::Float32(v) => write!(f, " {v}"),
                Immediate::Float64(v) => write!(f, " {v}"),
            },
            Operand::Variable(index) => write!(f, " {index}"),
            Operand::Branch(_) | Operand::Switch(_) => {
                let targets: Vec<String> = self
                    .branch_targets()
                    .iter()
                    .map(|target| format!("IL_{target:04x}"))
                    .collect();
                write!(f, " {}", targets.join(", "))
            }
            Operand::Type(handle) => write!(f, " {}", handle.token()),
            Operand::Method(handle) => write!(f, " {}", handle.token()),
            Operand::Field(handle) => write!(f, " {}", handle.token()),
            Operand::Token(handle) => write!(f, " {}", handle.token()),
            Operand::String(value) => write!(f, " {value:?}"),
            Operand::Signature(id) => write!(f, " {}", id.token()),
        }
    }
}
