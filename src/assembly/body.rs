//! CIL method bodies: header values, instruction stream and exception handlers.

use crate::{
    assembly::instruction::{Instruction, Operand, TokenRef},
    metadata::handles::{StandAloneSigId, TypeDefOrRef},
};

/// Kind of an exception handling clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// `catch` of the given exception type
    Catch(TypeDefOrRef),
    /// Filter block starting at the given code offset
    Filter(u32),
    /// `finally`
    Finally,
    /// `fault`
    Fault,
}

/// One exception handling clause (II.25.4.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct ExceptionHandler {
    pub kind: HandlerKind,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
}

/// A decoded method body.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Zero-initialize locals (`CorILMethod_InitLocals`)
    pub init_locals: bool,
    /// Local variable signature, `None` if the method has no locals
    pub local_sig: Option<StandAloneSigId>,
    /// Instructions in program order
    pub instructions: Vec<Instruction>,
    /// Exception handling clauses
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// A body over `instructions` with offsets assigned and a default stack size
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        let mut body = MethodBody {
            max_stack: 8,
            init_locals: true,
            local_sig: None,
            instructions,
            exception_handlers: Vec::new(),
        };
        body.update_offsets();
        body
    }

    /// Attach a local variable signature
    #[must_use]
    pub fn with_locals(mut self, local_sig: StandAloneSigId) -> Self {
        self.local_sig = Some(local_sig);
        self
    }

    /// Recompute instruction offsets from their sizes
    pub fn update_offsets(&mut self) {
        let mut offset = 0_u32;
        for instruction in &mut self.instructions {
            instruction.offset = offset;
            #[allow(clippy::cast_possible_truncation)]
            {
                offset += instruction.size() as u32;
            }
        }
    }

    /// Size of the code stream in bytes
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.instructions.iter().map(Instruction::size).sum()
    }

    /// Visit every type handle the code refers to directly (type operands, `ldtoken` types
    /// and catch clauses)
    pub fn for_each_type(&self, visit: &mut impl FnMut(TypeDefOrRef)) {
        for instruction in &self.instructions {
            if let Some(handle) = instruction.type_operand() {
                visit(handle);
            }
        }
        for handler in &self.exception_handlers {
            if let HandlerKind::Catch(handle) = handler.kind {
                visit(handle);
            }
        }
    }

    /// Returns true if any instruction carries a token operand of any kind
    #[must_use]
    pub fn has_token_operands(&self) -> bool {
        self.instructions.iter().any(|instruction| {
            matches!(
                instruction.operand,
                Operand::Type(_)
                    | Operand::Method(_)
                    | Operand::Field(_)
                    | Operand::Token(TokenRef::Type(_) | TokenRef::Method(_) | TokenRef::Field(_))
                    | Operand::Signature(_)
            )
        })
    }
}
