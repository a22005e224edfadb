//! CIL instruction layer: opcode table, typed instructions, method bodies and their binary
//! encoding.
//!
//! Method bodies are decoded once when a module is loaded and re-encoded when it is written.
//! In between they are plain values: a list of [`Instruction`]s whose token operands are the
//! typed handles of the owning module, plus the header values and exception clauses of
//! the body. Patching a body therefore never touches raw bytes or tokens.
//!
//! # Architecture
//!
//! - **Opcode table**: [`OPCODES`] lists every one- and two-byte ECMA-335 opcode with its
//!   operand type and flow type; [`OpCode::lookup`] and [`OpCode::by_mnemonic`] search it
//! - **Decoding**: [`decode_method_body`] reads tiny and fat headers, the instruction stream
//!   and the exception sections. Tokens are validated through an [`OperandContext`] supplied
//!   by the module being loaded, and `ldstr` literals are resolved to their text
//! - **Encoding**: [`encode_method_body`] always writes a fat header and fat exception
//!   clauses, interning `ldstr` literals into the `#US` heap of the image being written
//! - **Stable sizes**: every token operand encodes to four bytes whatever it references, so
//!   substituting one handle for another never moves an instruction or a branch target
//!
//! # Key Components
//!
//! - [`OpCode`] / [`OPCODES`] - the ECMA-335 opcode table
//! - [`Instruction`] / [`Operand`] / [`Immediate`] / [`TokenRef`] - decoded instructions with
//!   typed operands
//! - [`MethodBody`] / [`ExceptionHandler`] - header values, instruction list and exception
//!   clauses
//! - [`decode_method_body`] / [`encode_method_body`] - the body binary format
//! - [`decode_instruction`] / [`encode_instruction`] - single instructions
//!
//! # Usage Examples
//!
//! ## Building a body
//!
//! ```rust
//! use dotpatch::assembly::{Immediate, Instruction, MethodBody, OpCode, Operand};
//!
//! let ldc = OpCode::by_mnemonic("ldc.i4.s").unwrap();
//! let ret = OpCode::by_mnemonic("ret").unwrap();
//! let body = MethodBody::new(vec![
//!     Instruction::new(ldc, Operand::Immediate(Immediate::Int8(42))),
//!     Instruction::new(ret, Operand::None),
//! ]);
//!
//! assert_eq!(body.code_size(), 3);
//! assert_eq!(body.instructions[1].offset, 2);
//! ```
//!
//! ## Decoding raw bytes
//!
//! ```rust
//! use dotpatch::{
//!     assembly::{decode_method_body, OperandContext},
//!     metadata::token::Token,
//!     Error, Result,
//! };
//!
//! struct NoTokens;
//!
//! impl OperandContext for NoTokens {
//!     fn contains(&self, _token: Token) -> bool {
//!         false
//!     }
//!
//!     fn is_field_reference(&self, _token: Token) -> bool {
//!         false
//!     }
//!
//!     fn user_string(&self, _index: u32) -> Result<String> {
//!         Err(Error::Empty)
//!     }
//! }
//!
//! // Tiny header for three bytes of code: ldarg.0; ldarg.1; ret
//! let body = decode_method_body(&[0x0E, 0x02, 0x03, 0x2A], &NoTokens)?;
//! let mnemonics: Vec<_> = body.instructions.iter().map(|i| i.mnemonic()).collect();
//! assert_eq!(mnemonics, ["ldarg.0", "ldarg.1", "ret"]);
//!
//! // Calls need a context that knows the token
//! assert!(decode_method_body(&[0x16, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A], &NoTokens).is_err());
//! # Ok::<(), dotpatch::Error>(())
//! ```

mod body;
mod decoder;
mod encoder;
mod instruction;
mod opcodes;

pub use body::{ExceptionHandler, HandlerKind, MethodBody};
pub use decoder::{decode_instruction, decode_method_body, OperandContext};
pub use encoder::{encode_instruction, encode_method_body};
pub use instruction::{Immediate, Instruction, Operand, TokenRef};
pub use opcodes::{FlowType, OpCode, OperandType, OPCODES};
