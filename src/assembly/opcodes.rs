//! The ECMA-335 CIL opcode table (Partition III).
//!
//! Every opcode is described by its encoding (`prefix`, `value`), its mnemonic, the shape of
//! its inline operand and its effect on control flow. The table is sorted by encoding so that
//! decoding is a binary search.

/// Inline operand shape of an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit immediate
    Int8,
    /// Unsigned 8-bit immediate (`unaligned.`, `no.`)
    UInt8,
    /// 8-bit argument or local index
    ShortVariable,
    /// 16-bit argument or local index
    Variable,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit float immediate
    Float32,
    /// 64-bit float immediate
    Float64,
    /// 8-bit relative branch displacement
    ShortBranch,
    /// 32-bit relative branch displacement
    Branch,
    /// Jump table: u32 count followed by 32-bit displacements
    Switch,
    /// `MethodDef`, `MemberRef` or `MethodSpec` token
    Method,
    /// `Field` or `MemberRef` token
    Field,
    /// `TypeDef`, `TypeRef` or `TypeSpec` token
    Type,
    /// `#US` heap token
    String,
    /// `StandAloneSig` token
    Signature,
    /// Any type, method or field token (`ldtoken`)
    Token,
}

impl OperandType {
    /// Size of the inline operand in bytes; `Switch` reports its fixed count field only
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            OperandType::None => 0,
            OperandType::Int8
            | OperandType::UInt8
            | OperandType::ShortVariable
            | OperandType::ShortBranch => 1,
            OperandType::Variable => 2,
            OperandType::Int64 | OperandType::Float64 => 8,
            _ => 4,
        }
    }
}

/// How an instruction affects control flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Branches or falls through
    ConditionalBranch,
    /// Always branches
    UnconditionalBranch,
    /// Jump table
    Switch,
    /// Calls a method and continues
    Call,
    /// Leaves the method
    Return,
    /// Raises or rethrows an exception
    Throw,
}

/// Static description of one opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpCode {
    /// `0xFE` for two-byte opcodes, 0 otherwise
    pub prefix: u8,
    /// The opcode byte
    pub value: u8,
    /// Assembler mnemonic
    pub mnemonic: &'static str,
    /// Inline operand shape
    pub operand_type: OperandType,
    /// Control flow behavior
    pub flow: FlowType,
}

impl OpCode {
    /// Encoded size of the opcode itself
    #[must_use]
    pub fn size(&self) -> usize {
        if self.prefix == 0 {
            1
        } else {
            2
        }
    }

    /// Look up an opcode by encoding
    #[must_use]
    pub fn lookup(prefix: u8, value: u8) -> Option<&'static OpCode> {
        OPCODES
            .binary_search_by(|op| (op.prefix, op.value).cmp(&(prefix, value)))
            .ok()
            .map(|index| &OPCODES[index])
    }

    /// Look up an opcode by mnemonic
    #[must_use]
    pub fn by_mnemonic(mnemonic: &str) -> Option<&'static OpCode> {
        OPCODES.iter().find(|op| op.mnemonic == mnemonic)
    }
}

macro_rules! opcodes {
    ($($prefix:literal $value:literal $mnemonic:literal $operand:ident $flow:ident;)*) => {
        /// All opcodes, sorted by `(prefix, value)`
        pub static OPCODES: &[OpCode] = &[
            $(OpCode {
                prefix: $prefix,
                value: $value,
                mnemonic: $mnemonic,
                operand_type: OperandType::$operand,
                flow: FlowType::$flow,
            },)*
        ];
    };
}

opcodes! {
    0x00 0x00 "nop" None Sequential;
    0x00 0x01 "break" None Sequential;
    0x00 0x02 "ldarg.0" None Sequential;
    0x00 0x03 "ldarg.1" None Sequential;
    0x00 0x04 "ldarg.2" None Sequential;
    0x00 0x05 "ldarg.3" None Sequential;
    0x00 0x06 "ldloc.0" None Sequential;
    0x00 0x07 "ldloc.1" None Sequential;
    0x00 0x08 "ldloc.2" None Sequential;
    0x00 0x09 "ldloc.3" None Sequential;
    0x00 0x0A "stloc.0" None Sequential;
    0x00 0x0B "stloc.1" None Sequential;
    0x00 0x0C "stloc.2" None Sequential;
    0x00 0x0D "stloc.3" None Sequential;
    0x00 0x0E "ldarg.s" ShortVariable Sequential;
    0x00 0x0F "ldarga.s" ShortVariable Sequential;
    0x00 0x10 "starg.s" ShortVariable Sequential;
    0x00 0x11 "ldloc.s" ShortVariable Sequential;
    0x00 0x12 "ldloca.s" ShortVariable Sequential;
    0x00 0x13 "stloc.s" ShortVariable Sequential;
    0x00 0x14 "ldnull" None Sequential;
    0x00 0x15 "ldc.i4.m1" None Sequential;
    0x00 0x16 "ldc.i4.0" None Sequential;
    0x00 0x17 "ldc.i4.1" None Sequential;
    0x00 0x18 "ldc.i4.2" None Sequential;
    0x00 0x19 "ldc.i4.3" None Sequential;
    0x00 0x1A "ldc.i4.4" None Sequential;
    0x00 0x1B "ldc.i4.5" None Sequential;
    0x00 0x1C "ldc.i4.6" None Sequential;
    0x00 0x1D "ldc.i4.7" None Sequential;
    0x00 0x1E "ldc.i4.8" None Sequential;
    0x00 0x1F "ldc.i4.s" Int8 Sequential;
    0x00 0x20 "ldc.i4" Int32 Sequential;
    0x00 0x21 "ldc.i8" Int64 Sequential;
    0x00 0x22 "ldc.r4" Float32 Sequential;
    0x00 0x23 "ldc.r8" Float64 Sequential;
    0x00 0x25 "dup" None Sequential;
    0x00 0x26 "pop" None Sequential;
    0x00 0x27 "jmp" Method Return;
    0x00 0x28 "call" Method Call;
    0x00 0x29 "calli" Signature Call;
    0x00 0x2A "ret" None Return;
    0x00 0x2B "br.s" ShortBranch UnconditionalBranch;
    0x00 0x2C "brfalse.s" ShortBranch ConditionalBranch;
    0x00 0x2D "brtrue.s" ShortBranch ConditionalBranch;
    0x00 0x2E "beq.s" ShortBranch ConditionalBranch;
    0x00 0x2F "bge.s" ShortBranch ConditionalBranch;
    0x00 0x30 "bgt.s" ShortBranch ConditionalBranch;
    0x00 0x31 "ble.s" ShortBranch ConditionalBranch;
    0x00 0x32 "blt.s" ShortBranch ConditionalBranch;
    0x00 0x33 "bne.un.s" ShortBranch ConditionalBranch;
    0x00 0x34 "bge.un.s" ShortBranch ConditionalBranch;
    0x00 0x35 "bgt.un.s" ShortBranch ConditionalBranch;
    0x00 0x36 "ble.un.s" ShortBranch ConditionalBranch;
    0x00 0x37 "blt.un.s" ShortBranch ConditionalBranch;
    0x00 0x38 "br" Branch UnconditionalBranch;
    0x00 0x39 "brfalse" Branch ConditionalBranch;
    0x00 0x3A "brtrue" Branch ConditionalBranch;
    0x00 0x3B "beq" Branch ConditionalBranch;
    0x00 0x3C "bge" Branch ConditionalBranch;
    0x00 0x3D "bgt" Branch ConditionalBranch;
    0x00 0x3E "ble" Branch ConditionalBranch;
    0x00 0x3F "blt" Branch ConditionalBranch;
    0x00 0x40 "bne.un" Branch ConditionalBranch;
    0x00 0x41 "bge.un" Branch ConditionalBranch;
    0x00 0x42 "bgt.un" Branch ConditionalBranch;
    0x00 0x43 "ble.un" Branch ConditionalBranch;
    0x00 0x44 "blt.un" Branch ConditionalBranch;
    0x00 0x45 "switch" Switch Switch;
    0x00 0x46 "ldind.i1" None Sequential;
    0x00 0x47 "ldind.u1" None Sequential;
    0x00 0x48 "ldind.i2" None Sequential;
    0x00 0x49 "ldind.u2" None Sequential;
    0x00 0x4A "ldind.i4" None Sequential;
    0x00 0x4B "ldind.u4" None Sequential;
    0x00 0x4C "ldind.i8" None Sequential;
    0x00 0x4D "ldind.i" None Sequential;
    0x00 0x4E "ldind.r4" None Sequential;
    0x00 0x4F "ldind.r8" None Sequential;
    0x00 0x50 "ldind.ref" None Sequential;
    0x00 0x51 "stind.ref" None Sequential;
    0x00 0x52 "stind.i1" None Sequential;
    0x00 0x53 "stind.i2" None Sequential;
    0x00 0x54 "stind.i4" None Sequential;
    0x00 0x55 "stind.i8" None Sequential;
    0x00 0x56 "stind.r4" None Sequential;
    0x00 0x57 "stind.r8" None Sequential;
    0x00 0x58 "add" None Sequential;
    0x00 0x59 "sub" None Sequential;
    0x00 0x5A "mul" None Sequential;
    0x00 0x5B "div" None Sequential;
    0x00 0x5C "div.un" None Sequential;
    0x00 0x5D "rem" None Sequential;
    0x00 0x5E "rem.un" None Sequential;
    0x00 0x5F "and" None Sequential;
    0x00 0x60 "or" None Sequential;
    0x00 0x61 "xor" None Sequential;
    0x00 0x62 "shl" None Sequential;
    0x00 0x63 "shr" None Sequential;
    0x00 0x64 "shr.un" None Sequential;
    0x00 0x65 "neg" None Sequential;
    0x00 0x66 "not" None Sequential;
    0x00 0x67 "conv.i1" None Sequential;
    0x00 0x68 "conv.i2" None Sequential;
    0x00 0x69 "conv.i4" None Sequential;
    0x00 0x6A "conv.i8" None Sequential;
    0x00 0x6B "conv.r4" None Sequential;
    0x00 0x6C "conv.r8" None Sequential;
    0x00 0x6D "conv.u4" None Sequential;
    0x00 0x6E "conv.u8" None Sequential;
    0x00 0x6F "callvirt" Method Call;
    0x00 0x70 "cpobj" Type Sequential;
    0x00 0x71 "ldobj" Type Sequential;
    0x00 0x72 "ldstr" String Sequential;
    0x00 0x73 "newobj" Method Call;
    0x00 0x74 "castclass" Type Sequential;
    0x00 0x75 "isinst" Type Sequential;
    0x00 0x76 "conv.r.un" None Sequential;
    0x00 0x79 "unbox" Type Sequential;
    0x00 0x7A "throw" None Throw;
    0x00 0x7B "ldfld" Field Sequential;
    0x00 0x7C "ldflda" Field Sequential;
    0x00 0x7D "stfld" Field Sequential;
    0x00 0x7E "ldsfld" Field Sequential;
    0x00 0x7F "ldsflda" Field Sequential;
    0x00 0x80 "stsfld" Field Sequential;
    0x00 0x81 "stobj" Type Sequential;
    0x00 0x82 "conv.ovf.i1.un" None Sequential;
    0x00 0x83 "conv.ovf.i2.un" None Sequential;
    0x00 0x84 "conv.ovf.i4.un" None Sequential;
    0x00 0x85 "conv.ovf.i8.un" None Sequential;
    0x00 0x86 "conv.ovf.u1.un" None Sequential;
    0x00 0x87 "conv.ovf.u2.un" None Sequential;
    0x00 0x88 "conv.ovf.u4.un" None Sequential;
    0x00 0x89 "conv.ovf.u8.un" None Sequential;
    0x00 0x8A "conv.ovf.i.un" None Sequential;
    0x00 0x8B "conv.ovf.u.un" None Sequential;
    0x00 0x8C "box" Type Sequential;
    0x00 0x8D "newarr" Type Sequential;
    0x00 0x8E "ldlen" None Sequential;
    0x00 0x8F "ldelema" Type Sequential;
    0x00 0x90 "ldelem.i1" None Sequential;
    0x00 0x91 "ldelem.u1" None Sequential;
    0x00 0x92 "ldelem.i2" None Sequential;
    0x00 0x93 "ldelem.u2" None Sequential;
    0x00 0x94 "ldelem.i4" None Sequential;
    0x00 0x95 "ldelem.u4" None Sequential;
    0x00 0x96 "ldelem.i8" None Sequential;
    0x00 0x97 "ldelem.i" None Sequential;
    0x00 0x98 "ldelem.r4" None Sequential;
    0x00 0x99 "ldelem.r8" None Sequential;
    0x00 0x9A "ldelem.ref" None Sequential;
    0x00 0x9B "stelem.i" None Sequential;
    0x00 0x9C "stelem.i1" None Sequential;
    0x00 0x9D "stelem.i2" None Sequential;
    0x00 0x9E "stelem.i4" None Sequential;
    0x00 0x9F "stelem.i8" None Sequential;
    0x00 0xA0 "stelem.r4" None Sequential;
    0x00 0xA1 "stelem.r8" None Sequential;
    0x00 0xA2 "stelem.ref" None Sequential;
    0x00 0xA3 "ldelem" Type Sequential;
    0x00 0xA4 "stelem" Type Sequential;
    0x00 0xA5 "unbox.any" Type Sequential;
    0x00 0xB3 "conv.ovf.i1" None Sequential;
    0x00 0xB4 "conv.ovf.u1" None Sequential;
    0x00 0xB5 "conv.ovf.i2" None Sequential;
    0x00 0xB6 "conv.ovf.u2" None Sequential;
    0x00 0xB7 "conv.ovf.i4" None Sequential;
    0x00 0xB8 "conv.ovf.u4" None Sequential;
    0x00 0xB9 "conv.ovf.i8" None Sequential;
    0x00 0xBA "conv.ovf.u8" None Sequential;
    0x00 0xC2 "refanyval" Type Sequential;
    0x00 0xC3 "ckfinite" None Sequential;
    0x00 0xC6 "mkrefany" Type Sequential;
    0x00 0xD0 "ldtoken" Token Sequential;
    0x00 0xD1 "conv.u2" None Sequential;
    0x00 0xD2 "conv.u1" None Sequential;
    0x00 0xD3 "conv.i" None Sequential;
    0x00 0xD4 "conv.ovf.i" None Sequential;
    0x00 0xD5 "conv.ovf.u" None Sequential;
    0x00 0xD6 "add.ovf" None Sequential;
    0x00 0xD7 "add.ovf.un" None Sequential;
    0x00 0xD8 "mul.ovf" None Sequential;
    0x00 0xD9 "mul.ovf.un" None Sequential;
    0x00 0xDA "sub.ovf" None Sequential;
    0x00 0xDB "sub.ovf.un" None Sequential;
    0x00 0xDC "endfinally" None Return;
    0x00 0xDD "leave" Branch UnconditionalBranch;
    0x00 0xDE "leave.s" ShortBranch UnconditionalBranch;
    0x00 0xDF "stind.i" None Sequential;
    0x00 0xE0 "conv.u" None Sequential;
    0xFE 0x00 "arglist" None Sequential;
    0xFE 0x01 "ceq" None Sequential;
    0xFE 0x02 "cgt" None Sequential;
    0xFE 0x03 "cgt.un" None Sequential;
    0xFE 0x04 "clt" None Sequential;
    0xFE 0x05 "clt.un" None Sequential;
    0xFE 0x06 "ldftn" Method Sequential;
    0xFE 0x07 "ldvirtftn" Method Sequential;
    0xFE 0x09 "ldarg" Variable Sequential;
    0xFE 0x0A "ldarga" Variable Sequential;
    0xFE 0x0B "starg" Variable Sequential;
    0xFE 0x0C "ldloc" Variable Sequential;
    0xFE 0x0D "ldloca" Variable Sequential;
    0xFE 0x0E "stloc" Variable Sequential;
    0xFE 0x0F "localloc" None Sequential;
    0xFE 0x11 "endfilter" None Return;
    0xFE 0x12 "unaligned." UInt8 Sequential;
    0xFE 0x13 "volatile." None Sequential;
    0xFE 0x14 "tail." None Sequential;
    0xFE 0x15 "initobj" Type Sequential;
    0xFE 0x16 "constrained." Type Sequential;
    0xFE 0x17 "cpblk" None Sequential;
    0xFE 0x18 "initblk" None Sequential;
    0xFE 0x19 "no." UInt8 Sequential;
    0xFE 0x1A "rethrow" None Throw;
    0xFE 0x1C "sizeof" Type Sequential;
    0xFE 0x1D "refanytype" None Sequential;
    0xFE 0x1E "readonly." None Sequential;
}
