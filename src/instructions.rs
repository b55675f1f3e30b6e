//! The instruction catalog and its byte-level encoding.
//!
//! [`Opcode`] is the single source of truth: the opcode byte of a variant is
//! its enumeration position, and its mnemonic is its variant name. The
//! assembler's mnemonic map (`EnumFromStr`), the disassembler's name table
//! (`EnumName`) and the interpreter's dispatch (`FromPrimitive`) are all
//! derived from the one enum, so adding an instruction means touching the
//! enum, the dispatch match in `interp::exec`, and nothing else.
//!
//! An instruction is one opcode byte followed by operands as described by
//! [`Opcode::layout`]. A `Typed` slot holds an *operand-read*: an operand
//! prefix byte (`CONST*`, `RELCONST*`, `REL*` or a bare width marker)
//! followed by its payload — `CONST*` payloads at the width the prefix
//! names, everything else a little-endian `i64` offset. Raw slots have no
//! prefix byte at all.

use byteorder::{ByteOrder, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use util::Endian;
use util::{EnumFromStr, EnumName};
use util_derive::{EnumFromStr, EnumName};

/// Processor instruction set.
///
/// Binary math and comparison instructions all share one shape: two
/// operand-reads and a raw `i64` destination offset, relative to the base
/// pointer. Comparisons store a 32-bit 0/1. The `U`/`S` prefix picks the
/// signedness the operands are interpreted with; `EQ`/`NEQ` need no such
/// split.
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive, EnumName, EnumFromStr,
)]
#[rustfmt::skip]
pub enum Opcode {
    //  Mnemonic     | Effect
    //---------------+--------------------------------------------------------
    // 8-bit integer math
    ADDI8,        // | [dest] = a + b (wrapping)
    SUBI8,        // | [dest] = a - b (wrapping)
    MULI8,        // | [dest] = a * b (wrapping)
    UDIVI8,       // | [dest] = a / b, unsigned
    SDIVI8,       // | [dest] = a / b, signed
    UREMI8,       // | [dest] = a % b, unsigned
    SREMI8,       // | [dest] = a % b, signed
    EQI8,         // | [dest] = (a == b) as i32
    NEQI8,        // | [dest] = (a != b) as i32
    UGTI8,        // | [dest] = (a > b) as i32, unsigned
    SGTI8,        // | [dest] = (a > b) as i32, signed
    UGEI8,        // | [dest] = (a >= b) as i32, unsigned
    SGEI8,        // | [dest] = (a >= b) as i32, signed
    ULTI8,        // | [dest] = (a < b) as i32, unsigned
    SLTI8,        // | [dest] = (a < b) as i32, signed
    ULEI8,        // | [dest] = (a <= b) as i32, unsigned
    SLEI8,        // | [dest] = (a <= b) as i32, signed
    //---------------+--------------------------------------------------------
    // 16-bit integer math
    ADDI16, SUBI16, MULI16, UDIVI16, SDIVI16, UREMI16, SREMI16,
    EQI16, NEQI16, UGTI16, SGTI16, UGEI16, SGEI16, ULTI16, SLTI16, ULEI16, SLEI16,
    //---------------+--------------------------------------------------------
    // 32-bit integer math
    ADDI32, SUBI32, MULI32, UDIVI32, SDIVI32, UREMI32, SREMI32,
    EQI32, NEQI32, UGTI32, SGTI32, UGEI32, SGEI32, ULTI32, SLTI32, ULEI32, SLEI32,
    //---------------+--------------------------------------------------------
    // 64-bit integer math
    ADDI64, SUBI64, MULI64, UDIVI64, SDIVI64, UREMI64, SREMI64,
    EQI64, NEQI64, UGTI64, SGTI64, UGEI64, SGEI64, ULTI64, SLTI64, ULEI64, SLEI64,
    //---------------+--------------------------------------------------------
    // 32-bit float math (IEEE 754)
    ADDF32, SUBF32, MULF32, DIVF32, REMF32,
    EQF32, NEQF32, LTF32, LEF32, GTF32, GEF32,
    //---------------+--------------------------------------------------------
    // 64-bit float math (IEEE 754)
    ADDF64, SUBF64, MULF64, DIVF64, REMF64,
    EQF64, NEQF64, LTF64, LEF64, GTF64, GEF64,
    //---------------+--------------------------------------------------------
    // Bitwise math, per width
    AND8, AND16, AND32, AND64,
    OR8, OR16, OR32, OR64,
    XOR8, XOR16, XOR32, XOR64,

    /// Logical shift left: `[op][raw i32 width-bytes][raw i64 a]
    /// [raw i64 b][raw i64 dest]`, all offsets base-pointer-relative. The
    /// value at `a` is shifted by the `i64` at `b`; the leading byte count
    /// selects the operating width.
    SHL,
    /// Logical shift right; layout as `SHL`.
    SHR,

    /// Store an immediate into a stack slot:
    /// `[op][operand dest: i64][typed immediate]`. The immediate's prefix
    /// picks the store width; a `RELCONSTI64` immediate stores `bp + offset`
    /// (making a stack pointer) and a `RELI64` immediate stores the machine
    /// address of the slot itself.
    STORECONST,
    /// Copy bytes between stack locations:
    /// `[op][operand dest: i64][raw i32 size][operand src: i64]`. A zero
    /// machine destination is a nil-pointer store and terminates the
    /// program.
    STORE,
    /// Adjust the stack pointer by a raw `i32` delta.
    BUMPSP,
    /// `[op][operand cond: i32][operand true: i32][operand false: i32]` —
    /// jump to `true` when the condition word is 1, else to `false`.
    JUMPIF,
    /// Unconditional jump to a raw `i32` instruction index.
    JUMP,
    /// Indirect call: the operand-read yields a function id, looked up in
    /// the function table.
    CALLI,
    /// Foreign call through the external-function table; raw `i32` index.
    CALLE,
    /// Direct call: raw `i32` function id.
    CALL,
    /// Return: restore caller `sp`/`pc`/`bp` from the saved registers.
    RET,
    /// Stop the machine, leaving the stack intact for result readout.
    EXIT,
    /// Failed runtime check (union tag mismatch). Prints the current
    /// statement and terminates with a nonzero exit.
    PANIC,
    /// Write a string to stdout; the operand-read yields the absolute stack
    /// offset of a `{data: ptr, count: i64}` header.
    PUTS,
    NOP,
    /// Logical not of the `i32` at `bp + [raw i64 offset]`, in place.
    NOT,
    /// Complement `[raw i32 bytes]` bytes at `bp + [raw i64 offset]`, in
    /// place.
    BITNOT,
    /// Scalar conversion:
    /// `[op][raw i32 from-kind][raw i64 from-off][raw i32 to-kind]
    /// [raw i64 to-off]`. Kind tags are `oast::TypeKind` discriminants;
    /// signed sources sign-extend, unsigned zero-extend, float/int
    /// conversions round toward zero.
    CONVERT,
    //---------------+--------------------------------------------------------
    // Operand prefixes. These never dispatch as instructions; they tag the
    // operand bytes that follow inside a `Typed` slot.

    // Immediates, payload at the named width.
    CONSTI8, CONSTI16, CONSTI32, CONSTI64, CONSTF32, CONSTF64,

    // Bare width markers. As operands they read the slot at `bp + offset`
    // like `REL*`; the `I64` marker additionally treats the loaded value as
    // a machine pointer and rebases it onto the stack.
    I8, I16, I32, I64, F32, F64,

    // Relative constants: the operand value is `bp + offset` itself.
    RELCONSTI32, RELCONSTI64,

    // Relative loads: read a scalar from `bp + offset`.
    RELI8, RELI16, RELI32, RELI64, RELF32, RELF64,
}

/// One operand position in an instruction's layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Slot {
    /// An operand-read: prefix byte plus payload.
    Typed,
    /// A typed immediate (`STORECONST`'s value operand): prefix byte plus
    /// payload, width taken from the prefix.
    Imm,
    RawI32,
    RawI64,
}

impl Opcode {
    /// Number of distinct opcodes; opcode bytes are `0..COUNT`.
    pub const COUNT: usize = Opcode::RELF64 as usize + 1;

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        num::FromPrimitive::from_u8(byte)
    }

    #[inline]
    fn disc(self) -> u8 {
        self as u8
    }

    pub fn is_int_binop(self) -> bool {
        self.disc() <= Opcode::SLEI64.disc()
    }

    pub fn is_float_binop(self) -> bool {
        self.disc() >= Opcode::ADDF32.disc() && self.disc() <= Opcode::GEF64.disc()
    }

    pub fn is_bitwise(self) -> bool {
        self.disc() >= Opcode::AND8.disc() && self.disc() <= Opcode::XOR64.disc()
    }

    /// True for every byte that may open an operand-read.
    pub fn is_operand_prefix(self) -> bool {
        self.disc() >= Opcode::CONSTI8.disc()
    }

    pub fn is_const(self) -> bool {
        self.disc() >= Opcode::CONSTI8.disc() && self.disc() <= Opcode::CONSTF64.disc()
    }

    pub fn is_marker(self) -> bool {
        self.disc() >= Opcode::I8.disc() && self.disc() <= Opcode::F64.disc()
    }

    pub fn is_relconst(self) -> bool {
        self == Opcode::RELCONSTI32 || self == Opcode::RELCONSTI64
    }

    pub fn is_rel(self) -> bool {
        self.disc() >= Opcode::RELI8.disc() && self.disc() <= Opcode::RELF64.disc()
    }

    /// Payload bytes following this operand prefix.
    pub fn payload_size(self) -> usize {
        debug_assert!(self.is_operand_prefix());
        match self {
            Opcode::CONSTI8 => 1,
            Opcode::CONSTI16 => 2,
            Opcode::CONSTI32 | Opcode::CONSTF32 => 4,
            Opcode::CONSTI64 | Opcode::CONSTF64 => 8,
            // Every relative form and bare marker carries an i64 offset.
            _ => 8,
        }
    }

    /// True when the `CONST*` payload is a float.
    pub fn is_float_const(self) -> bool {
        self == Opcode::CONSTF32 || self == Opcode::CONSTF64
    }

    /// The operand layout following the opcode byte.
    pub fn layout(self) -> &'static [Slot] {
        if self.is_int_binop() || self.is_float_binop() || self.is_bitwise() {
            return &[Slot::Typed, Slot::Typed, Slot::RawI64];
        }

        match self {
            Opcode::SHL | Opcode::SHR => {
                &[Slot::RawI32, Slot::RawI64, Slot::RawI64, Slot::RawI64]
            }
            Opcode::STORECONST => &[Slot::Typed, Slot::Imm],
            Opcode::STORE => &[Slot::Typed, Slot::RawI32, Slot::Typed],
            Opcode::BUMPSP | Opcode::JUMP | Opcode::CALL | Opcode::CALLE => &[Slot::RawI32],
            Opcode::CALLI | Opcode::PUTS => &[Slot::Typed],
            Opcode::JUMPIF => &[Slot::Typed, Slot::Typed, Slot::Typed],
            Opcode::NOT => &[Slot::RawI64],
            Opcode::BITNOT => &[Slot::RawI32, Slot::RawI64],
            Opcode::CONVERT => &[Slot::RawI32, Slot::RawI64, Slot::RawI32, Slot::RawI64],
            _ => &[],
        }
    }

    /// The assembler's operand token budget: each layout slot costs one,
    /// and an operand prefix inside a `Typed` slot pays for its own payload
    /// token.
    pub fn arg_count(self) -> u32 {
        if self.is_operand_prefix() {
            1
        } else {
            self.layout().len() as u32
        }
    }
}

/// Append-only encoder over an instruction buffer. The bytecode emitter, the
/// assembler and the tests all produce streams through this one type, so the
/// encoding lives in exactly one place.
pub struct InstructionWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> InstructionWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> InstructionWriter<'a> {
        InstructionWriter { buf }
    }

    pub fn pos(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.buf.push(op as u8);
        self
    }

    pub fn raw_i8(&mut self, v: i8) -> &mut Self {
        self.buf.write_i8(v).unwrap();
        self
    }

    pub fn raw_i16(&mut self, v: i16) -> &mut Self {
        self.buf.write_i16::<Endian>(v).unwrap();
        self
    }

    pub fn raw_i32(&mut self, v: i32) -> &mut Self {
        self.buf.write_i32::<Endian>(v).unwrap();
        self
    }

    pub fn raw_i64(&mut self, v: i64) -> &mut Self {
        self.buf.write_i64::<Endian>(v).unwrap();
        self
    }

    pub fn raw_f32(&mut self, v: f32) -> &mut Self {
        self.buf.write_f32::<Endian>(v).unwrap();
        self
    }

    pub fn raw_f64(&mut self, v: f64) -> &mut Self {
        self.buf.write_f64::<Endian>(v).unwrap();
        self
    }

    pub fn const_i8(&mut self, v: i8) -> &mut Self {
        self.op(Opcode::CONSTI8);
        self.raw_i8(v)
    }

    pub fn const_i16(&mut self, v: i16) -> &mut Self {
        self.op(Opcode::CONSTI16);
        self.raw_i16(v)
    }

    pub fn const_i32(&mut self, v: i32) -> &mut Self {
        self.op(Opcode::CONSTI32);
        self.raw_i32(v)
    }

    pub fn const_i64(&mut self, v: i64) -> &mut Self {
        self.op(Opcode::CONSTI64);
        self.raw_i64(v)
    }

    pub fn const_f32(&mut self, v: f32) -> &mut Self {
        self.op(Opcode::CONSTF32);
        self.raw_f32(v)
    }

    pub fn const_f64(&mut self, v: f64) -> &mut Self {
        self.op(Opcode::CONSTF64);
        self.raw_f64(v)
    }

    pub fn relconst_i32(&mut self, offset: i64) -> &mut Self {
        self.op(Opcode::RELCONSTI32);
        self.raw_i64(offset)
    }

    pub fn relconst_i64(&mut self, offset: i64) -> &mut Self {
        self.op(Opcode::RELCONSTI64);
        self.raw_i64(offset)
    }

    /// A `REL*` or bare-marker operand: prefix plus `i64` offset.
    pub fn rel(&mut self, prefix: Opcode, offset: i64) -> &mut Self {
        debug_assert!(prefix.is_rel() || prefix.is_marker());
        self.op(prefix);
        self.raw_i64(offset)
    }

    /// Overwrite the four bytes at `at` with `v`; the fixup pass patches
    /// call and jump targets through this.
    pub fn patch_i32(&mut self, at: u64, v: i32) {
        let at = at as usize;
        Endian::write_i32(&mut self.buf[at..at + 4], v);
    }
}
