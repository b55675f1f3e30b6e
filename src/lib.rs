//! Stack-based bytecode virtual machine for the Opal language.
//!
//! The crate owns the instruction catalog ([`Opcode`]), the byte-level
//! operand encoding ([`instructions::InstructionWriter`], [`instructions::Slot`]),
//! the interpreter itself ([`Interpreter`]), the mnemonic printer used for
//! textual dumps and the debugger's `asm` command ([`MnemonicPrinter`]), the
//! foreign-call bridge ([`ffi`]) and the interactive debugger ([`debug`]).
//!
//! A program enters the VM as a [`Program`]: instruction bytes, a function
//! table, a source map and the external-call descriptors. The bytecode
//! emitter in `opalgen` and the assembler in `oasm` both produce this type,
//! so everything downstream of them — execution, disassembly, debugging —
//! is agnostic about where the bytes came from.

pub mod constants;
pub mod debug;
pub mod disasm;
pub mod ffi;
pub mod fn_table;
pub mod instructions;
pub mod interp;
pub mod scalar;
pub mod source_map;

#[cfg(test)]
mod test;

pub use crate::disasm::MnemonicPrinter;
pub use crate::ffi::{AbiCall, AbiParam, AbiType, CifAbi, ExternalFn};
pub use crate::fn_table::FnTable;
pub use crate::instructions::{InstructionWriter, Opcode, Slot};
pub use crate::interp::{ExitCode, Interpreter};
pub use crate::source_map::{SourceMap, SourceMapStatement};

pub use util::Endian;

/// Everything the VM needs to execute: the quadruple produced by the
/// bytecode emitter, and equally by the assembler (with no external
/// functions).
#[derive(Debug, Default)]
pub struct Program {
    pub instructions: Vec<u8>,
    pub fn_table: FnTable,
    pub source_map: SourceMap,
    pub external_fns: Vec<ExternalFn>,
}

impl Program {
    pub fn new(instructions: Vec<u8>) -> Program {
        Program {
            instructions,
            ..Program::default()
        }
    }
}
