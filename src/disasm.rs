//! The mnemonic printer: instruction bytes back to assembler text. Used by
//! the `--print-asm` dump, the `.oas` output mode, and the debugger's `asm`
//! command. Output fed back through the assembler reproduces the input
//! bytes.

use util::EnumName;

use crate::fn_table::FnTable;
use crate::instructions::{Opcode, Slot};
use crate::scalar::Scalar;
use crate::source_map::SourceMap;

pub struct MnemonicPrinter<'a> {
    instructions: &'a [u8],
    fn_table: Option<&'a FnTable>,
    source_map: Option<&'a SourceMap>,
    pc: u64,
    out: String,
}

impl<'a> MnemonicPrinter<'a> {
    pub fn new(instructions: &'a [u8]) -> MnemonicPrinter<'a> {
        MnemonicPrinter {
            instructions,
            fn_table: None,
            source_map: None,
            pc: 0,
            out: String::new(),
        }
    }

    /// Interleave `FN <id>` directives at function entry points.
    pub fn with_fn_table(mut self, fn_table: &'a FnTable) -> MnemonicPrinter<'a> {
        self.fn_table = Some(fn_table);
        self
    }

    /// Interleave statement boundaries as comments.
    pub fn with_source_map(mut self, source_map: &'a SourceMap) -> MnemonicPrinter<'a> {
        self.source_map = Some(source_map);
        self
    }

    /// Disassembles the whole stream.
    pub fn debug_string(mut self) -> String {
        self.pc = 0;
        self.out.clear();
        while (self.pc as usize) < self.instructions.len() {
            self.step();
        }
        self.out
    }

    /// Disassembles the instructions in `[start_pc, end_pc)`; the debugger's
    /// `asm` command passes the current statement's range.
    pub fn debug_string_range(mut self, start_pc: u64, end_pc: u64) -> String {
        self.pc = start_pc;
        self.out.clear();
        while self.pc < end_pc && (self.pc as usize) < self.instructions.len() {
            self.step();
        }
        self.out
    }

    fn step(&mut self) {
        if let Some(fn_table) = self.fn_table {
            let at = self.pc;
            for id in fn_table.ids_at(at) {
                self.out.push_str(&format!("FN {}\n", id));
            }
        }

        if let Some(map) = self.source_map {
            if let Some(stmt) = map.statement_starting_at(self.pc) {
                self.out
                    .push_str(&format!("-- line {}\n", stmt.region.start.line));
            }
        }

        let byte = self.instructions[self.pc as usize];
        let op = Opcode::from_byte(byte)
            .unwrap_or_else(|| panic!("unrecognized opcode byte {} at pc {}", byte, self.pc));
        self.pc += 1;

        self.out.push_str(op.enum_name());
        for slot in op.layout() {
            self.out.push(' ');
            match slot {
                Slot::Typed | Slot::Imm => self.typed_operand(),
                Slot::RawI32 => {
                    let v = self.consume::<i32>();
                    self.out.push_str(&v.to_string());
                }
                Slot::RawI64 => {
                    let v = self.consume::<i64>();
                    self.out.push_str(&v.to_string());
                }
            }
        }
        self.out.push('\n');
    }

    fn typed_operand(&mut self) {
        let byte = self.instructions[self.pc as usize];
        let prefix = Opcode::from_byte(byte)
            .unwrap_or_else(|| panic!("unrecognized operand byte {} at pc {}", byte, self.pc));
        assert!(
            prefix.is_operand_prefix(),
            "opcode {:?} in operand position",
            prefix
        );
        self.pc += 1;

        self.out.push_str(prefix.enum_name());
        self.out.push(' ');

        let text = match prefix {
            Opcode::CONSTI8 => self.consume::<i8>().to_string(),
            Opcode::CONSTI16 => self.consume::<i16>().to_string(),
            Opcode::CONSTI32 => self.consume::<i32>().to_string(),
            Opcode::CONSTI64 => self.consume::<i64>().to_string(),
            Opcode::CONSTF32 => self.consume::<f32>().to_string(),
            Opcode::CONSTF64 => self.consume::<f64>().to_string(),
            _ => self.consume::<i64>().to_string(),
        };
        self.out.push_str(&text);
    }

    fn consume<T: Scalar>(&mut self) -> T {
        let at = self.pc as usize;
        let value = T::from_le(&self.instructions[at..at + T::SIZE]);
        self.pc += T::SIZE as u64;
        value
    }
}
