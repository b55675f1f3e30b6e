//! Instruction execution: one handler per family, one dispatch arm per
//! opcode.

use std::io::Write;

use oast::TypeKind;

use crate::instructions::Opcode;
use crate::interp::{ExitCode, Interpreter};
use crate::scalar::{Bits, CastScalar, Number, Scalar};

impl Interpreter {
    pub(crate) fn exec(&mut self, op: Opcode) {
        match op {
            // 8-bit integer math
            Opcode::ADDI8 => self.math_add::<i8>(),
            Opcode::SUBI8 => self.math_sub::<i8>(),
            Opcode::MULI8 => self.math_mul::<i8>(),
            Opcode::UDIVI8 => self.math_div::<u8>(),
            Opcode::SDIVI8 => self.math_div::<i8>(),
            Opcode::UREMI8 => self.math_rem::<u8>(),
            Opcode::SREMI8 => self.math_rem::<i8>(),
            Opcode::EQI8 => self.cmp_eq::<i8>(),
            Opcode::NEQI8 => self.cmp_neq::<i8>(),
            Opcode::UGTI8 => self.cmp_gt::<u8>(),
            Opcode::SGTI8 => self.cmp_gt::<i8>(),
            Opcode::UGEI8 => self.cmp_ge::<u8>(),
            Opcode::SGEI8 => self.cmp_ge::<i8>(),
            Opcode::ULTI8 => self.cmp_lt::<u8>(),
            Opcode::SLTI8 => self.cmp_lt::<i8>(),
            Opcode::ULEI8 => self.cmp_le::<u8>(),
            Opcode::SLEI8 => self.cmp_le::<i8>(),

            // 16-bit integer math
            Opcode::ADDI16 => self.math_add::<i16>(),
            Opcode::SUBI16 => self.math_sub::<i16>(),
            Opcode::MULI16 => self.math_mul::<i16>(),
            Opcode::UDIVI16 => self.math_div::<u16>(),
            Opcode::SDIVI16 => self.math_div::<i16>(),
            Opcode::UREMI16 => self.math_rem::<u16>(),
            Opcode::SREMI16 => self.math_rem::<i16>(),
            Opcode::EQI16 => self.cmp_eq::<i16>(),
            Opcode::NEQI16 => self.cmp_neq::<i16>(),
            Opcode::UGTI16 => self.cmp_gt::<u16>(),
            Opcode::SGTI16 => self.cmp_gt::<i16>(),
            Opcode::UGEI16 => self.cmp_ge::<u16>(),
            Opcode::SGEI16 => self.cmp_ge::<i16>(),
            Opcode::ULTI16 => self.cmp_lt::<u16>(),
            Opcode::SLTI16 => self.cmp_lt::<i16>(),
            Opcode::ULEI16 => self.cmp_le::<u16>(),
            Opcode::SLEI16 => self.cmp_le::<i16>(),

            // 32-bit integer math
            Opcode::ADDI32 => self.math_add::<i32>(),
            Opcode::SUBI32 => self.math_sub::<i32>(),
            Opcode::MULI32 => self.math_mul::<i32>(),
            Opcode::UDIVI32 => self.math_div::<u32>(),
            Opcode::SDIVI32 => self.math_div::<i32>(),
            Opcode::UREMI32 => self.math_rem::<u32>(),
            Opcode::SREMI32 => self.math_rem::<i32>(),
            Opcode::EQI32 => self.cmp_eq::<i32>(),
            Opcode::NEQI32 => self.cmp_neq::<i32>(),
            Opcode::UGTI32 => self.cmp_gt::<u32>(),
            Opcode::SGTI32 => self.cmp_gt::<i32>(),
            Opcode::UGEI32 => self.cmp_ge::<u32>(),
            Opcode::SGEI32 => self.cmp_ge::<i32>(),
            Opcode::ULTI32 => self.cmp_lt::<u32>(),
            Opcode::SLTI32 => self.cmp_lt::<i32>(),
            Opcode::ULEI32 => self.cmp_le::<u32>(),
            Opcode::SLEI32 => self.cmp_le::<i32>(),

            // 64-bit integer math
            Opcode::ADDI64 => self.math_add::<i64>(),
            Opcode::SUBI64 => self.math_sub::<i64>(),
            Opcode::MULI64 => self.math_mul::<i64>(),
            Opcode::UDIVI64 => self.math_div::<u64>(),
            Opcode::SDIVI64 => self.math_div::<i64>(),
            Opcode::UREMI64 => self.math_rem::<u64>(),
            Opcode::SREMI64 => self.math_rem::<i64>(),
            Opcode::EQI64 => self.cmp_eq::<i64>(),
            Opcode::NEQI64 => self.cmp_neq::<i64>(),
            Opcode::UGTI64 => self.cmp_gt::<u64>(),
            Opcode::SGTI64 => self.cmp_gt::<i64>(),
            Opcode::UGEI64 => self.cmp_ge::<u64>(),
            Opcode::SGEI64 => self.cmp_ge::<i64>(),
            Opcode::ULTI64 => self.cmp_lt::<u64>(),
            Opcode::SLTI64 => self.cmp_lt::<i64>(),
            Opcode::ULEI64 => self.cmp_le::<u64>(),
            Opcode::SLEI64 => self.cmp_le::<i64>(),

            // 32-bit float math
            Opcode::ADDF32 => self.math_add::<f32>(),
            Opcode::SUBF32 => self.math_sub::<f32>(),
            Opcode::MULF32 => self.math_mul::<f32>(),
            Opcode::DIVF32 => self.math_div::<f32>(),
            Opcode::REMF32 => self.math_rem::<f32>(),
            Opcode::EQF32 => self.cmp_eq::<f32>(),
            Opcode::NEQF32 => self.cmp_neq::<f32>(),
            Opcode::LTF32 => self.cmp_lt::<f32>(),
            Opcode::LEF32 => self.cmp_le::<f32>(),
            Opcode::GTF32 => self.cmp_gt::<f32>(),
            Opcode::GEF32 => self.cmp_ge::<f32>(),

            // 64-bit float math
            Opcode::ADDF64 => self.math_add::<f64>(),
            Opcode::SUBF64 => self.math_sub::<f64>(),
            Opcode::MULF64 => self.math_mul::<f64>(),
            Opcode::DIVF64 => self.math_div::<f64>(),
            Opcode::REMF64 => self.math_rem::<f64>(),
            Opcode::EQF64 => self.cmp_eq::<f64>(),
            Opcode::NEQF64 => self.cmp_neq::<f64>(),
            Opcode::LTF64 => self.cmp_lt::<f64>(),
            Opcode::LEF64 => self.cmp_le::<f64>(),
            Opcode::GTF64 => self.cmp_gt::<f64>(),
            Opcode::GEF64 => self.cmp_ge::<f64>(),

            // bitwise math
            Opcode::AND8 => self.bit_and::<i8>(),
            Opcode::AND16 => self.bit_and::<i16>(),
            Opcode::AND32 => self.bit_and::<i32>(),
            Opcode::AND64 => self.bit_and::<i64>(),
            Opcode::OR8 => self.bit_or::<i8>(),
            Opcode::OR16 => self.bit_or::<i16>(),
            Opcode::OR32 => self.bit_or::<i32>(),
            Opcode::OR64 => self.bit_or::<i64>(),
            Opcode::XOR8 => self.bit_xor::<i8>(),
            Opcode::XOR16 => self.bit_xor::<i16>(),
            Opcode::XOR32 => self.bit_xor::<i32>(),
            Opcode::XOR64 => self.bit_xor::<i64>(),
            Opcode::SHL => self.shift(false),
            Opcode::SHR => self.shift(true),

            // general instructions
            Opcode::STORECONST => self.store_const(),
            Opcode::STORE => self.store(),
            Opcode::BUMPSP => self.bump_sp(),
            Opcode::JUMPIF => self.jump_if(),
            Opcode::JUMP => self.jump(),
            Opcode::CALLI => self.calli(),
            Opcode::CALLE => self.calle(),
            Opcode::CALL => self.call(),
            Opcode::RET => self.ret(),
            Opcode::EXIT => self.terminated = true,
            Opcode::PANIC => self.panic_op(),
            Opcode::PUTS => self.puts(),
            Opcode::NOP => {}
            Opcode::NOT => self.not(),
            Opcode::BITNOT => self.bit_not(),
            Opcode::CONVERT => self.convert(),

            other => panic!("opcode {:?} dispatched as an instruction", other),
        }
    }

    // ---- arithmetic ------------------------------------------------------

    fn math_add<T: Number>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        let dest = self.consume::<i64>();
        self.copy_to_stack(a.add_w(b), self.bp + dest);
    }

    fn math_sub<T: Number>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        let dest = self.consume::<i64>();
        self.copy_to_stack(a.sub_w(b), self.bp + dest);
    }

    fn math_mul<T: Number>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        let dest = self.consume::<i64>();
        self.copy_to_stack(a.mul_w(b), self.bp + dest);
    }

    fn math_div<T: Number>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        let dest = self.consume::<i64>();
        self.copy_to_stack(a.div_w(b), self.bp + dest);
    }

    fn math_rem<T: Number>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        let dest = self.consume::<i64>();
        self.copy_to_stack(a.rem_w(b), self.bp + dest);
    }

    // ---- comparisons: a 32-bit 0/1 lands at the destination --------------

    fn store_flag(&mut self, condition: bool) {
        let dest = self.consume::<i64>();
        let flag: i32 = if condition { 1 } else { 0 };
        self.copy_to_stack(flag, self.bp + dest);
    }

    fn cmp_eq<T: Scalar>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        self.store_flag(a == b);
    }

    fn cmp_neq<T: Scalar>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        self.store_flag(a != b);
    }

    fn cmp_gt<T: Scalar>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        self.store_flag(a > b);
    }

    fn cmp_ge<T: Scalar>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        self.store_flag(a >= b);
    }

    fn cmp_lt<T: Scalar>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        self.store_flag(a < b);
    }

    fn cmp_le<T: Scalar>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        self.store_flag(a <= b);
    }

    // ---- bitwise ---------------------------------------------------------

    fn bit_and<T: Bits>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        let dest = self.consume::<i64>();
        self.copy_to_stack(a.bit_and(b), self.bp + dest);
    }

    fn bit_or<T: Bits>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        let dest = self.consume::<i64>();
        self.copy_to_stack(a.bit_or(b), self.bp + dest);
    }

    fn bit_xor<T: Bits>(&mut self) {
        let a = self.read::<T>();
        let b = self.read::<T>();
        let dest = self.consume::<i64>();
        self.copy_to_stack(a.bit_xor(b), self.bp + dest);
    }

    fn shift(&mut self, right: bool) {
        let bytes = self.consume::<i32>();
        let a = self.consume::<i64>();
        let b = self.consume::<i64>();
        let dest = self.consume::<i64>();
        match bytes {
            1 => self.shift_at::<i8>(a, b, dest, right),
            2 => self.shift_at::<i16>(a, b, dest, right),
            4 => self.shift_at::<i32>(a, b, dest, right),
            8 => self.shift_at::<i64>(a, b, dest, right),
            other => panic!("bad shift width {}", other),
        }
    }

    fn shift_at<T: Bits>(&mut self, a: i64, b: i64, dest: i64, right: bool) {
        let value = self.read_stack::<T>(self.bp + a);
        let amount = self.read_stack::<i64>(self.bp + b);
        let result = if right {
            value.shr_by(amount)
        } else {
            value.shl_by(amount)
        };
        self.copy_to_stack(result, self.bp + dest);
    }

    fn not(&mut self) {
        let offset = self.consume::<i64>();
        let value = self.read_stack::<i32>(self.bp + offset);
        let flag: i32 = if value == 0 { 1 } else { 0 };
        self.copy_to_stack(flag, self.bp + offset);
    }

    fn bit_not(&mut self) {
        let bytes = self.consume::<i32>() as i64;
        let offset = self.consume::<i64>();
        for i in 0..bytes {
            let at = self.bp + offset + i;
            let b = self.read_stack::<u8>(at);
            self.copy_to_stack(!b, at);
        }
    }

    // ---- memory ----------------------------------------------------------

    fn store_const(&mut self) {
        let dest = self.read::<i64>();

        let byte = self.instructions[self.pc as usize];
        let prefix = Opcode::from_byte(byte)
            .unwrap_or_else(|| panic!("unrecognized operand byte {} at pc {}", byte, self.pc));
        self.pc += 1;

        match prefix {
            Opcode::CONSTI8 => {
                let v = self.consume::<i8>();
                self.copy_to_stack(v, dest);
            }
            Opcode::CONSTI16 => {
                let v = self.consume::<i16>();
                self.copy_to_stack(v, dest);
            }
            Opcode::CONSTI32 => {
                let v = self.consume::<i32>();
                self.copy_to_stack(v, dest);
            }
            Opcode::CONSTI64 => {
                let v = self.consume::<i64>();
                self.copy_to_stack(v, dest);
            }
            Opcode::RELCONSTI64 => {
                // Materialize a pointer-to-local as a stack offset.
                let v = self.consume::<i64>() + self.bp;
                self.copy_to_stack(v, dest);
            }
            Opcode::RELI64 => {
                // Materialize the slot's machine address.
                let v = self.consume::<i64>() + self.bp + self.stack_base_addr();
                self.copy_to_stack(v, dest);
            }
            Opcode::CONSTF32 => {
                let v = self.consume::<f32>();
                self.copy_to_stack(v, dest);
            }
            Opcode::CONSTF64 => {
                let v = self.consume::<f64>();
                self.copy_to_stack(v, dest);
            }
            other => panic!("bad STORECONST immediate {:?}", other),
        }
    }

    fn store(&mut self) {
        let to = self.read::<i64>();
        let size = self.consume::<i32>() as usize;
        let from = self.read::<i64>();

        if self.machine_addr(to) == 0 {
            let (line, col) = self.current_location();
            eprintln!("nil pointer dereference!!");
            eprintln!("at or near: {}:{}", line, col);
            self.fail(ExitCode::NilPointerStore { line, col });
            return;
        }

        self.mem_copy(to, from, size);
    }

    /// Copies between machine locations addressed as stack offsets. Offsets
    /// landing outside the stack buffer address foreign memory.
    fn mem_copy(&mut self, to: i64, from: i64, size: usize) {
        let len = self.stack_len();
        let in_stack =
            |off: i64| off >= 0 && off.checked_add(size as i64).map_or(false, |e| e <= len);

        let tmp: Vec<u8> = if in_stack(from) {
            self.stack()[from as usize..from as usize + size].to_vec()
        } else {
            let mut buf = vec![0u8; size];
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.machine_addr(from) as *const u8,
                    buf.as_mut_ptr(),
                    size,
                );
            }
            buf
        };

        if in_stack(to) {
            let to = to as usize;
            for (i, b) in tmp.iter().enumerate() {
                self.copy_to_stack(*b, (to + i) as i64);
            }
        } else {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    tmp.as_ptr(),
                    self.machine_addr(to) as *mut u8,
                    size,
                );
            }
        }
    }

    fn bump_sp(&mut self) {
        let delta = self.consume::<i32>();
        self.sp += delta as i64;
    }

    // ---- control ---------------------------------------------------------

    fn jump(&mut self) {
        let target = self.consume::<i32>();
        self.pc = target as u32;
    }

    fn jump_if(&mut self) {
        let cond = self.read::<i32>();
        let true_target = self.read::<i32>();
        let false_target = self.read::<i32>();

        self.pc = if cond == 1 {
            true_target as u32
        } else {
            false_target as u32
        };
    }

    fn call(&mut self) {
        let index = self.consume::<i32>();
        self.call_index(index as u64);
    }

    fn calli(&mut self) {
        let fn_id = self.read::<i64>();
        let entry = self
            .fn_table
            .get(fn_id as u32)
            .unwrap_or_else(|| panic!("missing function-table entry for id {}", fn_id));
        self.call_index(entry);
    }

    fn panic_op(&mut self) {
        let (line, col) = self.current_location();
        eprintln!("PANIC!");
        if let Some(stmt) = self
            .source_map
            .statement_covering((self.pc as u64).saturating_sub(1))
        {
            eprintln!(
                "{}[{}]",
                self.source_map.statement_text(stmt),
                stmt.region.start.line
            );
        }
        self.fail(ExitCode::Panicked { line, col });
    }

    fn puts(&mut self) {
        let offset = self.read::<i64>();
        let data_ptr = self.read_stack::<i64>(offset);
        let count = self.read_stack::<i64>(offset + 8) as usize;

        let base = self.stack_base_addr();
        let data_off = data_ptr - base;
        if data_off >= 0 && data_off + count as i64 <= self.stack_len() {
            let bytes = &self.stack()[data_off as usize..data_off as usize + count];
            let _ = std::io::stdout().write_all(bytes);
        } else if data_ptr != 0 {
            let bytes = unsafe { std::slice::from_raw_parts(data_ptr as *const u8, count) };
            let _ = std::io::stdout().write_all(bytes);
        }
    }

    // ---- conversion ------------------------------------------------------

    fn convert(&mut self) {
        let from_kind = self.consume_kind();
        let from = self.consume::<i64>() + self.bp;
        let to_kind = self.consume_kind();
        let to = self.consume::<i64>() + self.bp;

        match from_kind {
            TypeKind::I8 => self.convert_from::<i8>(from, to_kind, to),
            TypeKind::U8 => self.convert_from::<u8>(from, to_kind, to),
            TypeKind::I16 => self.convert_from::<i16>(from, to_kind, to),
            TypeKind::U16 => self.convert_from::<u16>(from, to_kind, to),
            TypeKind::I32 => self.convert_from::<i32>(from, to_kind, to),
            TypeKind::U32 => self.convert_from::<u32>(from, to_kind, to),
            TypeKind::I64 => self.convert_from::<i64>(from, to_kind, to),
            TypeKind::U64 => self.convert_from::<u64>(from, to_kind, to),
            TypeKind::F32 => self.convert_from::<f32>(from, to_kind, to),
            TypeKind::F64 => self.convert_from::<f64>(from, to_kind, to),
            other => panic!("cannot CONVERT from {:?}", other),
        }
    }

    fn consume_kind(&mut self) -> TypeKind {
        let tag = self.consume::<i32>();
        num::FromPrimitive::from_i32(tag)
            .unwrap_or_else(|| panic!("bad CONVERT kind tag {}", tag))
    }

    fn convert_from<T: CastScalar>(&mut self, from: i64, to_kind: TypeKind, to: i64) {
        let v = self.read_stack::<T>(from);
        match to_kind {
            TypeKind::I8 => self.copy_to_stack(v.to_i8(), to),
            TypeKind::U8 => self.copy_to_stack(v.to_u8(), to),
            TypeKind::I16 => self.copy_to_stack(v.to_i16(), to),
            TypeKind::U16 => self.copy_to_stack(v.to_u16(), to),
            TypeKind::I32 => self.copy_to_stack(v.to_i32(), to),
            TypeKind::U32 => self.copy_to_stack(v.to_u32(), to),
            TypeKind::I64 => self.copy_to_stack(v.to_i64(), to),
            TypeKind::U64 => self.copy_to_stack(v.to_u64(), to),
            TypeKind::F32 => self.copy_to_stack(v.to_f32(), to),
            TypeKind::F64 => self.copy_to_stack(v.to_f64(), to),
            other => panic!("cannot CONVERT to {:?}", other),
        }
    }
}
