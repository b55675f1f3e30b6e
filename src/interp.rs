//! The interpreter proper: a program counter, base and stack pointers, a
//! byte-addressable stack, and a dispatch loop over the instruction stream.

mod exec;

use std::collections::HashMap;
use std::fmt;

use crate::constants;
use crate::debug::Debugger;
use crate::ffi::{AbiCall, CifAbi, ExternalFn};
use crate::fn_table::FnTable;
use crate::instructions::Opcode;
use crate::scalar::Scalar;
use crate::source_map::SourceMap;
use crate::Program;

/// Why the machine stopped.
#[derive(Clone, Debug, PartialEq)]
pub enum ExitCode {
    /// `EXIT` was executed (or the stream ran out). Normal shutdown; the
    /// stack is left intact so callers can read results out of it.
    Exited,
    /// The debugger's `quit`/`terminate` command.
    Terminated,
    /// A `PANIC` instruction fired (failed union tag check).
    Panicked { line: u64, col: u64 },
    /// A `STORE` hit a nil destination pointer.
    NilPointerStore { line: u64, col: u64 },
    /// No open library exports a symbol named by a foreign call.
    MissingSymbol(String),
    /// The ABI facility rejected a foreign call's signature.
    ForeignCallFailed(String),
    /// A library named at startup could not be opened anywhere on the
    /// search path.
    MissingLibrary(String),
}

impl ExitCode {
    pub fn is_success(&self) -> bool {
        *self == ExitCode::Exited
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExitCode::Exited => write!(f, "exited"),
            ExitCode::Terminated => write!(f, "terminated"),
            ExitCode::Panicked { line, col } => write!(f, "panic at {}:{}", line, col),
            ExitCode::NilPointerStore { line, col } => {
                write!(f, "nil pointer dereference at {}:{}", line, col)
            }
            ExitCode::MissingSymbol(name) => {
                write!(f, "could not find external function {}", name)
            }
            ExitCode::ForeignCallFailed(message) => {
                write!(f, "foreign call failed: {}", message)
            }
            ExitCode::MissingLibrary(name) => write!(f, "could not open library {}", name),
        }
    }
}

pub struct Interpreter {
    pub instructions: Vec<u8>,
    pub fn_table: FnTable,
    pub source_map: SourceMap,
    pub external_fns: Vec<ExternalFn>,

    stack: Vec<u8>,
    pub pc: u32,
    pub sp: i64,
    pub bp: i64,

    /// Saved caller pcs, one per live frame; the debugger's `info` command
    /// walks these.
    pub(crate) pcs: Vec<u32>,
    pub last_valid_pc: u32,

    /// Current call depth; compared against `over_depth` for step-over and
    /// step-out.
    pub depth: u16,
    pub over_depth: i32,

    pub terminated: bool,
    pub continuing: bool,

    pub(crate) exit: Option<ExitCode>,

    pub(crate) lib_names: Vec<String>,
    pub(crate) libs: Vec<libloading::Library>,
    pub(crate) libs_opened: bool,
    pub symbols: HashMap<String, usize>,
    pub(crate) abi: Box<dyn AbiCall>,
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter::with_stack_size(constants::DEFAULT_STACK_SIZE)
    }

    pub fn with_stack_size(stack_size: i64) -> Interpreter {
        assert!(stack_size > 0 && (stack_size & (stack_size - 1)) == 0);

        Interpreter {
            instructions: Vec::new(),
            fn_table: FnTable::new(),
            source_map: SourceMap::default(),
            external_fns: Vec::new(),
            stack: vec![0; stack_size as usize],
            pc: 0,
            sp: 0,
            bp: 0,
            pcs: Vec::new(),
            last_valid_pc: 0,
            depth: 0,
            over_depth: constants::OVER_DEPTH_LIMIT,
            terminated: false,
            continuing: false,
            exit: None,
            lib_names: Vec::new(),
            libs: Vec::new(),
            libs_opened: false,
            symbols: HashMap::new(),
            abi: Box::new(CifAbi::new()),
        }
    }

    pub fn load_program(&mut self, program: Program) {
        self.instructions = program.instructions;
        self.fn_table = program.fn_table;
        self.source_map = program.source_map;
        self.external_fns = program.external_fns;
    }

    /// Names a dynamic library for foreign calls. Handles open lazily, on
    /// the first `CALLE` that needs a symbol.
    pub fn add_library<S: Into<String>>(&mut self, name: S) {
        self.lib_names.push(name.into());
    }

    /// Replaces the ABI facility; tests script foreign calls through this.
    pub fn set_abi(&mut self, abi: Box<dyn AbiCall>) {
        self.abi = abi;
    }

    /// Rewinds execution state so the same program can run again. The stack
    /// contents are deliberately left alone, matching a fresh run's zeroed
    /// prefix only where the previous run wrote nothing.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.sp = 0;
        self.bp = 0;
        self.pcs.clear();
        self.last_valid_pc = 0;
        self.depth = 0;
        self.over_depth = constants::OVER_DEPTH_LIMIT;
        self.terminated = false;
        self.continuing = false;
        self.exit = None;
    }

    /// Runs to completion without the debugger.
    pub fn run(&mut self) -> ExitCode {
        while (self.pc as usize) < self.instructions.len() && !self.terminated {
            self.step();
        }
        self.exit.take().unwrap_or(ExitCode::Exited)
    }

    /// Runs with the debugger's stop check before every dispatch.
    pub fn run_debug(&mut self, debugger: &mut Debugger) -> ExitCode {
        while (self.pc as usize) < self.instructions.len() && !self.terminated {
            debugger.check(self);
            if !self.terminated {
                self.step();
            }
        }
        self.exit.take().unwrap_or(ExitCode::Exited)
    }

    /// Fetch, decode, dispatch one instruction.
    pub fn step(&mut self) {
        let byte = self.instructions[self.pc as usize];
        let op = Opcode::from_byte(byte)
            .unwrap_or_else(|| panic!("unrecognized opcode byte {} at pc {}", byte, self.pc));
        self.pc += 1;
        self.exec(op);
    }

    pub(crate) fn fail(&mut self, code: ExitCode) {
        self.exit = Some(code);
        self.terminated = true;
    }

    /// Source line/column of the statement containing the current pc, for
    /// runtime failure reports.
    pub fn current_location(&self) -> (u64, u64) {
        let pc = (self.pc as u64).saturating_sub(1);
        match self
            .source_map
            .statement_covering(pc)
            .or_else(|| self.source_map.statement_starting_at(pc))
        {
            Some(stmt) => (stmt.region.start.line, stmt.region.start.col),
            None => (0, 0),
        }
    }

    // ---- stack access ----------------------------------------------------

    pub fn stack(&self) -> &[u8] {
        &self.stack[..]
    }

    pub fn stack_len(&self) -> i64 {
        self.stack.len() as i64
    }

    /// The stack buffer's machine address. Pointer values stored on the
    /// stack are real machine addresses so they survive a trip through
    /// foreign code; this is the base they are formed against.
    pub fn stack_base_addr(&self) -> i64 {
        self.stack.as_ptr() as i64
    }

    /// Machine address of the byte at stack offset `offset`.
    pub fn machine_addr(&self, offset: i64) -> i64 {
        self.stack_base_addr() + offset
    }

    pub(crate) fn stack_ptr_mut(&mut self, offset: i64) -> *mut std::os::raw::c_void {
        debug_assert!(offset >= 0 && offset <= self.stack.len() as i64);
        unsafe { self.stack.as_mut_ptr().offset(offset as isize) as *mut _ }
    }

    pub fn read_stack<T: Scalar>(&self, offset: i64) -> T {
        let offset = offset as usize;
        T::from_le(&self.stack[offset..offset + T::SIZE])
    }

    pub fn copy_to_stack<T: Scalar>(&mut self, value: T, offset: i64) {
        let offset = offset as usize;
        value.write_le(&mut self.stack[offset..offset + T::SIZE]);
    }

    pub(crate) fn push<T: Scalar>(&mut self, value: T) {
        self.copy_to_stack(value, self.sp);
        self.sp += T::SIZE as i64;
    }

    /// Reads a scalar through a machine address: inside the stack it reads
    /// the buffer, elsewhere (foreign memory) it dereferences. A null
    /// address reads as `None`.
    pub fn read_mem<T: Scalar>(&self, addr: i64) -> Option<T> {
        if addr == 0 {
            return None;
        }
        let offset = addr - self.stack_base_addr();
        if offset >= 0 && offset + T::SIZE as i64 <= self.stack.len() as i64 {
            return Some(self.read_stack(offset));
        }
        let mut bytes = [0u8; 8];
        unsafe {
            std::ptr::copy_nonoverlapping(addr as *const u8, bytes.as_mut_ptr(), T::SIZE);
        }
        Some(T::from_le(&bytes[..T::SIZE]))
    }

    // ---- instruction stream access ---------------------------------------

    /// Reads a value of width `T` at the pc and advances past it.
    pub fn consume<T: Scalar>(&mut self) -> T {
        let at = self.pc as usize;
        let value = T::from_le(&self.instructions[at..at + T::SIZE]);
        self.pc += T::SIZE as u32;
        value
    }

    /// The polymorphic operand read: dispatches on the operand prefix at the
    /// pc. `CONST*` yields the immediate, `RELCONST*` yields `bp + offset`,
    /// `REL*` (and bare markers) load a scalar from `bp + offset`; the bare
    /// `I64` marker loads a machine pointer from the slot and rebases it to
    /// a stack offset.
    pub fn read<T: Scalar>(&mut self) -> T {
        let byte = self.instructions[self.pc as usize];
        let prefix = Opcode::from_byte(byte)
            .unwrap_or_else(|| panic!("unrecognized operand byte {} at pc {}", byte, self.pc));

        if prefix.is_relconst() {
            self.pc += 1;
            let offset = self.consume::<i64>();
            return T::from_i64(offset.wrapping_add(self.bp));
        }

        if prefix.is_rel() {
            self.pc += 1;
            let offset = self.consume::<i64>();
            return self.read_stack::<T>(offset + self.bp);
        }

        if prefix.is_const() {
            self.pc += 1;
            return self.consume::<T>();
        }

        if prefix == Opcode::I64 {
            // The slot holds a machine pointer; turn it back into a stack
            // offset so STORE and friends can address through it.
            self.pc += 1;
            let offset = self.consume::<i64>();
            let loaded = self.read_stack::<i64>(offset + self.bp);
            return T::from_i64(loaded.wrapping_sub(self.stack_base_addr()));
        }

        if prefix.is_marker() {
            self.pc += 1;
            let offset = self.consume::<i64>();
            return self.read_stack::<T>(offset + self.bp);
        }

        panic!("opcode {:?} is not an operand prefix", prefix);
    }

    // ---- calls -----------------------------------------------------------

    /// The call prologue shared by `CALL` and `CALLI`: save the caller's
    /// base pointer and resume pc, then enter the callee's frame.
    pub(crate) fn call_index(&mut self, index: u64) {
        self.depth += 1;
        self.pcs.push(self.last_valid_pc);

        let bp = self.bp as i32;
        self.push::<i32>(bp);
        let pc = self.pc;
        self.push::<u32>(pc);
        self.bp = self.sp;

        self.pc = index as u32;
    }

    pub(crate) fn ret(&mut self) {
        self.sp = self.bp - constants::SAVED_REGS_BYTES;
        self.pc = self.read_stack::<u32>(self.bp - 4);
        self.bp = self.read_stack::<i32>(self.bp - 8) as i64;

        self.depth = self.depth.saturating_sub(1);
        self.pcs.pop();
    }

    /// The saved caller pc `back` frames below the current one; the
    /// debugger's `info` command walks frames through this.
    pub fn frame_pc(&self, back: usize) -> u32 {
        self.pcs[self.pcs.len() - 1 - back]
    }

    /// Dumps the first 64 stack bytes to stderr. Debugging aid only.
    pub fn dump_stack(&self) {
        let shown: Vec<String> = self.stack[..64].iter().map(|b| b.to_string()).collect();
        eprintln!("INTERP STACK:\n{}", shown.join(", "));
    }
}

impl Default for Interpreter {
    fn default() -> Interpreter {
        Interpreter::new()
    }
}
