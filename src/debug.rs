//! The interactive debugger: a line-oriented command protocol layered over
//! the interpreter. One command per input line, one response per command;
//! control commands answer with an empty line and resume execution.
//!
//! The stop check runs before every dispatch while debugging: the machine
//! stops when the pc begins a mapped statement (unless `continue` is in
//! effect or a step-over watermark says to skip this depth), or when a
//! breakpoint at the pc fires. Conditional breakpoint predicates and the
//! `eval` command re-enter the compiler through the [`ExprEvaluator`] seam.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use oast::{Arena, NodeId, NodeKind, ScopeId, TypeKind};

use crate::constants;
use crate::disasm::MnemonicPrinter;
use crate::instructions::Opcode;
use crate::interp::{ExitCode, Interpreter};
use crate::source_map::SourceMapStatement;

#[derive(Clone, Debug, PartialEq)]
pub struct Breakpoint {
    pub inst_index: u64,
    pub conditional: bool,
    pub condition: String,
}

/// Compiles an expression in the scope of the stopped statement and
/// evaluates it in a nested VM run, yielding the scalar result. Implemented
/// by the compiler crate; the VM only knows the contract.
pub trait ExprEvaluator {
    fn evaluate(
        &mut self,
        interp: &Interpreter,
        stmt: &SourceMapStatement,
        expr: &str,
    ) -> Result<i64, String>;
}

pub struct Debugger<'a> {
    input: Box<dyn BufRead + 'a>,
    output: Box<dyn Write + 'a>,
    arena: Option<&'a Arena>,
    evaluator: Option<Box<dyn ExprEvaluator + 'a>>,

    pub breakpoints: Vec<Breakpoint>,
    pub break_commands: Vec<String>,
    pub stopped_on: Option<SourceMapStatement>,

    next_var_reference: u32,
    pointer_recursion: HashMap<i64, String>,
}

impl<'a> Debugger<'a> {
    pub fn new(input: Box<dyn BufRead + 'a>, output: Box<dyn Write + 'a>) -> Debugger<'a> {
        Debugger {
            input,
            output,
            arena: None,
            evaluator: None,
            breakpoints: Vec::new(),
            break_commands: Vec::new(),
            stopped_on: None,
            next_var_reference: 1,
            pointer_recursion: HashMap::new(),
        }
    }

    /// Attach the AST arena; `info` and `vars` decode locals through it.
    pub fn with_arena(mut self, arena: &'a Arena) -> Debugger<'a> {
        self.arena = Some(arena);
        self
    }

    /// Attach the compiler's expression evaluator for `eval` and
    /// conditional breakpoints.
    pub fn with_evaluator(mut self, evaluator: Box<dyn ExprEvaluator + 'a>) -> Debugger<'a> {
        self.evaluator = Some(evaluator);
        self
    }

    /// The per-instruction stop check and, when stopped, the command loop.
    pub fn check(&mut self, interp: &mut Interpreter) {
        let pc = interp.pc as u64;

        let mut stmt_stop = false;
        if let Some(stmt) = interp.source_map.statement_starting_at(pc) {
            self.stopped_on = Some(stmt.clone());
            stmt_stop = true;
        }

        let mut break_stop = false;
        let hit = self
            .breakpoints
            .iter()
            .find(|b| b.inst_index == pc)
            .cloned();
        if let Some(bp) = hit {
            break_stop = true;
            if bp.conditional {
                let value = self.eval_expr(interp, &bp.condition).unwrap_or(0);
                if value == 0 {
                    break_stop = false;
                }
            }
        }

        let mut should_stop = (stmt_stop && !interp.continuing) || break_stop;

        while should_stop && !interp.terminated && (interp.depth as i32) < interp.over_depth {
            interp.continuing = false;
            interp.over_depth = constants::OVER_DEPTH_LIMIT;
            interp.last_valid_pc = interp.pc;

            loop {
                let line = match self.read_line() {
                    Some(line) => line,
                    None => {
                        // input closed: treat like `terminate`
                        interp.fail(ExitCode::Terminated);
                        break;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                if self.command(interp, line, &mut should_stop) {
                    break;
                }
            }
        }
    }

    /// Handles one command line; returns true when the command resumes
    /// execution (or terminates) and the command loop should end.
    fn command(&mut self, interp: &mut Interpreter, line: &str, should_stop: &mut bool) -> bool {
        if line == "stack" {
            let dump = Debugger::dump_bytes(interp, 0, interp.sp);
            self.send(&dump);
        } else if line == "frame" {
            let dump = Debugger::dump_bytes(interp, interp.bp, interp.sp);
            self.send(&dump);
        } else if line.starts_with("break ") {
            self.break_commands.push(line.to_string());
            self.add_breakpoint_for_command(interp, line);
            self.send("");
        } else if line == "breakRemoveAll" {
            self.breakpoints.clear();
            self.break_commands.clear();
        } else if line == "location" {
            let text = match interp.source_map.statement_starting_at(interp.pc as u64) {
                Some(stmt) => format!("{}\n{}", stmt.region.start.line, stmt.region.start.col),
                None => String::new(),
            };
            self.send(&text);
        } else if line == "info" {
            let text = self.info(interp);
            self.send(&text);
        } else if line.starts_with("eval ") {
            let expr = line[5..].to_string();
            let text = match self.eval_expr(interp, &expr) {
                Ok(answer) => format!("answer: {}", answer),
                Err(message) => format!("error: {}", message),
            };
            self.send(&text);
        } else if line == "stmt" {
            let text = match self.stopped_on.as_ref() {
                Some(stmt) => interp.source_map.statement_text(stmt).to_string(),
                None => String::new(),
            };
            self.send(&text);
        } else if line == "asm" {
            let first = interp.pc as u64;
            let last = interp
                .source_map
                .statement_starting_at(first)
                .map(|s| s.inst_end_index)
                .unwrap_or(first);
            let text = MnemonicPrinter::new(&interp.instructions)
                .with_fn_table(&interp.fn_table)
                .debug_string_range(first, last);
            self.send(&text);
        } else if line == "vars" {
            let text = self.vars_at(interp, interp.bp, interp.pc as u64);
            self.send(&text);
        } else if line == "step" {
            *should_stop = false;
            self.send("");
            return true;
        } else if line == "over" {
            let at = interp.instructions.get(interp.pc as usize).cloned();
            if let Some(op) = at.and_then(Opcode::from_byte) {
                if op == Opcode::CALL || op == Opcode::CALLI {
                    interp.over_depth = interp.depth as i32 + 1;
                }
            }
            *should_stop = false;
            self.send("");
            return true;
        } else if line == "out" {
            // prevent accidentally stepping out of the main fn
            if interp.depth > 0 {
                interp.over_depth = interp.depth as i32;
            }
            *should_stop = false;
            self.send("");
            return true;
        } else if line == "continue" {
            *should_stop = false;
            interp.continuing = true;
            self.send("");
            return true;
        } else if line == "terminate" || line == "q" || line == "quit" {
            interp.fail(ExitCode::Terminated);
            self.send("");
            return true;
        } else {
            self.send("unrecognized command");
        }

        false
    }

    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }

    fn send(&mut self, text: &str) {
        let _ = writeln!(self.output, "{}", text);
        let _ = self.output.flush();
    }

    fn dump_bytes(interp: &Interpreter, from: i64, to: i64) -> String {
        let shown: Vec<String> = interp.stack()[from as usize..to as usize]
            .iter()
            .map(|b| (*b as i32).to_string())
            .collect();
        format!("[{}]", shown.join(", "))
    }

    /// `break <line> <file> [<expr>]`: a breakpoint on the first statement
    /// of every instruction range mapped to that file and line, with
    /// everything after the file name as the predicate.
    fn add_breakpoint_for_command(&mut self, interp: &Interpreter, command: &str) {
        let mut parts = command.split_whitespace();
        let _ = parts.next(); // "break"
        let line: u64 = match parts.next().and_then(|t| t.parse().ok()) {
            Some(line) => line,
            None => return,
        };
        let file = match parts.next() {
            Some(file) => file.to_string(),
            None => return,
        };
        let condition = parts.collect::<Vec<&str>>().join(" ");

        let file_matches = match &interp.source_map.source_info.file_name {
            Some(name) => *name == file,
            None => false,
        };
        if !file_matches {
            return;
        }

        for stmt in &interp.source_map.statements {
            if stmt.region.start.line == line {
                self.breakpoints.push(Breakpoint {
                    inst_index: stmt.inst_index,
                    conditional: !condition.is_empty(),
                    condition: condition.clone(),
                });
            }
        }
    }

    fn eval_expr(&mut self, interp: &Interpreter, expr: &str) -> Result<i64, String> {
        let stmt = self
            .stopped_on
            .clone()
            .ok_or_else(|| "not stopped on a statement".to_string())?;
        match self.evaluator.as_mut() {
            Some(evaluator) => evaluator.evaluate(interp, &stmt, expr),
            None => Err("no expression evaluator attached".to_string()),
        }
    }

    // ---- frame and variable inspection -----------------------------------

    /// The `info` dump: depth, then per frame the location and locals,
    /// walking caller frames through the saved base pointers and the pc
    /// history. The pointer-reference map resets here and nowhere else
    /// within the dump, so references stay stable across frames.
    fn info(&mut self, interp: &Interpreter) -> String {
        self.next_var_reference = 1;
        self.pointer_recursion.clear();

        let mut out = String::new();
        out.push_str(&format!("{}\n", interp.depth + 1));

        let mut bp = interp.bp;
        let mut pc = interp.pc as u64;

        for i in 0..=interp.depth {
            if let Some(stmt) = interp.source_map.statement_starting_at(pc) {
                if let Some(name) = &interp.source_map.source_info.file_name {
                    out.push_str(&format!(
                        "{}\n{}\n{}\n",
                        name, stmt.region.start.line, stmt.region.start.col
                    ));
                }
            }

            out.push_str(&self.vars_at(interp, bp, pc));

            if i < interp.depth {
                let caller_bp = interp.read_stack::<i32>(bp - 8) as i64;
                pc = interp.frame_pc(i as usize) as u64;
                bp = caller_bp;
                out.push_str("---\n");
            }
        }

        out
    }

    fn vars_at(&mut self, interp: &Interpreter, bp: i64, pc: u64) -> String {
        let arena = match self.arena {
            Some(arena) => arena,
            None => return String::new(),
        };

        let stmt = match interp.source_map.statement_starting_at(pc) {
            Some(stmt) => stmt.clone(),
            None => return String::new(),
        };
        if stmt.node.is_null() {
            return String::new();
        }

        // A statement mapped to the fn declaration itself reports the
        // body's scope.
        let mut node_id = stmt.node;
        if let NodeKind::FnDecl { body, .. } = &arena.node(node_id).kind {
            match body.first() {
                Some(&first) => node_id = first,
                None => return String::new(),
            }
        }

        let mut out = String::new();
        self.print_scope_vars(interp, arena, arena.node(node_id).scope, bp, &mut out, false);
        out
    }

    fn print_scope_vars(
        &mut self,
        interp: &Interpreter,
        arena: &'a Arena,
        scope_id: ScopeId,
        bp: i64,
        out: &mut String,
        is_last: bool,
    ) {
        if scope_id.is_null() {
            return;
        }
        let scope = arena.scope(scope_id);

        for (name, node_id) in &scope.symbols {
            let node = arena.node(*node_id);
            if node.is_local {
                out.push_str(&format!("{}: ", name));
                let ty = arena.resolve(node.type_info);
                self.print_var_lines(interp, arena, ty, bp + node.local_offset, out);
            }
        }

        if scope.is_function_scope {
            for &param in &scope.fn_params {
                let name = arena.param_name(param).to_string();
                out.push_str(&format!("{}: ", name));
                let node = arena.node(param);
                let ty = arena.resolve(arena.param_type(param));
                self.print_var_lines(interp, arena, ty, bp + node.local_offset, out);
            }

            if !scope.fn_return_type.is_null() {
                out.push_str("*RETURN*: ");
                let ty = arena.resolve(scope.fn_return_type);
                self.print_var_lines(interp, arena, ty, bp, out);
            }
        }

        if !is_last && !scope.parent.is_null() {
            self.print_scope_vars(
                interp,
                arena,
                scope.parent,
                bp,
                out,
                scope.is_function_scope,
            );
        }
    }

    fn print_var_lines(
        &mut self,
        interp: &Interpreter,
        arena: &'a Arena,
        ty: NodeId,
        offset: i64,
        out: &mut String,
    ) {
        if ty.is_null() {
            out.push_str("<<cannot resolve type>>\n");
            return;
        }

        let mut extra = Vec::new();
        let addr = interp.machine_addr(offset);
        self.print_value(interp, arena, ty, addr, out, &mut extra);
        out.push('\n');
        for line in extra {
            out.push_str(&line);
            out.push('\n');
        }
    }

    /// Pretty-prints the value of type `ty` living at machine address
    /// `addr`. Aggregates and pointers print as `#N` references with the
    /// expansion on an extra line; a pointer target already seen in this
    /// dump re-prints its reference instead of descending.
    fn print_value(
        &mut self,
        interp: &Interpreter,
        arena: &'a Arena,
        ty: NodeId,
        addr: i64,
        out: &mut String,
        extra: &mut Vec<String>,
    ) {
        let ty = arena.resolve(ty);
        let data = arena.type_data(ty).clone();

        match data.kind() {
            TypeKind::None => out.push_str("{}"),
            TypeKind::I8 => self.print_scalar::<i8>(interp, addr, out),
            TypeKind::U8 => self.print_scalar::<u8>(interp, addr, out),
            TypeKind::I16 => self.print_scalar::<i16>(interp, addr, out),
            TypeKind::U16 => self.print_scalar::<u16>(interp, addr, out),
            TypeKind::I32 => self.print_scalar::<i32>(interp, addr, out),
            TypeKind::U32 => self.print_scalar::<u32>(interp, addr, out),
            TypeKind::I64 => self.print_scalar::<i64>(interp, addr, out),
            TypeKind::U64 => self.print_scalar::<u64>(interp, addr, out),
            TypeKind::F32 => self.print_scalar::<f32>(interp, addr, out),
            TypeKind::F64 => self.print_scalar::<f64>(interp, addr, out),
            TypeKind::Boolean => match interp.read_mem::<i32>(addr) {
                Some(v) => out.push_str(if v == 1 { "true" } else { "false" }),
                None => out.push_str("ERROR: could not read"),
            },
            TypeKind::Fn => match interp.read_mem::<i32>(addr) {
                Some(v) => out.push_str(&format!("fn {}", v)),
                None => out.push_str("<<invalid fn ptr>>"),
            },
            TypeKind::Enum => self.print_enum(interp, arena, &data, addr, out, extra),
            TypeKind::Pointer => self.print_pointer(interp, arena, &data, addr, out, extra),
            TypeKind::Struct => {
                if data.secretly_union {
                    self.print_union(interp, arena, &data, addr, out, extra)
                } else if data.secretly_array {
                    self.print_array(interp, arena, &data, addr, out, extra)
                } else {
                    self.print_struct(interp, arena, ty, &data, addr, out, extra)
                }
            }
        }
    }

    fn print_scalar<T: crate::scalar::Scalar + ToString>(
        &mut self,
        interp: &Interpreter,
        addr: i64,
        out: &mut String,
    ) {
        match interp.read_mem::<T>(addr) {
            Some(v) => out.push_str(&v.to_string()),
            None => out.push_str("ERROR: could not read"),
        }
    }

    fn next_reference(&mut self) -> u32 {
        let nvr = self.next_var_reference;
        self.next_var_reference += 1;
        nvr
    }

    fn print_enum(
        &mut self,
        interp: &Interpreter,
        arena: &'a Arena,
        data: &oast::TypeData,
        addr: i64,
        out: &mut String,
        extra: &mut Vec<String>,
    ) {
        let base = arena.resolve(data.inner);
        let base_kind = arena.type_data(base).kind();

        let value = match base_kind {
            TypeKind::I8 => interp.read_mem::<i8>(addr).map(i64::from),
            TypeKind::I16 => interp.read_mem::<i16>(addr).map(i64::from),
            TypeKind::I32 => interp.read_mem::<i32>(addr).map(i64::from),
            TypeKind::I64 => interp.read_mem::<i64>(addr),
            _ => None,
        };

        match value {
            None => out.push_str("<<INVALID>>"),
            Some(value) => {
                if value >= data.params.len() as i64 {
                    out.push_str("<<INVALID>>");
                } else if value <= 0 {
                    out.push_str("<<NONAME>>");
                } else {
                    out.push_str(arena.param_name(data.params[(value - 1) as usize]));
                }
            }
        }

        out.push_str(" (");
        self.print_value(interp, arena, base, addr, out, extra);
        out.push(')');
    }

    fn print_pointer(
        &mut self,
        interp: &Interpreter,
        arena: &'a Arena,
        data: &oast::TypeData,
        addr: i64,
        out: &mut String,
        extra: &mut Vec<String>,
    ) {
        let loaded = interp.read_mem::<i64>(addr);

        if let Some(target) = loaded {
            if let Some(reference) = self.pointer_recursion.get(&target) {
                out.push_str(reference);
                return;
            }
        }

        let nvr = self.next_reference();
        if let Some(target) = loaded {
            self.pointer_recursion.insert(target, format!("#{}", nvr));
        }

        out.push_str(&format!("#{}", nvr));

        let mut line = format!("#{}: *(0x{:x})", nvr, loaded.unwrap_or(0));
        match loaded {
            None => line.push_str("<<invalid ptr>>"),
            Some(0) => line.push_str("nil"),
            Some(target) => {
                self.print_value(interp, arena, data.inner, target, &mut line, extra);
            }
        }
        extra.push(line);
    }

    fn print_union(
        &mut self,
        interp: &Interpreter,
        arena: &'a Arena,
        data: &oast::TypeData,
        addr: i64,
        out: &mut String,
        extra: &mut Vec<String>,
    ) {
        let nvr = self.next_reference();
        out.push_str(&format!("#{}", nvr));

        let tag = interp.read_mem::<i64>(addr).unwrap_or(0);

        let mut line = format!("#{}: {{", nvr);
        if tag > 0 {
            line.push_str(&format!("tag:{}", tag));
        }
        if tag >= 0 && (tag as usize) < data.params.len() {
            let param = data.params[tag as usize];
            line.push(' ');
            line.push_str(arena.param_name(param));
            line.push(':');
            let ty = arena.resolve(arena.param_type(param));
            self.print_value(interp, arena, ty, addr + 8, &mut line, extra);
        }
        line.push('}');
        extra.push(line);
    }

    fn print_array(
        &mut self,
        interp: &Interpreter,
        arena: &'a Arena,
        data: &oast::TypeData,
        addr: i64,
        out: &mut String,
        extra: &mut Vec<String>,
    ) {
        let element = arena.resolve(data.inner);
        let element_kind = arena.type_data(element).kind();
        let element_size = oast::type_size(arena, element);

        let data_ptr = interp.read_mem::<i64>(addr).unwrap_or(0);
        let size = interp.read_mem::<i64>(addr + 8).unwrap_or(0);
        let shown = size.min(constants::ARRAY_PRINT_LIMIT);

        if element_kind == TypeKind::I8 {
            out.push('"');
            for i in 0..shown {
                match interp.read_mem::<u8>(data_ptr + i) {
                    Some(b'\n') => out.push_str("\\n"),
                    Some(b) => out.push(b as char),
                    None => out.push('?'),
                }
            }
            if shown < size {
                out.push_str("...(truncated)");
            }
            out.push('"');
            return;
        }

        let nvr = self.next_reference();
        out.push_str(&format!("#{}", nvr));

        let mut line = format!("#{}: [", nvr);
        let mut element_addr = data_ptr;
        for i in 0..shown {
            line.push_str(&format!("{}:", i));
            self.print_value(interp, arena, element, element_addr, &mut line, extra);
            element_addr += element_size;
            if i < shown - 1 {
                line.push(' ');
            }
        }
        if shown < size {
            line.push_str("...(truncated)");
        }
        line.push(']');
        extra.push(line);
    }

    fn print_struct(
        &mut self,
        interp: &Interpreter,
        arena: &'a Arena,
        ty: NodeId,
        data: &oast::TypeData,
        addr: i64,
        out: &mut String,
        extra: &mut Vec<String>,
    ) {
        let nvr = self.next_reference();
        out.push_str(&format!("#{}", nvr));

        let mut line = format!("#{}: {{", nvr);
        for (i, &param) in data.params.iter().enumerate() {
            line.push_str(arena.param_name(param));
            line.push(':');

            let field_ty = arena.resolve(arena.param_type(param));
            let offset = oast::field_offset(arena, ty, i);
            self.print_value(interp, arena, field_ty, addr + offset, &mut line, extra);

            if i + 1 < data.params.len() {
                line.push(' ');
            }
        }
        line.push('}');
        extra.push(line);
    }
}
