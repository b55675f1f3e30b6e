//! The bytecode emitter: recursive emission over the typed AST, producing
//! the instruction stream, the function table, the source map and the
//! external-function descriptors.
//!
//! Frame layout is settled in a pre-pass before a function's body is
//! emitted: offset 0 holds the return value, every declaration and every
//! value-producing expression gets an 8-aligned slot after it, and
//! parameters sit at negative offsets just below the saved registers, first
//! parameter nearest them. Call sites stage arguments at the frame top,
//! bump the stack pointer over them, and copy the return value down from
//! one word past the callee's saved registers after it returns.

use std::collections::{HashMap, HashSet, VecDeque};

use oast::{
    field_offset, type_size, Arena, BinopKind, NodeId, NodeKind, SrcInfo, TypeKind,
};
use opalvm::ffi::{abi_type, AbiParam};
use opalvm::{
    ExternalFn, FnTable, InstructionWriter, Opcode, Program, SourceMap, SourceMapStatement,
};

/// Deferred patch for a call to a function that had not been emitted when
/// the call site was.
#[derive(Clone, Copy, Debug)]
struct Fixup {
    inst_offset: u64,
    node: NodeId,
}

/// How an expression reaches an operand position.
enum Src {
    ConstInt(i64),
    ConstFloat(f64),
    Slot(i64),
}

pub struct Gen<'a> {
    arena: &'a mut Arena,

    instructions: Vec<u8>,
    fn_table: FnTable,
    source_map: SourceMap,
    external_fns: Vec<ExternalFn>,

    fixups: Vec<Fixup>,
    fn_ids: HashMap<NodeId, u32>,
    fn_entries: HashMap<NodeId, u64>,
    to_process: VecDeque<NodeId>,
    processed: HashSet<NodeId>,
    next_fn_id: u32,

    frame_size: i64,
    is_main_fn: bool,
}

fn align8(offset: i64) -> i64 {
    (offset + 7) & !7
}

impl<'a> Gen<'a> {
    pub fn new(arena: &'a mut Arena, src: SrcInfo) -> Gen<'a> {
        Gen {
            arena,
            instructions: Vec::new(),
            fn_table: FnTable::new(),
            source_map: SourceMap::new(src),
            external_fns: Vec::new(),
            fixups: Vec::new(),
            fn_ids: HashMap::new(),
            fn_entries: HashMap::new(),
            to_process: VecDeque::new(),
            processed: HashSet::new(),
            next_fn_id: 1,
            frame_size: 0,
            is_main_fn: false,
        }
    }

    /// Emits `main`, then every function it transitively calls, then
    /// resolves the forward references.
    pub fn gen_main(&mut self, main: NodeId) {
        self.gen_fn(main, true);
        while let Some(next) = self.to_process.pop_front() {
            if !self.processed.contains(&next) {
                self.gen_fn(next, false);
            }
        }
        self.fixup();
    }

    pub fn finish(self) -> Program {
        assert!(self.fixups.is_empty(), "unresolved fixups survive emission");
        Program {
            instructions: self.instructions,
            fn_table: self.fn_table,
            source_map: self.source_map,
            external_fns: self.external_fns,
        }
    }

    pub fn fn_id(&mut self, fn_decl: NodeId) -> u32 {
        if let Some(&id) = self.fn_ids.get(&fn_decl) {
            return id;
        }
        let id = self.next_fn_id;
        self.next_fn_id += 1;
        self.fn_ids.insert(fn_decl, id);
        id
    }

    // ---- type helpers ----------------------------------------------------

    fn type_of(&self, node: NodeId) -> NodeId {
        let resolved = self.arena.resolve(node);
        self.arena.resolve(self.arena.node(resolved).type_info)
    }

    fn kind_of(&self, node: NodeId) -> TypeKind {
        let ty = self.type_of(node);
        if ty.is_null() {
            return TypeKind::None;
        }
        self.arena.type_data(ty).kind()
    }

    fn size_of(&self, node: NodeId) -> i64 {
        let ty = self.type_of(node);
        if ty.is_null() {
            0
        } else {
            type_size(self.arena, ty)
        }
    }

    /// The frame slot of an already-laid-out value node.
    fn slot_of(&self, node: NodeId) -> i64 {
        self.arena.node(self.arena.resolve(node)).local_offset
    }

    // ---- frame layout ----------------------------------------------------

    fn layout_fn(&mut self, fn_decl: NodeId) -> i64 {
        let (params, return_type, body) = match self.arena.node(fn_decl).kind.clone() {
            NodeKind::FnDecl {
                params,
                return_type,
                body,
                ..
            } => (params, return_type, body),
            other => panic!("cannot emit {:?} as a function", other),
        };

        // Parameter slots mirror the call site's staging exactly: word
        // aligned, first parameter nearest the saved registers.
        let mut running = -8;
        for param in params {
            let size = arg_slot_size(type_size(self.arena, self.arena.param_type(param)));
            running -= size;
            self.arena.node_mut(param).local_offset = running;
        }

        let ret_size = if return_type.is_null() {
            0
        } else {
            type_size(self.arena, self.arena.resolve(return_type))
        };
        let mut size = align8(ret_size);
        for stmt in body {
            self.layout_node(stmt, &mut size);
        }
        size
    }

    fn alloc_slot(&mut self, node: NodeId, size: &mut i64, bytes: i64) {
        let node = self.arena.node_mut(node);
        node.local_offset = *size;
        node.is_bytecode_local = true;
        *size += align8(bytes);
    }

    fn layout_node(&mut self, node: NodeId, size: &mut i64) {
        match self.arena.node(node).kind.clone() {
            NodeKind::Decl { init, .. } => {
                // Declarations in operand position are references to a slot
                // the statement walk already assigned.
                if self.arena.node(node).is_local {
                    return;
                }
                if !init.is_null() {
                    self.layout_node(init, size);
                }
                let bytes = self.size_of(node);
                self.alloc_slot(node, size, bytes);
                self.arena.node_mut(node).is_local = true;
            }
            NodeKind::Binop { op, lhs, rhs } => {
                self.layout_node(lhs, size);
                self.layout_node(rhs, size);

                // Shifts address their operands through frame slots, so
                // literal operands get staged into temporaries.
                if op == BinopKind::Shl || op == BinopKind::Shr {
                    if self.is_literal(lhs) {
                        let bytes = self.size_of(lhs);
                        self.alloc_slot(lhs, size, bytes);
                    }
                    if self.is_literal(rhs) {
                        // shift amounts are read at full width
                        self.alloc_slot(rhs, size, 8);
                    }
                }

                let bytes = if op.is_comparison() { 4 } else { self.size_of(node) };
                self.alloc_slot(node, size, bytes.max(4));
            }
            NodeKind::FnCall { func, args } => {
                for arg in args {
                    self.layout_node(arg, size);
                }
                let resolved = self.arena.resolve(func);
                if !self.is_fn_decl(resolved) {
                    self.layout_node(func, size);
                }
                let bytes = self.size_of(node);
                self.alloc_slot(node, size, bytes.max(8));
            }
            NodeKind::Cast { value, .. } => {
                self.layout_node(value, size);
                if self.is_literal(value) {
                    let bytes = self.size_of(value);
                    self.alloc_slot(value, size, bytes);
                }
                let bytes = self.size_of(node);
                self.alloc_slot(node, size, bytes);
            }
            NodeKind::Dot { target, .. } => {
                self.layout_node(target, size);
                let bytes = self.size_of(node);
                self.alloc_slot(node, size, bytes.max(4));
            }
            NodeKind::Assign { lhs, rhs } => {
                self.layout_node(lhs, size);
                self.layout_node(rhs, size);
            }
            NodeKind::If {
                cond,
                then_stmts,
                else_stmts,
            } => {
                self.layout_node(cond, size);
                for stmt in then_stmts {
                    self.layout_node(stmt, size);
                }
                for stmt in else_stmts {
                    self.layout_node(stmt, size);
                }
            }
            NodeKind::While { cond, body } => {
                self.layout_node(cond, size);
                for stmt in body {
                    self.layout_node(stmt, size);
                }
            }
            NodeKind::Ret(value) => {
                if !value.is_null() {
                    self.layout_node(value, size);
                }
            }
            NodeKind::Puts(value) => self.layout_node(value, size),
            _ => {}
        }
    }

    fn is_literal(&self, node: NodeId) -> bool {
        match self.arena.node(node).kind {
            NodeKind::IntLiteral(_) | NodeKind::FloatLiteral(_) | NodeKind::BoolLiteral(_) => true,
            _ => false,
        }
    }

    fn is_fn_decl(&self, node: NodeId) -> bool {
        match self.arena.node(node).kind {
            NodeKind::FnDecl { .. } => true,
            _ => false,
        }
    }

    // ---- function emission -----------------------------------------------

    fn gen_fn(&mut self, fn_decl: NodeId, is_main: bool) {
        self.processed.insert(fn_decl);

        let id = self.fn_id(fn_decl);
        let entry = self.instructions.len() as u64;
        self.fn_table.insert(id, entry);
        self.fn_entries.insert(fn_decl, entry);

        let frame_size = self.layout_fn(fn_decl);
        self.frame_size = frame_size;
        self.is_main_fn = is_main;

        let body = match &self.arena.node(fn_decl).kind {
            NodeKind::FnDecl { body, .. } => body.clone(),
            _ => unreachable!(),
        };

        {
            let mut w = InstructionWriter::new(&mut self.instructions);
            w.op(Opcode::BUMPSP).raw_i32(frame_size as i32);
        }

        let mut ends_with_ret = false;
        for stmt in &body {
            self.gen_stmt(*stmt);
            ends_with_ret = match self.arena.node(*stmt).kind {
                NodeKind::Ret(_) => true,
                _ => false,
            };
        }

        if !ends_with_ret {
            let mut w = InstructionWriter::new(&mut self.instructions);
            w.op(if is_main { Opcode::EXIT } else { Opcode::RET });
        }
    }

    fn push_statement(&mut self, node: NodeId, start: u64) {
        let end = self.instructions.len() as u64;
        if end == start {
            return;
        }
        self.source_map.push_statement(SourceMapStatement {
            inst_index: start,
            inst_end_index: end,
            region: self.arena.node(node).region,
            node,
        });
    }

    fn gen_stmt(&mut self, node: NodeId) {
        let start = self.instructions.len() as u64;

        match self.arena.node(node).kind.clone() {
            NodeKind::Decl { init, .. } => {
                if !init.is_null() {
                    self.gen_expr(init);
                    let dest = self.slot_of(node);
                    self.store_value(init, dest);
                }
                self.push_statement(node, start);
            }
            NodeKind::Assign { lhs, rhs } => {
                self.gen_expr(rhs);
                let dest = match self.arena.node(self.arena.resolve(lhs)).kind.clone() {
                    NodeKind::Dot { target, member } => {
                        let (base, offset, _) = self.dot_location(target, &member);
                        base + offset
                    }
                    _ => self.slot_of(lhs),
                };
                self.store_value(rhs, dest);
                self.push_statement(node, start);
            }
            NodeKind::Ret(value) => {
                if !value.is_null() {
                    self.gen_expr(value);
                    self.store_value(value, 0);
                }
                let mut w = InstructionWriter::new(&mut self.instructions);
                w.op(if self.is_main_fn { Opcode::EXIT } else { Opcode::RET });
                self.push_statement(node, start);
            }
            NodeKind::If {
                cond,
                then_stmts,
                else_stmts,
            } => {
                self.gen_expr(cond);
                let (then_patch, else_patch) = self.gen_jump_if(cond);
                self.push_statement(node, start);

                let then_target = self.instructions.len() as u64;
                for stmt in &then_stmts {
                    self.gen_stmt(*stmt);
                }
                let exit_patch = {
                    let mut w = InstructionWriter::new(&mut self.instructions);
                    w.op(Opcode::JUMP);
                    let patch = w.pos();
                    w.raw_i32(0);
                    patch
                };

                let else_target = self.instructions.len() as u64;
                for stmt in &else_stmts {
                    self.gen_stmt(*stmt);
                }
                let end = self.instructions.len() as u64;

                let mut w = InstructionWriter::new(&mut self.instructions);
                w.patch_i32(then_patch, then_target as i32);
                w.patch_i32(else_patch, else_target as i32);
                w.patch_i32(exit_patch, end as i32);
            }
            NodeKind::While { cond, body } => {
                let loop_start = self.instructions.len() as u64;
                self.gen_expr(cond);
                let (body_patch, end_patch) = self.gen_jump_if(cond);
                self.push_statement(node, start);

                let body_target = self.instructions.len() as u64;
                for stmt in &body {
                    self.gen_stmt(*stmt);
                }
                {
                    let mut w = InstructionWriter::new(&mut self.instructions);
                    w.op(Opcode::JUMP).raw_i32(loop_start as i32);
                }
                let end = self.instructions.len() as u64;

                let mut w = InstructionWriter::new(&mut self.instructions);
                w.patch_i32(body_patch, body_target as i32);
                w.patch_i32(end_patch, end as i32);
            }
            NodeKind::Puts(value) => {
                self.gen_expr(value);
                let slot = self.slot_of(value);
                let mut w = InstructionWriter::new(&mut self.instructions);
                w.op(Opcode::PUTS).relconst_i64(slot);
                self.push_statement(node, start);
            }
            NodeKind::FnCall { .. } => {
                self.gen_expr(node);
                self.push_statement(node, start);
            }
            other => panic!("cannot emit {:?} as a statement", other),
        }
    }

    /// Emits `JUMPIF` on an already-evaluated condition with placeholder
    /// targets; returns the two patch offsets.
    fn gen_jump_if(&mut self, cond: NodeId) -> (u64, u64) {
        let src = self.operand_src(cond);
        let mut w = InstructionWriter::new(&mut self.instructions);
        w.op(Opcode::JUMPIF);
        match src {
            Src::ConstInt(v) => {
                w.const_i32(v as i32);
            }
            Src::Slot(offset) => {
                w.rel(Opcode::RELI32, offset);
            }
            Src::ConstFloat(_) => panic!("float condition"),
        }
        let true_patch = w.pos() + 1;
        w.const_i32(0);
        let false_patch = w.pos() + 1;
        w.const_i32(0);
        (true_patch, false_patch)
    }

    // ---- expressions -----------------------------------------------------

    /// Materializes `node`'s value: after this, `operand_src(node)` is
    /// valid. Literals and already-stored locals need no code.
    fn gen_expr(&mut self, node: NodeId) {
        match self.arena.node(node).kind.clone() {
            NodeKind::IntLiteral(_)
            | NodeKind::FloatLiteral(_)
            | NodeKind::BoolLiteral(_)
            | NodeKind::Symbol(_)
            | NodeKind::Decl { .. }
            | NodeKind::DeclParam { .. }
            | NodeKind::FnDecl { .. } => {}
            NodeKind::Binop { op, lhs, rhs } => self.gen_binop(node, op, lhs, rhs),
            NodeKind::FnCall { func, args } => self.gen_call(node, func, &args),
            NodeKind::Cast { value, target_type } => self.gen_cast(node, value, target_type),
            NodeKind::Dot { target, member } => self.gen_dot(node, target, &member),
            other => panic!("cannot emit {:?} as an expression", other),
        }
    }

    fn operand_src(&self, node: NodeId) -> Src {
        let resolved = self.arena.resolve(node);
        match self.arena.node(resolved).kind.clone() {
            NodeKind::IntLiteral(v) => {
                // literals staged into shift temporaries read like locals
                if self.arena.node(resolved).is_bytecode_local {
                    Src::Slot(self.arena.node(resolved).local_offset)
                } else {
                    Src::ConstInt(v)
                }
            }
            NodeKind::FloatLiteral(v) => {
                if self.arena.node(resolved).is_bytecode_local {
                    Src::Slot(self.arena.node(resolved).local_offset)
                } else {
                    Src::ConstFloat(v)
                }
            }
            NodeKind::BoolLiteral(v) => Src::ConstInt(if v { 1 } else { 0 }),
            NodeKind::FnDecl { .. } => panic!("fn value used as scalar operand"),
            _ => Src::Slot(self.arena.node(resolved).local_offset),
        }
    }

    fn write_operand(w: &mut InstructionWriter, src: &Src, kind: TypeKind) {
        match src {
            Src::ConstInt(v) => match kind {
                TypeKind::I8 | TypeKind::U8 => {
                    w.const_i8(*v as i8);
                }
                TypeKind::I16 | TypeKind::U16 => {
                    w.const_i16(*v as i16);
                }
                TypeKind::I32 | TypeKind::U32 | TypeKind::Boolean => {
                    w.const_i32(*v as i32);
                }
                _ => {
                    w.const_i64(*v);
                }
            },
            Src::ConstFloat(v) => match kind {
                TypeKind::F32 => {
                    w.const_f32(*v as f32);
                }
                _ => {
                    w.const_f64(*v);
                }
            },
            Src::Slot(offset) => {
                let prefix = match kind {
                    TypeKind::I8 | TypeKind::U8 => Opcode::RELI8,
                    TypeKind::I16 | TypeKind::U16 => Opcode::RELI16,
                    TypeKind::I32 | TypeKind::U32 | TypeKind::Boolean => Opcode::RELI32,
                    TypeKind::F32 => Opcode::RELF32,
                    TypeKind::F64 => Opcode::RELF64,
                    _ => Opcode::RELI64,
                };
                w.rel(prefix, *offset);
            }
        }
    }

    fn gen_binop(&mut self, node: NodeId, op: BinopKind, lhs: NodeId, rhs: NodeId) {
        self.gen_expr(lhs);
        self.gen_expr(rhs);

        if op == BinopKind::Shl || op == BinopKind::Shr {
            return self.gen_shift(node, op, lhs, rhs);
        }

        let operand_kind = self.kind_of(lhs);
        let opcode = binop_opcode(op, operand_kind);
        let a = self.operand_src(lhs);
        let b = self.operand_src(rhs);
        let dest = self.slot_of(node);

        let mut w = InstructionWriter::new(&mut self.instructions);
        w.op(opcode);
        Gen::write_operand(&mut w, &a, operand_kind);
        Gen::write_operand(&mut w, &b, operand_kind);
        w.raw_i64(dest);
    }

    fn gen_shift(&mut self, node: NodeId, op: BinopKind, lhs: NodeId, rhs: NodeId) {
        // stage literal operands into their temporaries
        if self.is_literal(lhs) {
            let slot = self.arena.node(lhs).local_offset;
            self.store_value(lhs, slot);
        }
        if self.is_literal(rhs) {
            // widen the amount to the full word the shift reads
            let amount = match self.arena.node(rhs).kind {
                NodeKind::IntLiteral(v) => v,
                _ => panic!("shift amount must be an integer"),
            };
            let slot = self.arena.node(rhs).local_offset;
            let mut w = InstructionWriter::new(&mut self.instructions);
            w.op(Opcode::STORECONST).relconst_i64(slot).const_i64(amount);
        }

        let bytes = self.size_of(lhs) as i32;
        let a = self.slot_of(lhs);
        let b = self.slot_of(rhs);
        let dest = self.slot_of(node);

        let mut w = InstructionWriter::new(&mut self.instructions);
        w.op(if op == BinopKind::Shl {
            Opcode::SHL
        } else {
            Opcode::SHR
        });
        w.raw_i32(bytes).raw_i64(a).raw_i64(b).raw_i64(dest);
    }

    fn gen_cast(&mut self, node: NodeId, value: NodeId, target_type: NodeId) {
        self.gen_expr(value);
        if self.is_literal(value) {
            let slot = self.arena.node(value).local_offset;
            self.store_value(value, slot);
        }

        let from_kind = self.kind_of(value);
        let from = self.slot_of(value);
        let to_kind = self
            .arena
            .type_data(self.arena.resolve(target_type))
            .kind();
        let to = self.slot_of(node);

        let mut w = InstructionWriter::new(&mut self.instructions);
        w.op(Opcode::CONVERT)
            .raw_i32(from_kind as i32)
            .raw_i64(from)
            .raw_i32(to_kind as i32)
            .raw_i64(to);
    }

    /// Resolves a field access to (base slot, field offset, field size),
    /// emitting nothing.
    fn dot_location(&self, target: NodeId, member: &str) -> (i64, i64, i64) {
        let target_ty = self.type_of(target);
        let data = self.arena.type_data(target_ty);
        let index = data
            .params
            .iter()
            .position(|&p| self.arena.param_name(p) == member)
            .unwrap_or_else(|| panic!("no field named {}", member));
        let field_ty = self.arena.resolve(self.arena.param_type(data.params[index]));

        (
            self.slot_of(target),
            field_offset(self.arena, target_ty, index),
            type_size(self.arena, field_ty),
        )
    }

    fn gen_dot(&mut self, node: NodeId, target: NodeId, member: &str) {
        self.gen_expr(target);

        let target_ty = self.type_of(target);
        let data = self.arena.type_data(target_ty).clone();
        let (base, offset, size) = self.dot_location(target, member);
        let dest = self.slot_of(node);

        if data.secretly_union {
            // tag check: a mismatched variant access panics
            let index = data
                .params
                .iter()
                .position(|&p| self.arena.param_name(p) == member)
                .unwrap() as i64;

            let mut w = InstructionWriter::new(&mut self.instructions);
            w.op(Opcode::EQI64)
                .rel(Opcode::RELI64, base)
                .const_i64(index)
                .raw_i64(dest);
            w.op(Opcode::JUMPIF).rel(Opcode::RELI32, dest);
            let ok_patch = w.pos() + 1;
            w.const_i32(0);
            let panic_patch = w.pos() + 1;
            w.const_i32(0);

            let panic_at = w.pos();
            w.op(Opcode::PANIC);
            let ok_at = w.pos();
            w.patch_i32(ok_patch, ok_at as i32);
            w.patch_i32(panic_patch, panic_at as i32);
        }

        let mut w = InstructionWriter::new(&mut self.instructions);
        w.op(Opcode::STORE)
            .relconst_i64(dest)
            .raw_i32(size as i32)
            .relconst_i64(base + offset);
    }

    fn gen_call(&mut self, node: NodeId, func: NodeId, args: &[NodeId]) {
        for &arg in args {
            self.gen_expr(arg);
        }

        let resolved = self.arena.resolve(func);
        let (is_external, ret_size) = match self.arena.node(resolved).kind.clone() {
            NodeKind::FnDecl {
                external,
                return_type,
                ..
            } => {
                let ret = if return_type.is_null() {
                    0
                } else {
                    type_size(self.arena, self.arena.resolve(return_type))
                };
                (external, ret)
            }
            // indirect call through a fn-typed value
            _ => {
                self.gen_expr(func);
                let ty = self.type_of(func);
                let data = self.arena.type_data(ty);
                assert_eq!(data.kind(), TypeKind::Fn);
                let ret = if data.return_type.is_null() {
                    0
                } else {
                    type_size(self.arena, self.arena.resolve(data.return_type))
                };
                (false, ret)
            }
        };

        // stage arguments at the frame top, first argument on top
        let args_base = self.frame_size;
        let args_size: i64 = args.iter().map(|&a| arg_slot_size(self.size_of(a))).sum();
        let mut used = 0;
        for &arg in args {
            let size = arg_slot_size(self.size_of(arg));
            used += size;
            let slot = args_base + args_size - used;
            self.store_value(arg, slot);
        }

        {
            let mut w = InstructionWriter::new(&mut self.instructions);
            w.op(Opcode::BUMPSP).raw_i32(args_size as i32);
        }

        if is_external {
            let index = self.external_index(resolved);
            let mut w = InstructionWriter::new(&mut self.instructions);
            w.op(Opcode::CALLE).raw_i32(index as i32);
        } else if self.is_fn_decl(resolved) {
            self.to_process.push_back(resolved);
            let entry = self.fn_entries.get(&resolved).cloned();
            let mut w = InstructionWriter::new(&mut self.instructions);
            w.op(Opcode::CALL);
            match entry {
                Some(entry) => {
                    w.raw_i32(entry as i32);
                }
                None => {
                    let patch = w.pos();
                    w.raw_i32(0);
                    drop(w);
                    self.fixups.push(Fixup {
                        inst_offset: patch,
                        node: resolved,
                    });
                }
            }
        } else {
            let slot = self.slot_of(func);
            let mut w = InstructionWriter::new(&mut self.instructions);
            w.op(Opcode::CALLI).rel(Opcode::RELI64, slot);
        }

        // the return value sits one word past the saved registers
        if ret_size > 0 {
            let ret_src = args_base + args_size + 8;
            let dest = self.slot_of(node);
            let mut w = InstructionWriter::new(&mut self.instructions);
            w.op(Opcode::STORE)
                .relconst_i64(dest)
                .raw_i32(ret_size as i32)
                .relconst_i64(ret_src);
        }

        let mut w = InstructionWriter::new(&mut self.instructions);
        w.op(Opcode::BUMPSP).raw_i32(-(args_size as i32));
    }

    fn external_index(&mut self, fn_decl: NodeId) -> usize {
        let (name, params, return_type) = match self.arena.node(fn_decl).kind.clone() {
            NodeKind::FnDecl {
                name,
                params,
                return_type,
                ..
            } => (name, params, return_type),
            _ => unreachable!(),
        };

        let descriptor = ExternalFn {
            name,
            params: params
                .iter()
                .map(|&p| {
                    let ty = self.arena.resolve(self.arena.param_type(p));
                    AbiParam {
                        ty: abi_type(self.arena, ty),
                        size: arg_slot_size(type_size(self.arena, ty)),
                    }
                })
                .collect(),
            ret: if return_type.is_null() {
                opalvm::AbiType::Void
            } else {
                abi_type(self.arena, self.arena.resolve(return_type))
            },
        };

        if let Some(found) = self.external_fns.iter().position(|e| *e == descriptor) {
            return found;
        }
        self.external_fns.push(descriptor);
        self.external_fns.len() - 1
    }

    /// Copies `node`'s value to the absolute-at-runtime frame offset
    /// `dest` (base-pointer relative).
    fn store_value(&mut self, node: NodeId, dest: i64) {
        let resolved = self.arena.resolve(node);
        match self.arena.node(resolved).kind.clone() {
            NodeKind::IntLiteral(v) => {
                let kind = self.kind_of(resolved);
                let mut w = InstructionWriter::new(&mut self.instructions);
                w.op(Opcode::STORECONST).relconst_i64(dest);
                match kind {
                    TypeKind::I8 | TypeKind::U8 => {
                        w.const_i8(v as i8);
                    }
                    TypeKind::I16 | TypeKind::U16 => {
                        w.const_i16(v as i16);
                    }
                    TypeKind::I32 | TypeKind::U32 => {
                        w.const_i32(v as i32);
                    }
                    _ => {
                        w.const_i64(v);
                    }
                }
            }
            NodeKind::FloatLiteral(v) => {
                let kind = self.kind_of(resolved);
                let mut w = InstructionWriter::new(&mut self.instructions);
                w.op(Opcode::STORECONST).relconst_i64(dest);
                match kind {
                    TypeKind::F32 => {
                        w.const_f32(v as f32);
                    }
                    _ => {
                        w.const_f64(v);
                    }
                }
            }
            NodeKind::BoolLiteral(v) => {
                let mut w = InstructionWriter::new(&mut self.instructions);
                w.op(Opcode::STORECONST)
                    .relconst_i64(dest)
                    .const_i32(if v { 1 } else { 0 });
            }
            NodeKind::FnDecl { .. } => {
                // fn value: its table id, widened to the slot
                self.to_process.push_back(resolved);
                let id = self.fn_id(resolved);
                let mut w = InstructionWriter::new(&mut self.instructions);
                w.op(Opcode::STORECONST)
                    .relconst_i64(dest)
                    .const_i64(i64::from(id));
            }
            _ => {
                let src = self.arena.node(resolved).local_offset;
                if src == dest {
                    return;
                }
                let size = self.size_of(resolved);
                let mut w = InstructionWriter::new(&mut self.instructions);
                w.op(Opcode::STORE)
                    .relconst_i64(dest)
                    .raw_i32(size as i32)
                    .relconst_i64(src);
            }
        }
    }

    fn fixup(&mut self) {
        let fixups = std::mem::replace(&mut self.fixups, Vec::new());
        let mut w = InstructionWriter::new(&mut self.instructions);
        for fixup in fixups {
            let entry = self
                .fn_entries
                .get(&fixup.node)
                .unwrap_or_else(|| panic!("fixup against unemitted function {:?}", fixup.node));
            w.patch_i32(fixup.inst_offset, *entry as i32);
        }
    }
}

/// Argument slots are kept word-aligned so parameter offsets stay simple.
fn arg_slot_size(size: i64) -> i64 {
    align8(size)
}

/// Picks the instruction for a binary operation from the operator and the
/// operand type.
pub fn binop_opcode(op: BinopKind, kind: TypeKind) -> Opcode {
    use BinopKind::*;
    use Opcode::*;

    match kind {
        TypeKind::F32 => match op {
            Add => ADDF32,
            Sub => SUBF32,
            Mul => MULF32,
            Div => DIVF32,
            Rem => REMF32,
            Eq => EQF32,
            Neq => NEQF32,
            Lt => LTF32,
            Le => LEF32,
            Gt => GTF32,
            Ge => GEF32,
            other => panic!("{:?} is not a float operation", other),
        },
        TypeKind::F64 => match op {
            Add => ADDF64,
            Sub => SUBF64,
            Mul => MULF64,
            Div => DIVF64,
            Rem => REMF64,
            Eq => EQF64,
            Neq => NEQF64,
            Lt => LTF64,
            Le => LEF64,
            Gt => GTF64,
            Ge => GEF64,
            other => panic!("{:?} is not a float operation", other),
        },
        TypeKind::Boolean => match op {
            Eq => EQI32,
            Neq => NEQI32,
            BitAnd => AND32,
            BitOr => OR32,
            BitXor => XOR32,
            other => panic!("{:?} is not a boolean operation", other),
        },
        TypeKind::I8 | TypeKind::U8 => int_opcode(op, kind.is_signed_int(), ADDI8),
        TypeKind::I16 | TypeKind::U16 => int_opcode(op, kind.is_signed_int(), ADDI16),
        TypeKind::I32 | TypeKind::U32 => int_opcode(op, kind.is_signed_int(), ADDI32),
        TypeKind::I64 | TypeKind::U64 => int_opcode(op, kind.is_signed_int(), ADDI64),
        other => panic!("no binary operations on {:?}", other),
    }
}

/// Integer family opcodes share their intra-family order, so one base plus
/// a fixed offset selects the member.
fn int_opcode(op: BinopKind, signed: bool, base: Opcode) -> Opcode {
    use BinopKind::*;

    let width_offset = |n: u8| Opcode::from_byte(base as u8 + n).unwrap();
    match op {
        Add => width_offset(0),
        Sub => width_offset(1),
        Mul => width_offset(2),
        Div => width_offset(if signed { 4 } else { 3 }),
        Rem => width_offset(if signed { 6 } else { 5 }),
        Eq => width_offset(7),
        Neq => width_offset(8),
        Gt => width_offset(if signed { 10 } else { 9 }),
        Ge => width_offset(if signed { 12 } else { 11 }),
        Lt => width_offset(if signed { 14 } else { 13 }),
        Le => width_offset(if signed { 16 } else { 15 }),
        BitAnd | BitOr | BitXor => bitwise_opcode(op, base),
        Shl | Shr => panic!("shifts are emitted through SHL/SHR"),
    }
}

fn bitwise_opcode(op: BinopKind, base: Opcode) -> Opcode {
    // base is the family's ADD; widths share their order inside AND/OR/XOR
    let width = match base {
        Opcode::ADDI8 => 0,
        Opcode::ADDI16 => 1,
        Opcode::ADDI32 => 2,
        Opcode::ADDI64 => 3,
        _ => unreachable!(),
    };
    let family_base = match op {
        BinopKind::BitAnd => Opcode::AND8,
        BinopKind::BitOr => Opcode::OR8,
        BinopKind::BitXor => Opcode::XOR8,
        _ => unreachable!(),
    };
    Opcode::from_byte(family_base as u8 + width).unwrap()
}
