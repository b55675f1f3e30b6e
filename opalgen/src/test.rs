use std::cell::RefCell;
use std::io::Cursor;
use std::io::Write as IoWrite;
use std::os::raw::c_void;
use std::rc::Rc;

use oast::{
    Arena, BinopKind, Location, Node, NodeId, NodeKind, Region, Scope, ScopeId, SrcInfo, TypeData,
    TypeKind,
};
use opalvm::debug::Debugger;
use opalvm::ffi::{AbiCall, AbiParam, AbiType};
use opalvm::{ExitCode, Interpreter, Program};

use crate::eval::{constantize, sizeof_literal, Evaluator};
use crate::gen::Gen;

/// Builds typed nodes with less ceremony than raw arena calls.
struct Ast {
    arena: Arena,
    i32_ty: NodeId,
    i64_ty: NodeId,
    bool_ty: NodeId,
}

impl Ast {
    fn new() -> Ast {
        let mut arena = Arena::new();
        let i32_ty = arena.alloc_type(TypeData::scalar(TypeKind::I32));
        let i64_ty = arena.alloc_type(TypeData::scalar(TypeKind::I64));
        let bool_ty = arena.alloc_type(TypeData::scalar(TypeKind::Boolean));
        Ast {
            arena,
            i32_ty,
            i64_ty,
            bool_ty,
        }
    }

    fn typed(&mut self, kind: NodeKind, ty: NodeId, line: u64) -> NodeId {
        let mut node = Node::new(kind);
        node.type_info = ty;
        node.region = Region::new(
            Location {
                line,
                col: 0,
                byte: 0,
            },
            Location {
                line,
                col: 0,
                byte: 0,
            },
        );
        self.arena.alloc(node)
    }

    fn int(&mut self, v: i64, ty: NodeId) -> NodeId {
        self.typed(NodeKind::IntLiteral(v), ty, 0)
    }

    fn param(&mut self, name: &str, ty: NodeId, index: u32) -> NodeId {
        self.typed(
            NodeKind::DeclParam {
                name: name.to_string(),
                param_type: ty,
                index,
            },
            ty,
            0,
        )
    }

    fn decl(&mut self, name: &str, ty: NodeId, init: NodeId, line: u64) -> NodeId {
        self.typed(
            NodeKind::Decl {
                name: name.to_string(),
                init,
            },
            ty,
            line,
        )
    }

    fn binop(&mut self, op: BinopKind, lhs: NodeId, rhs: NodeId, ty: NodeId, line: u64) -> NodeId {
        self.typed(NodeKind::Binop { op, lhs, rhs }, ty, line)
    }

    fn run(&mut self, main: NodeId) -> (ExitCode, Interpreter) {
        let mut interp = Interpreter::new();
        interp.load_program(self.emit(main));
        let code = interp.run();
        (code, interp)
    }

    fn emit(&mut self, main: NodeId) -> Program {
        let mut gen = Gen::new(&mut self.arena, SrcInfo::new("main.opal", SOURCE));
        gen.gen_main(main);
        gen.finish()
    }
}

const SOURCE: &str = "line0\nline1\nline2\nline3\nline4\nline5\n";

#[test]
fn call_with_arguments_and_forward_fixup() {
    let mut ast = Ast::new();
    let i32_ty = ast.i32_ty;

    let a = ast.param("a", i32_ty, 0);
    let b = ast.param("b", i32_ty, 1);
    let sum = ast.binop(BinopKind::Add, a, b, i32_ty, 4);
    let f_ret = ast.typed(NodeKind::Ret(sum), i32_ty, 4);
    let f = ast.typed(
        NodeKind::FnDecl {
            name: "f".to_string(),
            params: vec![a, b],
            return_type: i32_ty,
            body: vec![f_ret],
            external: false,
        },
        i32_ty,
        3,
    );

    let three = ast.int(3, i32_ty);
    let four = ast.int(4, i32_ty);
    let call = ast.typed(
        NodeKind::FnCall {
            func: f,
            args: vec![three, four],
        },
        i32_ty,
        0,
    );
    let x = ast.decl("x", i32_ty, call, 0);
    let main_ret = ast.typed(NodeKind::Ret(x), i32_ty, 1);
    let main = ast.typed(
        NodeKind::FnDecl {
            name: "main".to_string(),
            params: vec![],
            return_type: i32_ty,
            body: vec![x, main_ret],
            external: false,
        },
        i32_ty,
        0,
    );

    let program = ast.emit(main);
    // main and f both have table entries
    assert_eq!(program.fn_table.len(), 2);

    let mut interp = Interpreter::new();
    interp.load_program(program);
    assert_eq!(interp.run(), ExitCode::Exited);
    assert_eq!(interp.read_stack::<i32>(0), 7);
}

/// `sum = 0; i = 1; while i <= 10 { sum = sum + i; i = i + 1 }; return sum`
/// with the while condition on line 2 and a scope holding both locals.
fn sum_loop(ast: &mut Ast) -> NodeId {
    let i32_ty = ast.i32_ty;
    let bool_ty = ast.bool_ty;

    let zero = ast.int(0, i32_ty);
    let one = ast.int(1, i32_ty);
    let sum = ast.decl("sum", i32_ty, zero, 0);
    let i = ast.decl("i", i32_ty, one, 1);

    let ten = ast.int(10, i32_ty);
    let cond = ast.binop(BinopKind::Le, i, ten, bool_ty, 2);

    let add_sum = ast.binop(BinopKind::Add, sum, i, i32_ty, 3);
    let assign_sum = ast.typed(NodeKind::Assign { lhs: sum, rhs: add_sum }, i32_ty, 3);
    let one_more = ast.int(1, i32_ty);
    let add_i = ast.binop(BinopKind::Add, i, one_more, i32_ty, 4);
    let assign_i = ast.typed(NodeKind::Assign { lhs: i, rhs: add_i }, i32_ty, 4);

    let while_node = ast.typed(
        NodeKind::While {
            cond,
            body: vec![assign_sum, assign_i],
        },
        i32_ty,
        2,
    );
    let ret = ast.typed(NodeKind::Ret(sum), i32_ty, 5);

    let main = ast.typed(
        NodeKind::FnDecl {
            name: "main".to_string(),
            params: vec![],
            return_type: i32_ty,
            body: vec![sum, i, while_node, ret],
            external: false,
        },
        i32_ty,
        0,
    );

    // one function scope over everything, so the debugger and the
    // evaluator can find the locals
    let scope = ast.arena.push_scope(Scope {
        parent: ScopeId::NULL,
        symbols: vec![("sum".to_string(), sum), ("i".to_string(), i)],
        is_function_scope: true,
        fn_params: vec![],
        fn_return_type: i32_ty,
    });
    for node in [sum, i, cond, while_node, assign_sum, assign_i, ret, main].iter() {
        ast.arena.node_mut(*node).scope = scope;
    }

    main
}

#[test]
fn while_loop_sums_one_to_ten() {
    let mut ast = Ast::new();
    let main = sum_loop(&mut ast);

    let (code, interp) = ast.run(main);
    assert_eq!(code, ExitCode::Exited);
    assert_eq!(interp.read_stack::<i32>(0), 55);
}

#[test]
fn source_map_is_monotone() {
    let mut ast = Ast::new();
    let main = sum_loop(&mut ast);
    let program = ast.emit(main);

    let statements = &program.source_map.statements;
    assert!(statements.len() >= 5);
    for pair in statements.windows(2) {
        assert!(pair[0].inst_index < pair[0].inst_end_index);
        assert!(pair[0].inst_end_index <= pair[1].inst_index);
    }
}

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl IoWrite for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn conditional_breakpoint_stops_once_at_matching_iteration() {
    let mut ast = Ast::new();
    let main = sum_loop(&mut ast);
    let program = ast.emit(main);

    let mut interp = Interpreter::new();
    interp.load_program(program);

    let out = SharedBuf::default();
    let script = "break 2 main.opal i == 5\ncontinue\neval i * 2\ncontinue\n";
    let mut debugger = Debugger::new(
        Box::new(Cursor::new(script.as_bytes().to_vec())),
        Box::new(out.clone()),
    )
    .with_arena(&ast.arena)
    .with_evaluator(Box::new(Evaluator::new(&ast.arena)));

    let code = interp.run_debug(&mut debugger);

    assert_eq!(code, ExitCode::Exited);
    assert_eq!(interp.read_stack::<i32>(0), 55);
    // stopped twice: once on entry, once on the matching iteration
    assert_eq!(out.contents(), "\n\nanswer: 10\n\n");
}

#[test]
fn debugger_vars_shows_typed_locals() {
    let mut ast = Ast::new();
    let main = sum_loop(&mut ast);
    let program = ast.emit(main);

    let mut interp = Interpreter::new();
    interp.load_program(program);

    let out = SharedBuf::default();
    let mut debugger = Debugger::new(
        Box::new(Cursor::new(b"step\nstep\nvars\nquit\n".to_vec())),
        Box::new(out.clone()),
    )
    .with_arena(&ast.arena);

    let code = interp.run_debug(&mut debugger);
    assert_eq!(code, ExitCode::Terminated);

    let output = out.contents();
    assert!(output.contains("sum: 0"), "output: {:?}", output);
    assert!(output.contains("i: 1"), "output: {:?}", output);
    assert!(output.contains("*RETURN*: 0"), "output: {:?}", output);
}

#[test]
fn debugger_info_reports_depth_and_location() {
    let mut ast = Ast::new();
    let main = sum_loop(&mut ast);
    let program = ast.emit(main);

    let mut interp = Interpreter::new();
    interp.load_program(program);

    let out = SharedBuf::default();
    let mut debugger = Debugger::new(
        Box::new(Cursor::new(b"info\nquit\n".to_vec())),
        Box::new(out.clone()),
    )
    .with_arena(&ast.arena);

    assert_eq!(interp.run_debug(&mut debugger), ExitCode::Terminated);

    let output = out.contents();
    assert!(output.starts_with("1\nmain.opal\n0\n0\n"), "output: {:?}", output);
    assert!(output.contains("sum: 0"), "output: {:?}", output);
}

#[test]
fn constantize_folds_to_literal() {
    let mut ast = Ast::new();
    let i64_ty = ast.i64_ty;

    let twenty = ast.int(20, i64_ty);
    let twenty_two = ast.int(22, i64_ty);
    let expr = ast.binop(BinopKind::Add, twenty, twenty_two, i64_ty, 0);

    let folded = constantize(&mut ast.arena, SrcInfo::anonymous(""), expr).unwrap();
    assert_eq!(ast.arena.node(folded).kind, NodeKind::IntLiteral(42));
    assert_eq!(ast.arena.node(expr).static_value, folded);

    // literals come back unchanged
    let literal = ast.int(9, i64_ty);
    let same = constantize(&mut ast.arena, SrcInfo::anonymous(""), literal).unwrap();
    assert_eq!(same, literal);
}

#[test]
fn sizeof_folds_struct_size() {
    let mut ast = Ast::new();
    let i8_ty = ast.arena.alloc_type(TypeData::scalar(TypeKind::I8));
    let i32_ty = ast.i32_ty;
    let a = ast.param("a", i8_ty, 0);
    let b = ast.param("b", i32_ty, 1);
    let st = ast.arena.alloc_type(TypeData::struct_of(vec![a, b]));

    let folded = sizeof_literal(&mut ast.arena, st);
    assert_eq!(ast.arena.node(folded).kind, NodeKind::IntLiteral(8));
}

#[test]
fn union_tag_mismatch_panics() {
    let mut ast = Ast::new();
    let i64_ty = ast.i64_ty;

    let a = ast.param("a", i64_ty, 0);
    let b = ast.param("b", i64_ty, 1);
    let union_ty = ast.arena.alloc_type(TypeData::union_of(vec![a, b]));

    // u zero-initialized: tag 0, so variant `b` (index 1) is not active
    let u = ast.decl("u", union_ty, NodeId::NULL, 0);
    let dot = ast.typed(
        NodeKind::Dot {
            target: u,
            member: "b".to_string(),
        },
        i64_ty,
        1,
    );
    let x = ast.decl("x", i64_ty, dot, 1);
    let main = ast.typed(
        NodeKind::FnDecl {
            name: "main".to_string(),
            params: vec![],
            return_type: i64_ty,
            body: vec![u, x],
            external: false,
        },
        i64_ty,
        0,
    );

    let (code, _) = ast.run(main);
    match code {
        ExitCode::Panicked { .. } => {}
        other => panic!("expected a panic, got {:?}", other),
    }
}

struct ScriptedAbi {
    calls: Rc<RefCell<Vec<i32>>>,
}

impl AbiCall for ScriptedAbi {
    fn prepare(&mut self, params: &[AbiParam], ret: &AbiType) -> Result<usize, String> {
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].ty, AbiType::SInt32);
        assert_eq!(*ret, AbiType::SInt32);
        Ok(0)
    }

    fn invoke(&mut self, _descriptor: usize, _fn_addr: usize, args: &[*mut c_void], ret: *mut c_void) {
        let a = unsafe { *(args[0] as *const i32) };
        self.calls.borrow_mut().push(a);
        unsafe {
            *(ret as *mut i32) = a * 10;
        }
    }
}

#[test]
fn external_call_goes_through_descriptor_table() {
    let mut ast = Ast::new();
    let i32_ty = ast.i32_ty;

    let p = ast.param("v", i32_ty, 0);
    let magic = ast.typed(
        NodeKind::FnDecl {
            name: "magic".to_string(),
            params: vec![p],
            return_type: i32_ty,
            body: vec![],
            external: true,
        },
        i32_ty,
        0,
    );

    let seven = ast.int(7, i32_ty);
    let call = ast.typed(
        NodeKind::FnCall {
            func: magic,
            args: vec![seven],
        },
        i32_ty,
        0,
    );
    let x = ast.decl("x", i32_ty, call, 0);
    let ret = ast.typed(NodeKind::Ret(x), i32_ty, 1);
    let main = ast.typed(
        NodeKind::FnDecl {
            name: "main".to_string(),
            params: vec![],
            return_type: i32_ty,
            body: vec![x, ret],
            external: false,
        },
        i32_ty,
        0,
    );

    let program = ast.emit(main);
    assert_eq!(program.external_fns.len(), 1);
    assert_eq!(program.external_fns[0].name, "magic");

    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut interp = Interpreter::new();
    interp.load_program(program);
    interp.set_abi(Box::new(ScriptedAbi {
        calls: calls.clone(),
    }));
    interp.symbols.insert("magic".to_string(), 0x1);

    assert_eq!(interp.run(), ExitCode::Exited);
    assert_eq!(&*calls.borrow(), &[7]);
    assert_eq!(interp.read_stack::<i32>(0), 70);
}

#[test]
fn indirect_call_through_fn_value() {
    let mut ast = Ast::new();
    let i32_ty = ast.i32_ty;

    let twenty_one = ast.int(21, i32_ty);
    let f_ret = ast.typed(NodeKind::Ret(twenty_one), i32_ty, 0);
    let f = ast.typed(
        NodeKind::FnDecl {
            name: "f".to_string(),
            params: vec![],
            return_type: i32_ty,
            body: vec![f_ret],
            external: false,
        },
        i32_ty,
        0,
    );

    let fn_ty = ast.arena.alloc_type(TypeData::fn_of(vec![], i32_ty));
    let fp = ast.decl("fp", fn_ty, f, 0);
    let call = ast.typed(
        NodeKind::FnCall {
            func: fp,
            args: vec![],
        },
        i32_ty,
        1,
    );
    let y = ast.decl("y", i32_ty, call, 1);
    let ret = ast.typed(NodeKind::Ret(y), i32_ty, 2);
    let main = ast.typed(
        NodeKind::FnDecl {
            name: "main".to_string(),
            params: vec![],
            return_type: i32_ty,
            body: vec![fp, y, ret],
            external: false,
        },
        i32_ty,
        0,
    );

    let (code, interp) = ast.run(main);
    assert_eq!(code, ExitCode::Exited);
    assert_eq!(interp.read_stack::<i32>(0), 21);
}
