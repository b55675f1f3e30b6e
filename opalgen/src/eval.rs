//! Compile-time execution: `#run` folding, `#sizeof`, and the debugger's
//! expression evaluator. All three share one path — emit the expression
//! with [`Gen`], run it on a fresh nested interpreter, read the scalar back
//! from the result slot.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use oast::{type_size, Arena, BinopKind, Node, NodeId, NodeKind, ScopeId, SrcInfo, TypeData, TypeKind};
use opalvm::debug::ExprEvaluator;
use opalvm::interp::{ExitCode, Interpreter};
use opalvm::source_map::SourceMapStatement;

use crate::gen::Gen;

#[derive(Parser)]
#[grammar = "dexpr.pest"]
struct DexprParser;

fn kind_of(arena: &Arena, node: NodeId) -> TypeKind {
    let ty = arena.resolve(arena.node(arena.resolve(node)).type_info);
    if ty.is_null() {
        TypeKind::None
    } else {
        arena.type_data(ty).kind()
    }
}

fn read_result(interp: &Interpreter, kind: TypeKind) -> i64 {
    match kind {
        TypeKind::I8 => i64::from(interp.read_stack::<i8>(0)),
        TypeKind::U8 => i64::from(interp.read_stack::<u8>(0)),
        TypeKind::I16 => i64::from(interp.read_stack::<i16>(0)),
        TypeKind::U16 => i64::from(interp.read_stack::<u16>(0)),
        TypeKind::I32 | TypeKind::Boolean => i64::from(interp.read_stack::<i32>(0)),
        TypeKind::U32 => i64::from(interp.read_stack::<u32>(0)),
        TypeKind::F32 => interp.read_stack::<f32>(0) as i64,
        TypeKind::F64 => interp.read_stack::<f64>(0) as i64,
        _ => interp.read_stack::<i64>(0),
    }
}

/// Wraps a typed expression in a synthetic zero-parameter function, emits
/// it, executes it on a nested interpreter, and returns the scalar left in
/// the result slot.
pub fn run_expression(arena: &mut Arena, src: SrcInfo, expr: NodeId) -> Result<i64, String> {
    let kind = kind_of(arena, expr);
    let return_type = arena.resolve(arena.node(arena.resolve(expr)).type_info);

    let ret = arena.alloc_kind(NodeKind::Ret(expr));
    let wrapped = arena.alloc_kind(NodeKind::FnDecl {
        name: "#run".to_string(),
        params: Vec::new(),
        return_type,
        body: vec![ret],
        external: false,
    });

    let program = {
        let mut gen = Gen::new(arena, src);
        gen.gen_main(wrapped);
        gen.finish()
    };

    let mut interp = Interpreter::new();
    interp.load_program(program);
    match interp.run() {
        ExitCode::Exited => Ok(read_result(&interp, kind)),
        other => Err(format!("compile-time evaluation failed: {}", other)),
    }
}

/// Folds a non-literal expression to an `IntLiteral`, recording it as the
/// node's static value. Already-literal nodes come back unchanged.
pub fn constantize(arena: &mut Arena, src: SrcInfo, node: NodeId) -> Result<NodeId, String> {
    if let NodeKind::IntLiteral(_) = arena.node(node).kind {
        return Ok(node);
    }

    let value = run_expression(arena, src, node)?;

    let ty = arena.alloc_type(TypeData::scalar(TypeKind::I64));
    let mut literal = Node::new(NodeKind::IntLiteral(value));
    literal.type_info = ty;
    literal.region = arena.node(node).region;
    let literal = arena.alloc(literal);

    arena.node_mut(node).static_value = literal;
    Ok(literal)
}

/// `#sizeof`: the storage size of a type, folded as an integer literal.
pub fn sizeof_literal(arena: &mut Arena, ty: NodeId) -> NodeId {
    let size = type_size(arena, arena.resolve(ty));
    let int_ty = arena.alloc_type(TypeData::scalar(TypeKind::I64));
    let mut literal = Node::new(NodeKind::IntLiteral(size));
    literal.type_info = int_ty;
    arena.alloc(literal)
}

/// A local's value captured off the live stack.
#[derive(Clone, Copy, Debug)]
enum Snapshot {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// The debugger's compiler re-entry: parses an expression in the stopped
/// statement's scope, snapshots the locals it names from the live frame,
/// and evaluates the result in a nested VM run.
pub struct Evaluator<'c> {
    arena: &'c Arena,
}

impl<'c> Evaluator<'c> {
    pub fn new(arena: &'c Arena) -> Evaluator<'c> {
        Evaluator { arena }
    }

    fn snapshot(&self, interp: &Interpreter, scope: ScopeId, name: &str) -> Result<Snapshot, String> {
        let node_id = self
            .arena
            .lookup(scope, name)
            .ok_or_else(|| format!("no variable named {} in scope", name))?;
        let node = self.arena.node(self.arena.resolve(node_id));
        if !node.is_local && !node.is_bytecode_local {
            return Err(format!("{} has no frame storage", name));
        }

        let offset = interp.bp + node.local_offset;
        let value = match kind_of(self.arena, node_id) {
            TypeKind::I8 => Snapshot::Int(i64::from(interp.read_stack::<i8>(offset))),
            TypeKind::U8 => Snapshot::Int(i64::from(interp.read_stack::<u8>(offset))),
            TypeKind::I16 => Snapshot::Int(i64::from(interp.read_stack::<i16>(offset))),
            TypeKind::U16 => Snapshot::Int(i64::from(interp.read_stack::<u16>(offset))),
            TypeKind::I32 => Snapshot::Int(i64::from(interp.read_stack::<i32>(offset))),
            TypeKind::U32 => Snapshot::Int(i64::from(interp.read_stack::<u32>(offset))),
            TypeKind::I64 | TypeKind::U64 => Snapshot::Int(interp.read_stack::<i64>(offset)),
            TypeKind::F32 => Snapshot::Float(f64::from(interp.read_stack::<f32>(offset))),
            TypeKind::F64 => Snapshot::Float(interp.read_stack::<f64>(offset)),
            TypeKind::Boolean => Snapshot::Bool(interp.read_stack::<i32>(offset) == 1),
            other => return Err(format!("cannot evaluate {} of type {:?}", name, other)),
        };
        Ok(value)
    }
}

impl<'c> ExprEvaluator for Evaluator<'c> {
    fn evaluate(
        &mut self,
        interp: &Interpreter,
        stmt: &SourceMapStatement,
        expr: &str,
    ) -> Result<i64, String> {
        if stmt.node.is_null() {
            return Err("statement has no scope".to_string());
        }
        let scope = self.arena.node(stmt.node).scope;
        if scope.is_null() {
            return Err("statement has no scope".to_string());
        }

        let parsed = DexprParser::parse(Rule::program, expr)
            .map_err(|err| format!("{}", err))?
            .next()
            .unwrap();

        let mut scratch = Builder::new();
        let root = {
            let expr_pair = parsed.into_inner().next().unwrap();
            scratch.build(expr_pair, &mut |name| self.snapshot(interp, scope, name))?
        };

        run_expression(&mut scratch.arena, SrcInfo::anonymous(expr), root)
    }
}

/// Builds the scratch AST for one evaluation. Every leaf is a literal (or
/// a snapshot of one), so mixed-type trees promote by rewriting or by a
/// cast node the emitter lowers to `CONVERT`.
struct Builder {
    arena: Arena,
    i64_ty: NodeId,
    f64_ty: NodeId,
    bool_ty: NodeId,
}

impl Builder {
    fn new() -> Builder {
        let mut arena = Arena::new();
        let i64_ty = arena.alloc_type(TypeData::scalar(TypeKind::I64));
        let f64_ty = arena.alloc_type(TypeData::scalar(TypeKind::F64));
        let bool_ty = arena.alloc_type(TypeData::scalar(TypeKind::Boolean));
        Builder {
            arena,
            i64_ty,
            f64_ty,
            bool_ty,
        }
    }

    fn leaf(&mut self, kind: NodeKind, ty: NodeId) -> NodeId {
        let mut node = Node::new(kind);
        node.type_info = ty;
        self.arena.alloc(node)
    }

    fn snapshot_leaf(&mut self, value: Snapshot) -> NodeId {
        match value {
            Snapshot::Int(v) => self.leaf(NodeKind::IntLiteral(v), self.i64_ty),
            Snapshot::Float(v) => self.leaf(NodeKind::FloatLiteral(v), self.f64_ty),
            Snapshot::Bool(v) => self.leaf(NodeKind::BoolLiteral(v), self.bool_ty),
        }
    }

    fn build(
        &mut self,
        pair: Pair<Rule>,
        resolve: &mut dyn FnMut(&str) -> Result<Snapshot, String>,
    ) -> Result<NodeId, String> {
        match pair.as_rule() {
            Rule::expr => {
                let inner = pair.into_inner().next().unwrap();
                self.build(inner, resolve)
            }
            Rule::logic | Rule::cmp | Rule::sum | Rule::product => self.fold(pair, resolve),
            Rule::atom => {
                let inner = pair.into_inner().next().unwrap();
                self.build(inner, resolve)
            }
            Rule::int => {
                let v: i64 = pair
                    .as_str()
                    .parse()
                    .map_err(|err| format!("bad integer: {}", err))?;
                Ok(self.leaf(NodeKind::IntLiteral(v), self.i64_ty))
            }
            Rule::float => {
                let v: f64 = pair
                    .as_str()
                    .parse()
                    .map_err(|err| format!("bad float: {}", err))?;
                Ok(self.leaf(NodeKind::FloatLiteral(v), self.f64_ty))
            }
            Rule::boolean => {
                let v = pair.as_str() == "true";
                Ok(self.leaf(NodeKind::BoolLiteral(v), self.bool_ty))
            }
            Rule::ident => {
                let value = resolve(pair.as_str())?;
                Ok(self.snapshot_leaf(value))
            }
            other => Err(format!("unexpected rule {:?}", other)),
        }
    }

    /// Folds a left-associative operator chain.
    fn fold(
        &mut self,
        pair: Pair<Rule>,
        resolve: &mut dyn FnMut(&str) -> Result<Snapshot, String>,
    ) -> Result<NodeId, String> {
        let mut pairs = pair.into_inner();
        let mut lhs = self.build(pairs.next().unwrap(), resolve)?;

        while let Some(op_pair) = pairs.next() {
            let op = binop_for(op_pair.as_str())?;
            let rhs = self.build(pairs.next().unwrap(), resolve)?;
            lhs = self.binop(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn binop(&mut self, op: BinopKind, lhs: NodeId, rhs: NodeId) -> Result<NodeId, String> {
        let (lhs, rhs, operand_kind) = self.unify(op, lhs, rhs)?;

        let result_ty = if op.is_comparison() || operand_kind == TypeKind::Boolean {
            self.bool_ty
        } else if operand_kind == TypeKind::F64 {
            self.f64_ty
        } else {
            self.i64_ty
        };

        let mut node = Node::new(NodeKind::Binop { op, lhs, rhs });
        node.type_info = result_ty;
        Ok(self.arena.alloc(node))
    }

    /// Brings both sides to one operand type: ints promote to floats when
    /// mixed, literal ints by rewriting, anything else through a cast.
    fn unify(
        &mut self,
        op: BinopKind,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Result<(NodeId, NodeId, TypeKind), String> {
        let lk = kind_of(&self.arena, lhs);
        let rk = kind_of(&self.arena, rhs);

        if lk == rk {
            return Ok((lhs, rhs, lk));
        }

        let float = TypeKind::F64;
        if (lk == float && rk == TypeKind::I64) || (lk == TypeKind::I64 && rk == float) {
            let lhs = if lk == float { lhs } else { self.to_float(lhs) };
            let rhs = if rk == float { rhs } else { self.to_float(rhs) };
            return Ok((lhs, rhs, float));
        }

        Err(format!(
            "cannot apply {:?} to {:?} and {:?}",
            op, lk, rk
        ))
    }

    fn to_float(&mut self, node: NodeId) -> NodeId {
        if let NodeKind::IntLiteral(v) = self.arena.node(node).kind {
            return self.leaf(NodeKind::FloatLiteral(v as f64), self.f64_ty);
        }
        let target_type = self.f64_ty;
        let mut cast = Node::new(NodeKind::Cast {
            value: node,
            target_type,
        });
        cast.type_info = self.f64_ty;
        self.arena.alloc(cast)
    }
}

fn binop_for(text: &str) -> Result<BinopKind, String> {
    Ok(match text {
        "+" => BinopKind::Add,
        "-" => BinopKind::Sub,
        "*" => BinopKind::Mul,
        "/" => BinopKind::Div,
        "%" => BinopKind::Rem,
        "==" => BinopKind::Eq,
        "!=" => BinopKind::Neq,
        "<" => BinopKind::Lt,
        "<=" => BinopKind::Le,
        ">" => BinopKind::Gt,
        ">=" => BinopKind::Ge,
        "&&" => BinopKind::BitAnd,
        "||" => BinopKind::BitOr,
        other => return Err(format!("unknown operator {}", other)),
    })
}
