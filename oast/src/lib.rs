//! Typed AST arena for the Opal compiler.
//!
//! Nodes live in a single [`Arena`] and refer to each other exclusively
//! through [`NodeId`] index handles; `resolved` links form chains that
//! [`Arena::resolve`] walks with a fixed bound. The bytecode emitter, the
//! debugger's variable printer and the compile-time evaluator all operate on
//! this arena — nothing in it owns a raw pointer.

pub mod source;
pub mod types;

pub use crate::source::{Location, Region, SrcInfo};
pub use crate::types::{field_offset, type_align, type_size, TypeData, TypeKind};

/// Index handle of a node in an [`Arena`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NodeId(u32);

impl NodeId {
    pub const NULL: NodeId = NodeId(u32::max_value());

    pub fn is_null(self) -> bool {
        self == NodeId::NULL
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Default for NodeId {
    fn default() -> NodeId {
        NodeId::NULL
    }
}

/// Index handle of a scope in an [`Arena`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ScopeId(u32);

impl ScopeId {
    pub const NULL: ScopeId = ScopeId(u32::max_value());

    pub fn is_null(self) -> bool {
        self == ScopeId::NULL
    }
}

impl Default for ScopeId {
    fn default() -> ScopeId {
        ScopeId::NULL
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinopKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinopKind {
    pub fn is_comparison(self) -> bool {
        match self {
            BinopKind::Eq
            | BinopKind::Neq
            | BinopKind::Lt
            | BinopKind::Le
            | BinopKind::Gt
            | BinopKind::Ge => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    IntLiteral(i64),
    FloatLiteral(f64),
    BoolLiteral(bool),
    /// A name use; resolution fills in the node's `resolved` link.
    Symbol(String),
    Type(types::TypeData),
    /// Local variable declaration with an optional initializer.
    Decl {
        name: String,
        init: NodeId,
    },
    DeclParam {
        name: String,
        param_type: NodeId,
        index: u32,
    },
    Assign {
        lhs: NodeId,
        rhs: NodeId,
    },
    Binop {
        op: BinopKind,
        lhs: NodeId,
        rhs: NodeId,
    },
    FnDecl {
        name: String,
        params: Vec<NodeId>,
        return_type: NodeId,
        body: Vec<NodeId>,
        /// Foreign declarations have no body; calls to them go through the
        /// external-function table.
        external: bool,
    },
    FnCall {
        func: NodeId,
        args: Vec<NodeId>,
    },
    If {
        cond: NodeId,
        then_stmts: Vec<NodeId>,
        else_stmts: Vec<NodeId>,
    },
    While {
        cond: NodeId,
        body: Vec<NodeId>,
    },
    Ret(NodeId),
    Cast {
        value: NodeId,
        target_type: NodeId,
    },
    /// Struct field access; on secret unions this carries a runtime tag
    /// check.
    Dot {
        target: NodeId,
        member: String,
    },
    Puts(NodeId),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub region: Region,
    pub scope: ScopeId,
    /// Type node, filled by resolution.
    pub type_info: NodeId,
    /// Symbol resolution target; chains are walked by [`Arena::resolve`].
    pub resolved: NodeId,
    /// Compile-time folded literal, if any.
    pub static_value: NodeId,
    /// Frame offset for locals and params, assigned by the emitter's layout
    /// pre-pass.
    pub local_offset: i64,
    /// Named local, shown by the debugger's variable dumps.
    pub is_local: bool,
    /// Emitter-created temporary with a frame slot but no name.
    pub is_bytecode_local: bool,
}

impl Node {
    pub fn new(kind: NodeKind) -> Node {
        Node {
            kind,
            region: Region::default(),
            scope: ScopeId::NULL,
            type_info: NodeId::NULL,
            resolved: NodeId::NULL,
            static_value: NodeId::NULL,
            local_offset: 0,
            is_local: false,
            is_bytecode_local: false,
        }
    }

    pub fn with_region(kind: NodeKind, region: Region) -> Node {
        let mut node = Node::new(kind);
        node.region = region;
        node
    }
}

/// Name-to-node bindings, insertion-ordered so variable dumps are stable.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    pub parent: ScopeId,
    pub symbols: Vec<(String, NodeId)>,
    pub is_function_scope: bool,
    pub fn_params: Vec<NodeId>,
    pub fn_return_type: NodeId,
}

#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<Node>,
    scopes: Vec<Scope>,
}

impl Arena {
    pub fn new() -> Arena {
        Arena::default()
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn alloc_kind(&mut self, kind: NodeKind) -> NodeId {
        self.alloc(Node::new(kind))
    }

    /// Shorthand for allocating a type node.
    pub fn alloc_type(&mut self, data: types::TypeData) -> NodeId {
        self.alloc(Node::new(NodeKind::Type(data)))
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Follows `resolved` links to the end of the chain. Chains in a
    /// well-formed arena are short; the bound exists to turn a resolution
    /// cycle into a loud failure instead of a hang. The null id resolves to
    /// itself.
    pub fn resolve(&self, id: NodeId) -> NodeId {
        if id.is_null() {
            return id;
        }
        let mut current = id;
        for _ in 0..1024 {
            let next = self.node(current).resolved;
            if next.is_null() {
                return current;
            }
            current = next;
        }
        panic!("resolution cycle at node {:?}", id);
    }

    pub fn push_scope(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(scope);
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    /// Binds `name` in `scope`.
    pub fn bind(&mut self, scope: ScopeId, name: &str, node: NodeId) {
        self.scope_mut(scope)
            .symbols
            .push((name.to_string(), node));
    }

    /// Looks `name` up through the scope chain.
    pub fn lookup(&self, mut scope: ScopeId, name: &str) -> Option<NodeId> {
        while !scope.is_null() {
            let s = self.scope(scope);
            if let Some((_, node)) = s.symbols.iter().find(|(n, _)| n == name) {
                return Some(*node);
            }
            scope = s.parent;
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scalar(arena: &mut Arena, kind: TypeKind) -> NodeId {
        arena.alloc_type(TypeData::scalar(kind))
    }

    fn param(arena: &mut Arena, name: &str, ty: NodeId, index: u32) -> NodeId {
        arena.alloc_kind(NodeKind::DeclParam {
            name: name.to_string(),
            param_type: ty,
            index,
        })
    }

    #[test]
    fn scalar_sizes() {
        let mut arena = Arena::new();
        let pairs = [
            (TypeKind::I8, 1),
            (TypeKind::U16, 2),
            (TypeKind::I32, 4),
            (TypeKind::F32, 4),
            (TypeKind::U64, 8),
            (TypeKind::F64, 8),
            (TypeKind::Boolean, 4),
            (TypeKind::Pointer, 8),
        ];
        for &(kind, size) in pairs.iter() {
            let ty = scalar(&mut arena, kind);
            assert_eq!(type_size(&arena, ty), size);
        }
    }

    #[test]
    fn struct_layout_aligns_fields() {
        let mut arena = Arena::new();
        let i8t = scalar(&mut arena, TypeKind::I8);
        let i32t = scalar(&mut arena, TypeKind::I32);
        let a = param(&mut arena, "a", i8t, 0);
        let b = param(&mut arena, "b", i32t, 1);
        let st = arena.alloc_type(TypeData::struct_of(vec![a, b]));

        assert_eq!(field_offset(&arena, st, 0), 0);
        assert_eq!(field_offset(&arena, st, 1), 4);
        assert_eq!(type_size(&arena, st), 8);
    }

    #[test]
    fn union_size_covers_widest_variant() {
        let mut arena = Arena::new();
        let i8t = scalar(&mut arena, TypeKind::I8);
        let f64t = scalar(&mut arena, TypeKind::F64);
        let a = param(&mut arena, "small", i8t, 0);
        let b = param(&mut arena, "wide", f64t, 1);
        let ut = arena.alloc_type(TypeData::union_of(vec![a, b]));

        assert_eq!(type_size(&arena, ut), 16);
        assert_eq!(field_offset(&arena, ut, 0), 8);
    }

    #[test]
    fn resolve_follows_chains() {
        let mut arena = Arena::new();
        let target = arena.alloc_kind(NodeKind::IntLiteral(7));
        let mid = arena.alloc_kind(NodeKind::Symbol("x".to_string()));
        let head = arena.alloc_kind(NodeKind::Symbol("y".to_string()));
        arena.node_mut(mid).resolved = target;
        arena.node_mut(head).resolved = mid;

        assert_eq!(arena.resolve(head), target);
        assert_eq!(arena.resolve(target), target);
    }

    #[test]
    fn scope_lookup_walks_parents() {
        let mut arena = Arena::new();
        let value = arena.alloc_kind(NodeKind::IntLiteral(1));
        let outer = arena.push_scope(Scope::default());
        let inner = arena.push_scope(Scope {
            parent: outer,
            ..Scope::default()
        });
        arena.bind(outer, "x", value);

        assert_eq!(arena.lookup(inner, "x"), Some(value));
        assert_eq!(arena.lookup(inner, "y"), None);
    }
}
