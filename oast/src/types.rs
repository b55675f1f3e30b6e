use num_derive::{FromPrimitive, ToPrimitive};

use crate::{Arena, NodeId, NodeKind};

/// Scalar and aggregate type kinds.
///
/// The discriminants are stable: `CONVERT` instructions carry them as raw
/// 32-bit tags, and the foreign-call bridge maps them onto ABI types.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum TypeKind {
    None,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Boolean,
    Pointer,
    Fn,
    Struct,
    Enum,
}

impl TypeKind {
    pub fn is_signed_int(self) -> bool {
        match self {
            TypeKind::I8 | TypeKind::I16 | TypeKind::I32 | TypeKind::I64 => true,
            _ => false,
        }
    }

    pub fn is_float(self) -> bool {
        match self {
            TypeKind::F32 | TypeKind::F64 => true,
            _ => false,
        }
    }
}

/// Full description of a type node.
///
/// Arrays and unions are structs in disguise: an array value is a
/// `{data: ptr, count: i64}` header and a union is a `{tag: i64, payload}`
/// pair, with the corresponding `secretly_*` flag set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TypeData {
    pub kind: Option<TypeKind>,
    /// Pointee for `Pointer`, element type for secret arrays, underlying
    /// scalar for `Enum`.
    pub inner: NodeId,
    /// Struct fields, enum variants or fn parameters, as `DeclParam` nodes.
    pub params: Vec<NodeId>,
    /// Return type for `Fn`.
    pub return_type: NodeId,
    pub secretly_array: bool,
    pub secretly_union: bool,
}

impl TypeData {
    pub fn scalar(kind: TypeKind) -> TypeData {
        TypeData {
            kind: Some(kind),
            ..TypeData::default()
        }
    }

    pub fn pointer(pointee: NodeId) -> TypeData {
        TypeData {
            kind: Some(TypeKind::Pointer),
            inner: pointee,
            ..TypeData::default()
        }
    }

    pub fn array_of(element: NodeId) -> TypeData {
        TypeData {
            kind: Some(TypeKind::Struct),
            inner: element,
            secretly_array: true,
            ..TypeData::default()
        }
    }

    pub fn struct_of(params: Vec<NodeId>) -> TypeData {
        TypeData {
            kind: Some(TypeKind::Struct),
            params,
            ..TypeData::default()
        }
    }

    pub fn union_of(params: Vec<NodeId>) -> TypeData {
        TypeData {
            kind: Some(TypeKind::Struct),
            params,
            secretly_union: true,
            ..TypeData::default()
        }
    }

    pub fn enum_of(base: NodeId, params: Vec<NodeId>) -> TypeData {
        TypeData {
            kind: Some(TypeKind::Enum),
            inner: base,
            params,
            ..TypeData::default()
        }
    }

    pub fn fn_of(params: Vec<NodeId>, return_type: NodeId) -> TypeData {
        TypeData {
            kind: Some(TypeKind::Fn),
            params,
            return_type,
            ..TypeData::default()
        }
    }

    pub fn kind(&self) -> TypeKind {
        self.kind.unwrap_or(TypeKind::None)
    }
}

fn align_up(offset: i64, align: i64) -> i64 {
    if align <= 0 {
        return offset;
    }
    (offset + align - 1) / align * align
}

/// Storage size of a type node, in bytes.
pub fn type_size(arena: &Arena, ty: NodeId) -> i64 {
    let ty = arena.resolve(ty);
    let data = arena.type_data(ty);

    match data.kind() {
        TypeKind::None => 0,
        TypeKind::I8 | TypeKind::U8 => 1,
        TypeKind::I16 | TypeKind::U16 => 2,
        TypeKind::I32 | TypeKind::U32 => 4,
        TypeKind::I64 | TypeKind::U64 => 8,
        TypeKind::F32 => 4,
        TypeKind::F64 => 8,
        // Booleans travel as 32-bit words, both on the stack and across the
        // foreign-call boundary.
        TypeKind::Boolean => 4,
        TypeKind::Pointer => 8,
        // Fn values hold a function-table id, widened so an indirect call
        // can read the slot as a full word.
        TypeKind::Fn => 8,
        TypeKind::Enum => type_size(arena, data.inner),
        TypeKind::Struct => {
            if data.secretly_array {
                // {data: ptr, count: i64}
                16
            } else if data.secretly_union {
                // {tag: i64, payload}: the payload region fits the widest
                // variant.
                let widest = data
                    .params
                    .iter()
                    .map(|&p| type_size(arena, arena.param_type(p)))
                    .max()
                    .unwrap_or(0);
                8 + widest
            } else {
                let mut size = 0;
                for &param in &data.params {
                    let pt = arena.param_type(param);
                    size = align_up(size, type_align(arena, pt));
                    size += type_size(arena, pt);
                }
                size
            }
        }
    }
}

pub fn type_align(arena: &Arena, ty: NodeId) -> i64 {
    let ty = arena.resolve(ty);
    let data = arena.type_data(ty);

    match data.kind() {
        TypeKind::Struct => 8,
        TypeKind::Enum => type_align(arena, data.inner),
        _ => type_size(arena, ty),
    }
}

/// Byte offset of field `index` within a plain struct. The debugger's
/// variable printer and the emitter's field access agree through this one
/// function.
pub fn field_offset(arena: &Arena, ty: NodeId, index: usize) -> i64 {
    let ty = arena.resolve(ty);
    let data = arena.type_data(ty).clone();
    assert!(!data.secretly_array);

    if data.secretly_union {
        // Payload always sits just past the tag.
        return 8;
    }

    let mut offset = 0;
    for (i, &param) in data.params.iter().enumerate() {
        let pt = arena.param_type(param);
        offset = align_up(offset, type_align(arena, pt));
        if i == index {
            return offset;
        }
        offset += type_size(arena, pt);
    }

    panic!("field index {} out of range", index);
}

impl Arena {
    /// The `TypeData` of a type node. Panics on non-type nodes: callers are
    /// expected to `resolve` first.
    pub fn type_data(&self, id: NodeId) -> &TypeData {
        match &self.node(id).kind {
            NodeKind::Type(data) => data,
            other => panic!("expected a type node, found {:?}", other),
        }
    }

    /// The declared type of a `DeclParam` node.
    pub fn param_type(&self, id: NodeId) -> NodeId {
        match &self.node(id).kind {
            NodeKind::DeclParam { param_type, .. } => *param_type,
            other => panic!("expected a param node, found {:?}", other),
        }
    }

    pub fn param_name(&self, id: NodeId) -> &str {
        match &self.node(id).kind {
            NodeKind::DeclParam { name, .. } => name,
            other => panic!("expected a param node, found {:?}", other),
        }
    }
}
