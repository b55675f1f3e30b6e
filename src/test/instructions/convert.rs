use crate::test::*;

use oast::TypeKind;

fn convert(w: &mut InstructionWriter, from: TypeKind, from_off: i64, to: TypeKind, to_off: i64) {
    w.op(Opcode::CONVERT)
        .raw_i32(from as i32)
        .raw_i64(from_off)
        .raw_i32(to as i32)
        .raw_i64(to_off);
}

#[test]
fn signed_widening_sign_extends() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).const_i32(-5);
        convert(w, TypeKind::I32, 0, TypeKind::I64, 8);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i64>(8), -5);
}

#[test]
fn unsigned_widening_zero_extends() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).const_i32(-1);
        convert(w, TypeKind::U32, 0, TypeKind::I64, 8);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i64>(8), 4_294_967_295);
}

#[test]
fn float_to_int_truncates_toward_zero() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).const_f64(-3.9);
        convert(w, TypeKind::F64, 0, TypeKind::I32, 8);
        w.op(Opcode::STORECONST).const_i64(16).const_f64(3.9);
        convert(w, TypeKind::F64, 16, TypeKind::I32, 12);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(8), -3);
    assert_eq!(interp.read_stack::<i32>(12), 3);
}

#[test]
fn int_to_float() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).const_i32(7);
        convert(w, TypeKind::I32, 0, TypeKind::F64, 8);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<f64>(8), 7.0);
}

#[test]
fn narrowing_truncates() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).const_i64(0x1_0000_002A);
        convert(w, TypeKind::I64, 0, TypeKind::I32, 8);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(8), 42);
}
