use crate::test::*;

#[test]
fn eq_and_neq_store_word_flags() {
    let program = build(|w| {
        w.op(Opcode::EQI32).const_i32(5).const_i32(5).raw_i64(0);
        w.op(Opcode::NEQI32).const_i32(5).const_i32(5).raw_i64(4);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), 1);
    assert_eq!(interp.read_stack::<i32>(4), 0);
}

#[test]
fn signed_vs_unsigned_less_than() {
    // As i8, -1 < 1. As u8, -1 reads as 255 and is not < 1.
    let program = build(|w| {
        w.op(Opcode::SLTI8).const_i8(-1).const_i8(1).raw_i64(0);
        w.op(Opcode::ULTI8).const_i8(-1).const_i8(1).raw_i64(4);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), 1);
    assert_eq!(interp.read_stack::<i32>(4), 0);
}

#[test]
fn ordered_comparisons_i64() {
    let program = build(|w| {
        w.op(Opcode::SGEI64).const_i64(7).const_i64(7).raw_i64(0);
        w.op(Opcode::SGTI64).const_i64(7).const_i64(7).raw_i64(4);
        w.op(Opcode::SLEI64).const_i64(-2).const_i64(7).raw_i64(8);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), 1);
    assert_eq!(interp.read_stack::<i32>(4), 0);
    assert_eq!(interp.read_stack::<i32>(8), 1);
}

#[test]
fn float_comparisons() {
    let program = build(|w| {
        w.op(Opcode::LTF64).const_f64(1.5).const_f64(2.5).raw_i64(0);
        w.op(Opcode::GEF32).const_f32(2.0).const_f32(2.0).raw_i64(4);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), 1);
    assert_eq!(interp.read_stack::<i32>(4), 1);
}
