use crate::test::*;

#[test]
fn not_inverts_word_in_place() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).const_i32(1);
        w.op(Opcode::NOT).raw_i64(0);
        w.op(Opcode::STORECONST).const_i64(4).const_i32(0);
        w.op(Opcode::NOT).raw_i64(4);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), 0);
    assert_eq!(interp.read_stack::<i32>(4), 1);
}

#[test]
fn bitnot_complements_bytes() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).const_i32(0);
        w.op(Opcode::BITNOT).raw_i32(4).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<u32>(0), 0xFFFF_FFFF);
}
