use crate::test::*;

#[test]
fn sub_i32() {
    let program = build(|w| {
        w.op(Opcode::SUBI32).const_i32(10).const_i32(14).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), -4);
}

#[test]
fn sub_f32() {
    let program = build(|w| {
        w.op(Opcode::SUBF32).const_f32(5.5).const_f32(2.0).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<f32>(0), 3.5);
}
