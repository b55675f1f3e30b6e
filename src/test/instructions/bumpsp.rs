use crate::test::*;

#[test]
fn adjusts_stack_pointer_both_ways() {
    let program = build(|w| {
        w.op(Opcode::BUMPSP).raw_i32(32);
        w.op(Opcode::BUMPSP).raw_i32(-8);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.sp, 24);
}
