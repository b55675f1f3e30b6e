use crate::test::*;

#[test]
fn mul_i16() {
    let program = build(|w| {
        w.op(Opcode::MULI16).const_i16(-7).const_i16(6).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i16>(0), -42);
}

#[test]
fn mul_i32_wraps() {
    let program = build(|w| {
        w.op(Opcode::MULI32)
            .const_i32(0x4000_0000)
            .const_i32(4)
            .raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), 0x4000_0000i32.wrapping_mul(4));
}
