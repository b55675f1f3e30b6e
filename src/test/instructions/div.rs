use crate::test::*;

#[test]
fn sdiv_rounds_toward_zero() {
    let program = build(|w| {
        w.op(Opcode::SDIVI32).const_i32(-7).const_i32(2).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), -3);
}

#[test]
fn udiv_treats_operands_unsigned() {
    // -2 as u8 is 254; 254 / 3 = 84.
    let program = build(|w| {
        w.op(Opcode::UDIVI8).const_i8(-2).const_i8(3).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<u8>(0), 84);
}

#[test]
fn div_f32() {
    let program = build(|w| {
        w.op(Opcode::DIVF32).const_f32(7.0).const_f32(2.0).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<f32>(0), 3.5);
}
