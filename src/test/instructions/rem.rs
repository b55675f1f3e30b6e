use crate::test::*;

#[test]
fn srem_keeps_dividend_sign() {
    let program = build(|w| {
        w.op(Opcode::SREMI32).const_i32(-7).const_i32(3).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), -1);
}

#[test]
fn urem_i64() {
    let program = build(|w| {
        w.op(Opcode::UREMI64).const_i64(10).const_i64(4).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<u64>(0), 2);
}

#[test]
fn rem_f64() {
    let program = build(|w| {
        w.op(Opcode::REMF64).const_f64(7.5).const_f64(2.0).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<f64>(0), 1.5);
}
