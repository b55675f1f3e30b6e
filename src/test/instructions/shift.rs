use crate::test::*;

#[test]
fn shl_i32() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(8).const_i32(3);
        w.op(Opcode::STORECONST).const_i64(16).const_i64(4);
        w.op(Opcode::SHL)
            .raw_i32(4)
            .raw_i64(8)
            .raw_i64(16)
            .raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), 48);
}

#[test]
fn shr_is_logical() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(8).const_i8(-128);
        w.op(Opcode::STORECONST).const_i64(16).const_i64(1);
        w.op(Opcode::SHR)
            .raw_i32(1)
            .raw_i64(8)
            .raw_i64(16)
            .raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    // 0x80 >> 1 with zero fill
    assert_eq!(interp.read_stack::<u8>(0), 0x40);
}

#[test]
fn shift_past_width_clears() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(8).const_i8(1);
        w.op(Opcode::STORECONST).const_i64(16).const_i64(9);
        w.op(Opcode::SHL)
            .raw_i32(1)
            .raw_i64(8)
            .raw_i64(16)
            .raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i8>(0), 0);
}
