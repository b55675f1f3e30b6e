use crate::test::*;

#[test]
fn and_or_xor_i32() {
    let program = build(|w| {
        w.op(Opcode::AND32)
            .const_i32(0b1100)
            .const_i32(0b1010)
            .raw_i64(0);
        w.op(Opcode::OR32)
            .const_i32(0b1100)
            .const_i32(0b1010)
            .raw_i64(4);
        w.op(Opcode::XOR32)
            .const_i32(0b1100)
            .const_i32(0b1010)
            .raw_i64(8);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), 0b1000);
    assert_eq!(interp.read_stack::<i32>(4), 0b1110);
    assert_eq!(interp.read_stack::<i32>(8), 0b0110);
}

#[test]
fn and_i8_width() {
    let program = build(|w| {
        w.op(Opcode::AND8).const_i8(0x7F).const_i8(0x0F).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i8>(0), 0x0F);
}

#[test]
fn xor_i64_rel_operands() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(8).const_i64(0xFF00);
        w.op(Opcode::STORECONST).const_i64(16).const_i64(0x0FF0);
        w.op(Opcode::XOR64)
            .rel(Opcode::RELI64, 8)
            .rel(Opcode::RELI64, 16)
            .raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i64>(0), 0xF0F0);
}
