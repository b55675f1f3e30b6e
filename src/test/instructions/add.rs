use crate::test::*;

#[test]
fn add_i32_constants() {
    let program = build(|w| {
        w.op(Opcode::ADDI32).const_i32(3).const_i32(4).raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), 7);
}

#[test]
fn add_i32_wraps_at_min() {
    let program = build(|w| {
        w.op(Opcode::ADDI32)
            .const_i32(i32::min_value())
            .const_i32(-1)
            .raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), i32::max_value());
}

#[test]
fn add_i32_rel_operand() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(8).const_i32(41);
        w.op(Opcode::ADDI32)
            .rel(Opcode::RELI32, 8)
            .const_i32(1)
            .raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), 42);
}

#[test]
fn add_i8_and_i64_widths() {
    let program = build(|w| {
        w.op(Opcode::ADDI8).const_i8(100).const_i8(27).raw_i64(0);
        w.op(Opcode::ADDI64)
            .const_i64(1 << 40)
            .const_i64(1)
            .raw_i64(8);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i8>(0), 100i8.wrapping_add(27));
    assert_eq!(interp.read_stack::<i64>(8), (1i64 << 40) + 1);
}

#[test]
fn add_f64_constants() {
    let program = build(|w| {
        w.op(Opcode::ADDF64)
            .const_f64(1.5)
            .const_f64(2.25)
            .raw_i64(0);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<f64>(0), 3.75);
}
