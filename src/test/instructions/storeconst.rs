use crate::test::*;

#[test]
fn widths() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).const_i8(-5);
        w.op(Opcode::STORECONST).const_i64(2).const_i16(-300);
        w.op(Opcode::STORECONST).const_i64(4).const_i32(70_000);
        w.op(Opcode::STORECONST).const_i64(8).const_i64(1 << 40);
        w.op(Opcode::STORECONST).const_i64(16).const_f32(1.5);
        w.op(Opcode::STORECONST).const_i64(24).const_f64(-2.5);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i8>(0), -5);
    assert_eq!(interp.read_stack::<i16>(2), -300);
    assert_eq!(interp.read_stack::<i32>(4), 70_000);
    assert_eq!(interp.read_stack::<i64>(8), 1 << 40);
    assert_eq!(interp.read_stack::<f32>(16), 1.5);
    assert_eq!(interp.read_stack::<f64>(24), -2.5);
}

#[test]
fn relconst_immediate_stores_stack_offset() {
    // With bp = 0, a RELCONSTI64 24 immediate materializes offset 24.
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).relconst_i64(24);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i64>(0), 24);
}

#[test]
fn rel_immediate_stores_machine_address() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).rel(Opcode::RELI64, 24);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    let expected = interp.stack_base_addr() + 24;
    assert_eq!(interp.read_stack::<i64>(0), expected);
}

#[test]
fn relconst_destination() {
    // Destination through RELCONSTI64 resolves against bp (0 here).
    let program = build(|w| {
        w.op(Opcode::STORECONST).relconst_i64(12).const_i32(9);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(12), 9);
}
