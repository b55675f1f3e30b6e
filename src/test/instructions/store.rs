use crate::test::*;

#[test]
fn copies_bytes_between_offsets() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(16).const_i64(0x0102_0304_0506_0708);
        w.op(Opcode::STORE)
            .const_i64(0)
            .raw_i32(8)
            .const_i64(16);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i64>(0), 0x0102_0304_0506_0708);
}

#[test]
fn partial_width_copy() {
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(8).const_i32(-1);
        w.op(Opcode::STORECONST).const_i64(0).const_i64(0);
        w.op(Opcode::STORE).const_i64(0).raw_i32(2).const_i64(8);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<u16>(0), 0xFFFF);
    assert_eq!(interp.read_stack::<u16>(2), 0);
}

#[test]
fn store_through_pointer() {
    // Build a pointer to offset 32 at slot 8, then store through it using
    // the bare I64 marker, which dereferences the pointer slot.
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(8).rel(Opcode::RELI64, 32);
        w.op(Opcode::STORECONST).const_i64(16).const_i32(77);
        w.op(Opcode::STORE)
            .rel(Opcode::I64, 8)
            .raw_i32(4)
            .const_i64(16);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(32), 77);
}

#[test]
fn nil_destination_terminates() {
    // A zeroed slot read through I64 is a nil pointer; storing through it
    // reports the failure and stops the machine.
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(8).const_i64(0);
        w.op(Opcode::STORECONST).const_i64(16).const_i32(1);
        w.op(Opcode::STORE)
            .rel(Opcode::I64, 8)
            .raw_i32(4)
            .const_i64(16);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions_e(program, ExitCode::NilPointerStore { line: 0, col: 0 });
    assert_eq!(interp.read_stack::<i64>(8), 0);
}
