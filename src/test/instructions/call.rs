use crate::test::*;

/// Emits the full call sequence for `f(3, 4)` with the result copied into
/// the caller's local at offset 8, then `f` itself.
fn call_program() -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut w = InstructionWriter::new(&mut buf);

        // caller frame: 16 bytes (result local at 8, sentinel at 12)
        w.op(Opcode::BUMPSP).raw_i32(16);
        w.op(Opcode::STORECONST).const_i64(12).const_i32(99);

        // arguments land at the frame top, first argument nearest the
        // callee's saved registers
        w.op(Opcode::STORECONST).const_i64(20).const_i32(3);
        w.op(Opcode::STORECONST).const_i64(16).const_i32(4);
        w.op(Opcode::BUMPSP).raw_i32(8);

        let call_patch = w.pos() + 1;
        w.op(Opcode::CALL).raw_i32(0);

        // return value sits one word past the callee's saved registers
        w.op(Opcode::STORE)
            .relconst_i64(8)
            .raw_i32(4)
            .const_i64(32);
        w.op(Opcode::BUMPSP).raw_i32(-8);
        w.op(Opcode::EXIT);

        // f(a, b) = a + b; a at bp-12, b at bp-16
        let entry = w.pos();
        w.op(Opcode::BUMPSP).raw_i32(4);
        w.op(Opcode::ADDI32)
            .rel(Opcode::RELI32, -12)
            .rel(Opcode::RELI32, -16)
            .raw_i64(0);
        w.op(Opcode::RET);

        w.patch_i32(call_patch, entry as i32);
    }
    buf
}

#[test]
fn direct_call_returns_sum() {
    let interp = run_instructions(call_program());
    assert_eq!(interp.read_stack::<i32>(8), 7);
}

#[test]
fn frame_restored_after_return() {
    let program = call_program();

    let interp = run_instructions(program);
    // The caller's sp and locals are exactly what they were before the
    // call sequence; nothing the callee wrote is reachable.
    assert_eq!(interp.sp, 16);
    assert_eq!(interp.bp, 0);
    assert_eq!(interp.depth, 0);
    assert_eq!(interp.read_stack::<i32>(12), 99);
}

#[test]
fn indirect_call_through_fn_table() {
    let mut buf = Vec::new();
    let entry;
    {
        let mut w = InstructionWriter::new(&mut buf);
        w.op(Opcode::BUMPSP).raw_i32(8);
        w.op(Opcode::CALLI).const_i64(3);
        w.op(Opcode::STORE)
            .relconst_i64(0)
            .raw_i32(4)
            .const_i64(16);
        w.op(Opcode::EXIT);

        entry = w.pos();
        w.op(Opcode::BUMPSP).raw_i32(4);
        w.op(Opcode::STORECONST).relconst_i64(0).const_i32(21);
        w.op(Opcode::RET);
    }

    let mut program = Program::new(buf);
    program.fn_table.insert(3, entry);

    let mut interp = Interpreter::new();
    interp.load_program(program);
    assert_eq!(interp.run(), ExitCode::Exited);
    assert_eq!(interp.read_stack::<i32>(0), 21);
}
