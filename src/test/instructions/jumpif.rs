use crate::test::*;

fn branch_program(cond: i32) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut w = InstructionWriter::new(&mut buf);
        w.op(Opcode::JUMPIF).const_i32(cond);
        let true_patch = w.pos() + 1;
        w.const_i32(0);
        let false_patch = w.pos() + 1;
        w.const_i32(0);

        let true_target = w.pos();
        w.op(Opcode::STORECONST).const_i64(0).const_i32(1);
        w.op(Opcode::EXIT);
        let false_target = w.pos();
        w.op(Opcode::STORECONST).const_i64(0).const_i32(2);
        w.op(Opcode::EXIT);

        w.patch_i32(true_patch, true_target as i32);
        w.patch_i32(false_patch, false_target as i32);
    }
    buf
}

#[test]
fn condition_one_takes_true_target() {
    let interp = run_instructions(branch_program(1));
    assert_eq!(interp.read_stack::<i32>(0), 1);
}

#[test]
fn condition_zero_takes_false_target() {
    let interp = run_instructions(branch_program(0));
    assert_eq!(interp.read_stack::<i32>(0), 2);
}

#[test]
fn sum_loop_one_to_ten() {
    // sum at 0, i at 4, condition word at 16
    let mut buf = Vec::new();
    {
        let mut w = InstructionWriter::new(&mut buf);
        w.op(Opcode::STORECONST).const_i64(0).const_i32(0);
        w.op(Opcode::STORECONST).const_i64(4).const_i32(1);

        let loop_start = w.pos();
        w.op(Opcode::SLEI32)
            .rel(Opcode::RELI32, 4)
            .const_i32(10)
            .raw_i64(16);
        w.op(Opcode::JUMPIF).rel(Opcode::RELI32, 16);
        let body_patch = w.pos() + 1;
        w.const_i32(0);
        let end_patch = w.pos() + 1;
        w.const_i32(0);

        let body = w.pos();
        w.op(Opcode::ADDI32)
            .rel(Opcode::RELI32, 0)
            .rel(Opcode::RELI32, 4)
            .raw_i64(0);
        w.op(Opcode::ADDI32)
            .rel(Opcode::RELI32, 4)
            .const_i32(1)
            .raw_i64(4);
        w.op(Opcode::JUMP).raw_i32(loop_start as i32);

        let end = w.pos();
        w.op(Opcode::EXIT);

        w.patch_i32(body_patch, body as i32);
        w.patch_i32(end_patch, end as i32);
    }

    let interp = run_instructions(buf);
    assert_eq!(interp.read_stack::<i32>(0), 55);
    assert_eq!(interp.read_stack::<i32>(4), 11);
}
