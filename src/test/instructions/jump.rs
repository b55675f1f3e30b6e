use crate::test::*;

#[test]
fn skips_to_target() {
    let mut buf = Vec::new();
    {
        let mut w = InstructionWriter::new(&mut buf);
        w.op(Opcode::JUMP);
        let patch = w.pos();
        w.raw_i32(0);
        w.op(Opcode::STORECONST).const_i64(0).const_i32(1);
        let target = w.pos();
        w.op(Opcode::STORECONST).const_i64(4).const_i32(2);
        w.op(Opcode::EXIT);
        w.patch_i32(patch, target as i32);
    }

    let interp = run_instructions(buf);
    assert_eq!(interp.read_stack::<i32>(0), 0);
    assert_eq!(interp.read_stack::<i32>(4), 2);
}
