pub use super::*;

mod instructions;

/// Builds an instruction stream through the shared encoder.
pub fn build<F: FnOnce(&mut InstructionWriter)>(f: F) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut writer = InstructionWriter::new(&mut buf);
        f(&mut writer);
    }
    buf
}

pub fn run_instructions_e(instructions: Vec<u8>, expected: ExitCode) -> Interpreter {
    let mut interp = Interpreter::new();
    interp.load_program(Program::new(instructions));

    let code = interp.run();
    assert_eq!(code, expected);

    interp
}

pub fn run_instructions(instructions: Vec<u8>) -> Interpreter {
    run_instructions_e(instructions, ExitCode::Exited)
}

#[test]
fn wrapping_arithmetic() {
    let i = -20;

    let a = 20u32;
    let b = i as u32;
    let c = a.wrapping_add(b);

    assert_eq!(c, 0u32);
}

#[test]
fn empty_stream_exits() {
    let interp = run_instructions(Vec::new());
    assert_eq!(interp.sp, 0);
}

#[test]
fn integer_return() {
    // STORECONST CONSTI64 0 CONSTI32 42; EXIT leaves 42 at offset 0.
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).const_i32(42);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions(program);
    assert_eq!(interp.read_stack::<i32>(0), 42);
}

#[test]
fn puts_with_empty_string_is_harmless() {
    // a zeroed {data, count} header writes nothing
    let program = build(|w| {
        w.op(Opcode::STORECONST).const_i64(0).const_i64(0);
        w.op(Opcode::STORECONST).const_i64(8).const_i64(0);
        w.op(Opcode::PUTS).const_i64(0);
        w.op(Opcode::EXIT);
    });

    run_instructions(program);
}

#[test]
fn opcode_count_matches_last_discriminant() {
    assert_eq!(Opcode::COUNT, Opcode::RELF64 as usize + 1);
    assert!(Opcode::from_byte((Opcode::COUNT - 1) as u8).is_some());
    assert!(Opcode::from_byte(Opcode::COUNT as u8).is_none());
}
