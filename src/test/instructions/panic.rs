use crate::test::*;

#[test]
fn panic_terminates_nonzero() {
    let program = build(|w| {
        w.op(Opcode::PANIC);
        w.op(Opcode::STORECONST).const_i64(0).const_i32(1);
        w.op(Opcode::EXIT);
    });

    let interp = run_instructions_e(program, ExitCode::Panicked { line: 0, col: 0 });
    // nothing after the panic ran
    assert_eq!(interp.read_stack::<i32>(0), 0);
}

#[test]
fn exit_code_success_flag() {
    assert!(ExitCode::Exited.is_success());
    assert!(!ExitCode::Terminated.is_success());
    assert!(!ExitCode::Panicked { line: 1, col: 2 }.is_success());
}
