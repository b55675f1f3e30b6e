//! Assembler for the [opalvm](../opalvm/index.html) bytecode machine.
//!
//! [`assemble`] accepts a program in the textual bytecode format and
//! produces the same triple the bytecode emitter does: instruction bytes, a
//! function table and a source map, packed into an
//! [`opalvm::Program`](../opalvm/struct.Program.html) (with no external
//! functions — foreign call sites only come out of the compiler).
//!
//! The grammar is line-agnostic: tokens are whitespace-separated, comments
//! run from `--` to end of line, and numeric literals are decimal integers
//! or decimal floats distinguished by the presence of `.`. Mnemonics are
//! exactly the [`Opcode`](../opalvm/enum.Opcode.html) variant names; each
//! mnemonic consumes the operand tokens its layout calls for. Typed
//! operands are written as their operand-prefix mnemonic followed by the
//! literal (`CONSTI32 -42`, `RELI64 16`), raw fields as bare integers.
//!
//! Two directives extend the instruction mnemonics:
//!
//! - `FN <id>` records the current instruction index in the function table
//!   and emits no bytes. The disassembler prints the same directive, so
//!   dumps round-trip including their function tables.
//! - A bare operand prefix (`CONSTI32 7`) emits its own byte and payload,
//!   matching what the mnemonic printer produces for operand positions.
//!
//! Tokenizing is implemented with [pest]; the crate's [`Error`] is a type
//! alias of `pest::error::Error`, so failed assemblies come with span
//! diagnostics pointing at the offending token.
//!
//! [pest]: https://docs.rs/pest/

mod instructions;
mod parser;


use pest::iterators::Pair;
use pest::{Parser, Span};

use oast::SrcInfo;
use opalvm::Program;
use parser::{OasmParser, Rule};

pub type Error = pest::error::Error<Rule>;

pub type Result<T> = std::result::Result<T, Error>;

/// Assembles `input`, recording `file_name` in the source map so the
/// debugger can place breakpoints by file and line.
pub fn assemble_named(file_name: &str, input: &str) -> Result<Program> {
    instructions::process_program(parse(input)?, SrcInfo::new(file_name, input))
}

pub fn assemble(input: &str) -> Result<Program> {
    instructions::process_program(parse(input)?, SrcInfo::anonymous(input))
}

fn new_parser_error(span: Span, message: String) -> Error {
    Error::new_from_span(pest::error::ErrorVariant::CustomError { message }, span)
}

fn parse(input: &str) -> Result<Pair<Rule>> {
    Ok(OasmParser::parse(Rule::program, input)?.next().unwrap())
}
