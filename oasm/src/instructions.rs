use matches::debug_assert_matches;
use pest::iterators::Pair;
use pest::Position;

use oast::{Location, NodeId, Region, SrcInfo};
use opalvm::{
    FnTable, InstructionWriter, Opcode, Program, Slot, SourceMap, SourceMapStatement,
};
use util::EnumFromStr;

use crate::parser::Rule;
use crate::{new_parser_error, Result};

fn location(pos: Position) -> Location {
    let (line, col) = pos.line_col();
    Location {
        line: (line - 1) as u64,
        col: (col - 1) as u64,
        byte: pos.pos(),
    }
}

/// The flat token stream; instruction processing pulls operand tokens off
/// it one mnemonic at a time.
struct Tokens<'i> {
    tokens: Vec<Pair<'i, Rule>>,
    pos: usize,
}

impl<'i> Tokens<'i> {
    fn next(&mut self) -> Option<Pair<'i, Rule>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// The next token, or a truncated-stream diagnostic anchored at the
    /// token that needed it.
    fn expect(&mut self, after: &Pair<'i, Rule>, what: &str) -> Result<Pair<'i, Rule>> {
        self.next().ok_or_else(|| {
            new_parser_error(
                after.as_span(),
                format!("Truncated operand stream: expected {}", what),
            )
        })
    }

    fn expect_int(&mut self, after: &Pair<'i, Rule>) -> Result<Pair<'i, Rule>> {
        let token = self.expect(after, "an integer literal")?;
        if token.as_rule() != Rule::int {
            return Err(new_parser_error(
                token.as_span(),
                "Expected an integer literal".to_owned(),
            ));
        }
        Ok(token)
    }
}

fn parse_i64(token: &Pair<Rule>) -> Result<i64> {
    token
        .as_str()
        .parse()
        .map_err(|err| new_parser_error(token.as_span(), format!("Parsing integer failed: {}", err)))
}

fn parse_int_in_range(token: &Pair<Rule>, min: i64, max: i64) -> Result<i64> {
    let value = parse_i64(token)?;
    if value < min || value > max {
        return Err(new_parser_error(
            token.as_span(),
            format!("Integer literal out of range [{}, {}]", min, max),
        ));
    }
    Ok(value)
}

fn parse_f64(token: &Pair<Rule>) -> Result<f64> {
    token
        .as_str()
        .parse()
        .map_err(|err| new_parser_error(token.as_span(), format!("Parsing float failed: {}", err)))
}

/// Encodes one operand payload at the width its prefix names. Float
/// prefixes accept integer literals; every other prefix requires one.
fn encode_payload<'i>(
    writer: &mut InstructionWriter,
    prefix: Opcode,
    tokens: &mut Tokens<'i>,
    after: &Pair<'i, Rule>,
) -> Result<Pair<'i, Rule>> {
    if prefix.is_float_const() {
        let token = tokens.expect(after, "a numeric literal")?;
        if token.as_rule() == Rule::word {
            return Err(new_parser_error(
                token.as_span(),
                "Expected a numeric literal".to_owned(),
            ));
        }
        let value = parse_f64(&token)?;
        match prefix {
            Opcode::CONSTF32 => writer.raw_f32(value as f32),
            _ => writer.raw_f64(value),
        };
        return Ok(token);
    }

    let token = tokens.expect_int(after)?;
    match prefix {
        Opcode::CONSTI8 => {
            writer.raw_i8(parse_int_in_range(&token, i64::from(i8::min_value()), i64::from(i8::max_value()))? as i8);
        }
        Opcode::CONSTI16 => {
            writer.raw_i16(parse_int_in_range(&token, i64::from(i16::min_value()), i64::from(i16::max_value()))? as i16);
        }
        Opcode::CONSTI32 => {
            writer.raw_i32(parse_int_in_range(&token, i64::from(i32::min_value()), i64::from(i32::max_value()))? as i32);
        }
        // CONSTI64 and every relative or marker form carry eight bytes.
        _ => {
            writer.raw_i64(parse_i64(&token)?);
        }
    }
    Ok(token)
}

fn process_typed_slot<'i>(
    writer: &mut InstructionWriter,
    tokens: &mut Tokens<'i>,
    after: &Pair<'i, Rule>,
) -> Result<Pair<'i, Rule>> {
    let prefix_token = tokens.expect(after, "an operand prefix")?;
    if prefix_token.as_rule() != Rule::word {
        return Err(new_parser_error(
            prefix_token.as_span(),
            "Expected an operand prefix".to_owned(),
        ));
    }

    let prefix = <Opcode as EnumFromStr>::from_str(prefix_token.as_str())
        .map_err(|err| new_parser_error(prefix_token.as_span(), format!("{}", err)))?;
    if !prefix.is_operand_prefix() {
        return Err(new_parser_error(
            prefix_token.as_span(),
            format!("{} cannot open an operand", prefix_token.as_str()),
        ));
    }

    writer.op(prefix);
    encode_payload(writer, prefix, tokens, &prefix_token)
}

pub fn process_program(pair: Pair<Rule>, src: SrcInfo) -> Result<Program> {
    debug_assert_matches!(pair.as_rule(), Rule::program);

    let token_pairs: Vec<Pair<Rule>> = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::token)
        .map(|p| p.into_inner().next().unwrap())
        .collect();
    let mut tokens = Tokens {
        tokens: token_pairs,
        pos: 0,
    };

    let mut instructions = Vec::new();
    let mut fn_table = FnTable::new();
    let mut source_map = SourceMap::new(src);

    while let Some(token) = tokens.next() {
        if token.as_rule() != Rule::word {
            return Err(new_parser_error(
                token.as_span(),
                "Expected a mnemonic".to_owned(),
            ));
        }

        if token.as_str() == "FN" {
            let id_token = tokens.expect_int(&token)?;
            let id = parse_int_in_range(&id_token, 0, i64::from(u32::max_value()))?;
            fn_table.insert(id as u32, instructions.len() as u64);
            continue;
        }

        let op = <Opcode as EnumFromStr>::from_str(token.as_str())
            .map_err(|err| new_parser_error(token.as_span(), format!("{}", err)))?;

        let inst_index = instructions.len() as u64;
        let start = location(token.as_span().start_pos());
        let mut end_token = token.clone();

        {
            let mut writer = InstructionWriter::new(&mut instructions);
            writer.op(op);

            if op.is_operand_prefix() {
                end_token = encode_payload(&mut writer, op, &mut tokens, &token)?;
            } else {
                for slot in op.layout() {
                    match slot {
                        Slot::RawI32 => {
                            let t = tokens.expect_int(&token)?;
                            writer.raw_i32(parse_int_in_range(
                                &t,
                                i64::from(i32::min_value()),
                                i64::from(i32::max_value()),
                            )? as i32);
                            end_token = t;
                        }
                        Slot::RawI64 => {
                            let t = tokens.expect_int(&token)?;
                            writer.raw_i64(parse_i64(&t)?);
                            end_token = t;
                        }
                        Slot::Typed | Slot::Imm => {
                            end_token = process_typed_slot(&mut writer, &mut tokens, &token)?;
                        }
                    }
                }
            }
        }

        source_map.push_statement(SourceMapStatement {
            inst_index,
            inst_end_index: instructions.len() as u64,
            region: Region::new(start, location(end_token.as_span().end_pos())),
            node: NodeId::NULL,
        });
    }

    Ok(Program {
        instructions,
        fn_table,
        source_map,
        external_fns: Vec::new(),
    })
}
