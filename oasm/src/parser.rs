use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "oasm.pest"]
pub struct OasmParser;
