use oast::{NodeId, Region, SrcInfo};

/// One statement's worth of instructions: the half-open byte range
/// `[inst_index, inst_end_index)` in the instruction stream, the source
/// region it came from, and the AST node it was emitted for.
///
/// Statements produced by the assembler have no AST behind them and carry
/// `NodeId::NULL`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceMapStatement {
    pub inst_index: u64,
    pub inst_end_index: u64,
    pub region: Region,
    pub node: NodeId,
}

/// Ordered statement records over one source buffer. The list is monotone
/// nondecreasing in instruction index, with no overlaps.
#[derive(Clone, Debug, Default)]
pub struct SourceMap {
    pub source_info: SrcInfo,
    pub statements: Vec<SourceMapStatement>,
}

impl SourceMap {
    pub fn new(source_info: SrcInfo) -> SourceMap {
        SourceMap {
            source_info,
            statements: Vec::new(),
        }
    }

    pub fn push_statement(&mut self, stmt: SourceMapStatement) {
        if let Some(last) = self.statements.last() {
            debug_assert!(last.inst_end_index <= stmt.inst_index);
        }
        self.statements.push(stmt);
    }

    /// The statement whose instruction range begins exactly at `pc`. This is
    /// the debugger's "pc begins a mapped statement" test.
    pub fn statement_starting_at(&self, pc: u64) -> Option<&SourceMapStatement> {
        self.statements.iter().find(|s| s.inst_index == pc)
    }

    /// The statement whose range contains `pc`.
    pub fn statement_covering(&self, pc: u64) -> Option<&SourceMapStatement> {
        self.statements
            .iter()
            .find(|s| s.inst_index <= pc && pc < s.inst_end_index)
    }

    /// The first statement on `line` of `file`, for breakpoint placement.
    pub fn statement_on_line(&self, line: u64, file: &str) -> Option<&SourceMapStatement> {
        let matches_file = match &self.source_info.file_name {
            Some(name) => name == file,
            None => false,
        };
        if !matches_file {
            return None;
        }
        self.statements.iter().find(|s| s.region.start.line == line)
    }

    /// The statement's text, sliced from the stored source.
    pub fn statement_text(&self, stmt: &SourceMapStatement) -> &str {
        stmt.region.text(&self.source_info.source)
    }
}
