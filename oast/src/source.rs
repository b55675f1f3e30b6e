/// A loaded source buffer plus the name it was loaded from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SrcInfo {
    pub file_name: Option<String>,
    pub source: String,
}

impl SrcInfo {
    pub fn new<N: Into<String>, S: Into<String>>(file_name: N, source: S) -> SrcInfo {
        SrcInfo {
            file_name: Some(file_name.into()),
            source: source.into(),
        }
    }

    pub fn anonymous<S: Into<String>>(source: S) -> SrcInfo {
        SrcInfo {
            file_name: None,
            source: source.into(),
        }
    }
}

/// A position in a source buffer. Lines and columns are zero-based, matching
/// what the debugger protocol reports.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Location {
    pub line: u64,
    pub col: u64,
    pub byte: usize,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Region {
    pub start: Location,
    pub end: Location,
}

impl Region {
    pub fn new(start: Location, end: Location) -> Region {
        Region { start, end }
    }

    /// The region's text, sliced out of `src`.
    pub fn text<'s>(&self, src: &'s str) -> &'s str {
        &src[self.start.byte..self.end.byte]
    }
}
