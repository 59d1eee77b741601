use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A position in a source file. Byte offset and column are canonical;
/// line is derived from the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePos {
    pub line: usize,
    pub col: usize,
    pub byte: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRange {
    pub filename: String,
    pub start: SourcePos,
    pub end: SourcePos,
}

impl SourceRange {
    pub fn contains(&self, byte: usize) -> bool {
        byte >= self.start.byte && byte < self.end.byte
    }
}

/// Byte-offset → line/column conversion for one source buffer
pub struct LineMap {
    line_starts: Vec<usize>,
}

impl LineMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset + 1);
            }
        }
        Self { line_starts }
    }

    pub fn pos(&self, byte: usize) -> SourcePos {
        let line_index = match self.line_starts.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        SourcePos {
            line: line_index + 1,
            col: byte - self.line_starts[line_index] + 1,
            byte,
        }
    }

    pub fn range(&self, filename: &str, span: std::ops::Range<usize>) -> SourceRange {
        SourceRange {
            filename: filename.to_string(),
            start: self.pos(span.start),
            end: self.pos(span.end),
        }
    }
}

/// Mapping from element full name to the source ranges it was parsed
/// from. An element fragmented across blocks or files has several ranges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMap {
    entries: HashMap<String, Vec<SourceRange>>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, full_name: impl Into<String>, range: SourceRange) {
        self.entries.entry(full_name.into()).or_default().push(range);
    }

    pub fn get(&self, full_name: &str) -> Option<&[SourceRange]> {
        self.entries.get(full_name).map(|v| v.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn merge(&mut self, other: SourceMap) {
        for (key, ranges) in other.entries {
            self.entries.entry(key).or_default().extend(ranges);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One `key = expression` entry inside a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: Expr,
    pub key_range: SourceRange,
    pub range: SourceRange,
}

/// A NaCl block: `WORD (WORD | STRING)* '{' items '}'`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The leading word; for fields and instances this is a type name,
    /// possibly with container syntax (`list<...>`)
    pub block_type: String,
    pub labels: Vec<String>,
    pub attrs: Vec<Attribute>,
    pub blocks: Vec<Block>,
    pub range: SourceRange,
    /// Range of the block type word alone, for targeted errors
    pub type_range: SourceRange,
}

/// Fragment of a quoted string: literal text or an interpolated reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplatePart {
    Literal(String),
    Reference(String),
}

/// Expression tree produced by the grammar, lowered to values later
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Quoted string, already split into template parts
    Str {
        parts: Vec<TemplatePart>,
        range: SourceRange,
    },
    /// Triple-quoted string, verbatim content
    Multiline { value: String, range: SourceRange },
    Number { value: f64, range: SourceRange },
    Bool { value: bool, range: SourceRange },
    List { items: Vec<Expr>, range: SourceRange },
    Object {
        attrs: Vec<Attribute>,
        range: SourceRange,
    },
    /// Dotted path to another element
    Reference { path: String, range: SourceRange },
    /// Function call, e.g. `file("logo.png")`
    Call {
        name: String,
        args: Vec<Expr>,
        range: SourceRange,
    },
    /// `*` wildcard; produced only in error-recovery mode
    Dynamic { range: SourceRange },
}

impl Expr {
    pub fn range(&self) -> &SourceRange {
        match self {
            Expr::Str { range, .. } => range,
            Expr::Multiline { range, .. } => range,
            Expr::Number { range, .. } => range,
            Expr::Bool { range, .. } => range,
            Expr::List { range, .. } => range,
            Expr::Object { range, .. } => range,
            Expr::Reference { range, .. } => range,
            Expr::Call { range, .. } => range,
            Expr::Dynamic { range } => range,
        }
    }
}
