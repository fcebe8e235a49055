//! Positioned YAML syntax tree.
//!
//! Documents are parsed with `marked-yaml` and copied into a small owned tree whose positions
//! are absolute within the file (zero-based line/column), so sub-trees can be handed out as
//! `Arc<AstNode>` handles for embedded documents.

use std::sync::Arc;

use marked_yaml::types::{Marker, Node as MarkedNode, Span as MarkedSpan};
use xpkg_core::fieldpath::{self, Segment};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstEntry {
    pub key: String,
    pub key_span: Span,
    pub value: Arc<AstNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Mapping { span: Span, entries: Vec<AstEntry> },
    Sequence { span: Span, items: Vec<Arc<AstNode>> },
    Scalar { span: Span, value: String },
}

impl AstNode {
    pub fn span(&self) -> Span {
        match self {
            AstNode::Mapping { span, .. } | AstNode::Sequence { span, .. } | AstNode::Scalar { span, .. } => *span,
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, AstNode::Sequence { .. })
    }

    pub fn entry(&self, key: &str) -> Option<&AstEntry> {
        match self {
            AstNode::Mapping { entries, .. } => entries.iter().find(|e| e.key == key),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<AstNode>> {
        self.entry(key).map(|e| Arc::clone(&e.value))
    }

    pub fn item(&self, index: usize) -> Option<Arc<AstNode>> {
        match self {
            AstNode::Sequence { items, .. } => items.get(index).cloned(),
            _ => None,
        }
    }

    /// Span of the first token of this node: the first key of a mapping, the head of the first
    /// item of a sequence, or the scalar itself.
    pub fn head_span(&self) -> Span {
        match self {
            AstNode::Mapping { entries, span } => entries.first().map(|e| e.key_span).unwrap_or(*span),
            AstNode::Sequence { items, span } => items.first().map(|i| i.head_span()).unwrap_or(*span),
            AstNode::Scalar { span, .. } => *span,
        }
    }

    /// Follow parsed segments to a sub-tree.
    pub fn lookup(self: &Arc<Self>, segments: &[Segment]) -> Option<Arc<AstNode>> {
        let mut cur = Arc::clone(self);
        for seg in segments {
            let next = match (cur.as_ref(), seg) {
                (AstNode::Mapping { .. }, Segment::Field(f)) => cur.get(f),
                (AstNode::Mapping { .. }, Segment::Index(i)) => cur.get(&i.to_string()),
                (AstNode::Sequence { .. }, s) => s.as_index().and_then(|i| cur.item(i)),
                _ => None,
            }?;
            cur = next;
        }
        Some(cur)
    }

    /// Resolve a field path to the span of the token that names it: the key for mapping fields,
    /// the item head for sequence indices. `None` when any segment is missing.
    pub fn resolve(self: &Arc<Self>, path: &str) -> Option<Span> {
        let segments = fieldpath::parse(path).ok()?;
        let Some((last, parents)) = segments.split_last() else {
            return Some(self.head_span());
        };
        let parent = self.lookup(parents)?;
        match (parent.as_ref(), last) {
            (AstNode::Mapping { .. }, Segment::Field(f)) => parent.entry(f).map(|e| e.key_span),
            (AstNode::Mapping { .. }, Segment::Index(i)) => parent.entry(&i.to_string()).map(|e| e.key_span),
            (AstNode::Sequence { .. }, s) => s.as_index().and_then(|i| parent.item(i)).map(|n| n.head_span()),
            _ => None,
        }
    }
}

/// Parse one YAML document; positions are shifted by `line_offset` lines.
pub fn parse(text: &str, line_offset: u32) -> Result<Arc<AstNode>, String> {
    let node = marked_yaml::parse_yaml(0, text).map_err(|e| e.to_string())?;
    let ctx = Positions { lines: text.lines().collect(), line_offset };
    Ok(Arc::new(ctx.convert(&node)))
}

/// Maps marked-yaml markers (one-based, columns in chars) to zero-based positions whose
/// columns count UTF-16 code units.
struct Positions<'a> {
    lines: Vec<&'a str>,
    line_offset: u32,
}

impl Positions<'_> {
    fn utf16_column(&self, line: usize, chars: usize) -> u32 {
        let Some(text) = self.lines.get(line) else { return chars as u32 };
        let mut units = 0usize;
        let mut seen = 0usize;
        for c in text.chars().take(chars) {
            units += c.len_utf16();
            seen += 1;
        }
        (units + chars - seen) as u32
    }

    fn pos(&self, marker: Option<&Marker>) -> Pos {
        marker
            .map(|m| {
                let line = m.line().saturating_sub(1);
                Pos {
                    line: line as u32 + self.line_offset,
                    column: self.utf16_column(line, m.column().saturating_sub(1)),
                }
            })
            .unwrap_or_default()
    }

    fn node_span(&self, span: &MarkedSpan) -> Span {
        let start = self.pos(span.start());
        let end = span.end().map(|m| self.pos(Some(m))).unwrap_or(start);
        Span { start, end }
    }

    fn scalar_span(&self, span: &MarkedSpan, text: &str) -> Span {
        let start = self.pos(span.start());
        let width = text.lines().next().unwrap_or_default().encode_utf16().count() as u32;
        Span { start, end: Pos { line: start.line, column: start.column + width.max(1) } }
    }

    fn convert(&self, node: &MarkedNode) -> AstNode {
        match node {
            MarkedNode::Scalar(s) => AstNode::Scalar {
                span: self.scalar_span(s.span(), s.as_str()),
                value: s.as_str().to_string(),
            },
            MarkedNode::Mapping(m) => AstNode::Mapping {
                span: self.node_span(m.span()),
                entries: m
                    .iter()
                    .map(|(k, v)| AstEntry {
                        key: k.as_str().to_string(),
                        key_span: self.scalar_span(k.span(), k.as_str()),
                        value: Arc::new(self.convert(v)),
                    })
                    .collect(),
            },
            MarkedNode::Sequence(s) => AstNode::Sequence {
                span: self.node_span(s.span()),
                items: s.iter().map(|n| Arc::new(self.convert(n))).collect(),
            },
        }
    }
}

/// One YAML document inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDocument<'a> {
    pub text: &'a str,
    /// Zero-based line of the document's first line within the file.
    pub line_offset: u32,
}

fn is_separator(line: &str) -> bool {
    let t = line.trim_end();
    t == "---" || t.starts_with("--- ") || t.starts_with("---\t")
}

fn is_blank(text: &str) -> bool {
    text.lines().all(|l| {
        let t = l.trim();
        t.is_empty() || t.starts_with('#') || t == "..."
    })
}

/// Split a multi-document file on `---` lines. Empty and comment-only documents are dropped.
pub fn split_documents(body: &str) -> Vec<RawDocument<'_>> {
    let mut docs = Vec::new();
    let mut start = 0usize;
    let mut start_line = 0u32;
    let mut offset = 0usize;
    for (line_no, line) in body.split_inclusive('\n').enumerate() {
        if is_separator(line) {
            docs.push(RawDocument { text: &body[start..offset], line_offset: start_line });
            start = offset + line.len();
            start_line = line_no as u32 + 1;
        }
        offset += line.len();
    }
    docs.push(RawDocument { text: &body[start..], line_offset: start_line });
    docs.retain(|d| !is_blank(d.text));
    docs
}
