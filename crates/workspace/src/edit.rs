//! Incremental text edits as sent by an editor (`textDocument/didChange`).

use lsp_types::{Position, TextDocumentContentChangeEvent};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("no changes to apply")]
    NoChanges,
    #[error("unknown file {0}")]
    UnknownFile(String),
    #[error("invalid range: end {end_line}:{end_col} is before start {start_line}:{start_col}")]
    InvertedRange { start_line: u32, start_col: u32, end_line: u32, end_col: u32 },
}

/// Byte offset of an editor position. Columns count UTF-16 code units, the LSP default
/// encoding. Columns past the end of a line clamp to the line end, lines past the end of the
/// text clamp to the text end.
pub fn position_to_offset(text: &str, pos: Position) -> usize {
    let mut line_start = 0usize;
    for (i, line) in text.split_inclusive('\n').enumerate() {
        if i == pos.line as usize {
            let content = line.trim_end_matches('\n').trim_end_matches('\r');
            let mut units = 0usize;
            for (b, c) in content.char_indices() {
                if units >= pos.character as usize {
                    return line_start + b;
                }
                units += c.len_utf16();
            }
            return line_start + content.len();
        }
        line_start += line.len();
    }
    text.len()
}

/// Apply edits in order; each range is interpreted against the text produced by the previous
/// edit. An edit without a range replaces the whole text.
pub fn apply_changes(text: &str, changes: &[TextDocumentContentChangeEvent]) -> Result<String, UpdateError> {
    if changes.is_empty() {
        return Err(UpdateError::NoChanges);
    }
    let mut body = text.to_string();
    for change in changes {
        let Some(range) = change.range else {
            body = change.text.clone();
            continue;
        };
        let start = position_to_offset(&body, range.start);
        let end = position_to_offset(&body, range.end);
        if end < start {
            return Err(UpdateError::InvertedRange {
                start_line: range.start.line,
                start_col: range.start.character,
                end_line: range.end.line,
                end_col: range.end.character,
            });
        }
        body.replace_range(start..end, &change.text);
    }
    Ok(body)
}
