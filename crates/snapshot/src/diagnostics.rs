//! Project validation issues onto source positions as editor diagnostics.

use std::sync::Arc;

use lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Position, Range};
use xpkg_core::{codes, ValidationIssue};
use xpkg_workspace::{AstNode, Span};

pub const SOURCE: &str = "xpkg";

/// Path an issue is anchored at. Required issues name the missing child, which has no source
/// position, so they point at the parent instead.
pub fn anchor_path(issue: &ValidationIssue) -> &str {
    if issue.is_required() {
        issue.name.rsplit_once('.').map(|(parent, _)| parent).unwrap_or("")
    } else {
        &issue.name
    }
}

fn to_range(span: Span) -> Range {
    Range::new(
        Position::new(span.start.line, span.start.column),
        Position::new(span.end.line, span.end.column),
    )
}

pub fn severity(code: u32) -> DiagnosticSeverity {
    if code == codes::WARNING {
        DiagnosticSeverity::WARNING
    } else {
        DiagnosticSeverity::ERROR
    }
}

/// Diagnostics for the issues of one node. Issues about the whole object (`"."`) and issues
/// whose path is not present in the source are dropped.
pub fn project(ast: &Arc<AstNode>, issues: &[ValidationIssue]) -> Vec<Diagnostic> {
    issues
        .iter()
        .filter(|issue| issue.name != ".")
        .filter_map(|issue| {
            let span = ast.resolve(anchor_path(issue))?;
            Some(Diagnostic {
                range: to_range(span),
                severity: Some(severity(issue.code)),
                code: Some(NumberOrString::Number(issue.code as i32)),
                source: Some(SOURCE.to_string()),
                message: issue.message.clone(),
                ..Default::default()
            })
        })
        .collect()
}
