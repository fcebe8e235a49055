//! Dotted/bracketed field paths: `spec.resources[0].base`, `metadata.labels[app.kubernetes.io/name]`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

impl Segment {
    /// Index value of this segment; numeric fields (`items.0`) count as indices.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Field(f) => f.parse().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldPathError {
    #[error("unterminated '[' in field path {0:?}")]
    Unterminated(String),
    #[error("empty segment in field path {0:?}")]
    EmptySegment(String),
}

/// Parse a field path into segments. `""` and `"."` are the root (no segments).
pub fn parse(path: &str) -> Result<Vec<Segment>, FieldPathError> {
    let mut out = Vec::new();
    if path.is_empty() || path == "." {
        return Ok(out);
    }
    let mut cur = String::new();
    let mut chars = path.chars();
    // true right after a `]`, where a bare `.` or `[` may follow without a field name
    let mut after_bracket = false;
    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if cur.is_empty() {
                    if !after_bracket {
                        return Err(FieldPathError::EmptySegment(path.to_string()));
                    }
                } else {
                    out.push(Segment::Field(std::mem::take(&mut cur)));
                }
                after_bracket = false;
            }
            '[' => {
                if !cur.is_empty() {
                    out.push(Segment::Field(std::mem::take(&mut cur)));
                }
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err(FieldPathError::Unterminated(path.to_string()));
                }
                let inner = inner.trim_matches(|c| c == '"' || c == '\'');
                if inner.is_empty() {
                    return Err(FieldPathError::EmptySegment(path.to_string()));
                }
                match inner.parse::<usize>() {
                    Ok(i) => out.push(Segment::Index(i)),
                    Err(_) => out.push(Segment::Field(inner.to_string())),
                }
                after_bracket = true;
            }
            c => {
                cur.push(c);
                after_bracket = false;
            }
        }
    }
    if !cur.is_empty() {
        out.push(Segment::Field(cur));
    } else if !after_bracket {
        return Err(FieldPathError::EmptySegment(path.to_string()));
    }
    Ok(out)
}

/// Render segments back to a path: fields joined by `.`, indices as `[n]`.
pub fn render(segments: &[Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg {
            Segment::Field(f) if f.contains('.') => {
                out.push('[');
                out.push_str(f);
                out.push(']');
            }
            Segment::Field(f) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(f);
            }
            Segment::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Join a prefix path and a relative path.
pub fn join(prefix: &str, rest: &str) -> String {
    if prefix.is_empty() || prefix == "." {
        return rest.to_string();
    }
    if rest.is_empty() || rest == "." {
        return prefix.to_string();
    }
    if rest.starts_with('[') {
        format!("{prefix}{rest}")
    } else {
        format!("{prefix}.{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(s: &str) -> Segment {
        Segment::Field(s.to_string())
    }

    #[test]
    fn parses_fields_and_indices() {
        assert_eq!(
            parse("spec.resources[0].base").unwrap(),
            vec![field("spec"), field("resources"), Segment::Index(0), field("base")]
        );
        assert_eq!(
            parse("metadata.labels[app.kubernetes.io/name]").unwrap(),
            vec![field("metadata"), field("labels"), field("app.kubernetes.io/name")]
        );
        assert_eq!(parse("a[1][2]").unwrap(), vec![field("a"), Segment::Index(1), Segment::Index(2)]);
        assert_eq!(parse(".").unwrap(), vec![]);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(parse("spec..x").is_err());
        assert!(parse("spec[0").is_err());
        assert!(parse("spec.").is_err());
    }

    #[test]
    fn render_and_join() {
        let segs = parse("spec.items[3].name").unwrap();
        assert_eq!(render(&segs), "spec.items[3].name");
        assert_eq!(join("spec.resources[0].base", "spec.forProvider"), "spec.resources[0].base.spec.forProvider");
        assert_eq!(join("spec", "[2]"), "spec[2]");
        assert_eq!(join("", "kind"), "kind");
    }
}
