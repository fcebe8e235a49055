//! Version constraint matching for `dependsOn` entries.
//!
//! Constraints are either an exact version string or a semver range. A leading `v` is accepted
//! on versions and on range terms; terms separated by spaces or commas must all hold. A bare
//! version inside a range means that exact version.

use semver::{Version, VersionReq};

/// Whether any of `versions` satisfies `constraint`.
pub fn version_match(constraint: &str, versions: &[String]) -> bool {
    select_version(constraint, versions).is_some()
}

/// The version to use for `constraint`: an exact string match, otherwise the highest version
/// satisfying the range.
pub fn select_version<'a>(constraint: &str, versions: &'a [String]) -> Option<&'a str> {
    let constraint = constraint.trim();
    if let Some(exact) = versions.iter().find(|v| v.as_str() == constraint) {
        return Some(exact.as_str());
    }
    let req = parse_req(constraint)?;
    versions
        .iter()
        .filter_map(|raw| parse_version(raw).map(|v| (v, raw)))
        .filter(|(v, _)| req.matches(v))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, raw)| raw.as_str())
}

pub fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.trim().trim_start_matches('v')).ok()
}

fn parse_req(constraint: &str) -> Option<VersionReq> {
    let mut terms = Vec::new();
    let mut op = String::new();
    for tok in constraint.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
        let split = tok.find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^')).unwrap_or(tok.len());
        let (prefix, rest) = tok.split_at(split);
        op.push_str(prefix);
        if rest.is_empty() {
            // operator written apart from its version: `>= v1.0.0`
            continue;
        }
        let rest = rest.trim_start_matches('v');
        if op.is_empty() && rest.starts_with(|c: char| c.is_ascii_digit()) {
            op.push('=');
        }
        terms.push(format!("{op}{rest}"));
        op.clear();
    }
    if terms.is_empty() {
        return None;
    }
    VersionReq::parse(&terms.join(", ")).ok()
}
