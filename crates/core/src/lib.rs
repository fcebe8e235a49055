//! xpkg core types: node identity, kind dispatch, validation issues.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod apis;
pub mod fieldpath;
pub mod kinds;

pub use kinds::ObjectKind;
pub use kube::core::GroupVersionKind as Gvk;

pub mod prelude {
    pub use super::{
        codes, gvk_from_type, gvk_key, Gvk, NodeId, ObjectKind, ValidationIssue, ValidationResult,
        Validator,
    };
}

/// Build a GVK from an `apiVersion` string (`group/version` or bare `version`) and a kind.
pub fn gvk_from_type(api_version: &str, kind: &str) -> Gvk {
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    Gvk { group, version, kind: kind.to_string() }
}

/// Render a GVK as `group/version/Kind` (or `version/Kind` for the core group).
pub fn gvk_key(gvk: &Gvk) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

/// The `apiVersion` string for a GVK.
pub fn api_version(gvk: &Gvk) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}

/// Read `apiVersion`/`kind` off a decoded object. `None` when either is missing.
pub fn type_of(obj: &serde_json::Value) -> Option<Gvk> {
    let api_version = obj.get("apiVersion")?.as_str()?;
    let kind = obj.get("kind")?.as_str()?;
    if api_version.is_empty() || kind.is_empty() {
        return None;
    }
    Some(gvk_from_type(api_version, kind))
}

/// `metadata.name` of a decoded object, empty when absent.
pub fn name_of(obj: &serde_json::Value) -> String {
    obj.get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Identity of a parsed node. Not unique for anonymous (unnamed) objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub name: String,
    pub gvk: Gvk,
}

impl NodeId {
    pub fn new(name: impl Into<String>, gvk: Gvk) -> Self {
        Self { name: name.into(), gvk }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{} (anonymous)", gvk_key(&self.gvk))
        } else {
            write!(f, "{} {}", gvk_key(&self.gvk), self.name)
        }
    }
}

/// Issue type codes. 100/500 are xpkg's own; the 6xx range mirrors OpenAPI validation failures.
pub mod codes {
    pub const WARNING: u32 = 100;
    pub const ERROR: u32 = 500;

    pub const INVALID_TYPE: u32 = 600;
    pub const REQUIRED: u32 = 601;
    pub const TOO_LONG: u32 = 602;
    pub const TOO_SHORT: u32 = 603;
    pub const PATTERN: u32 = 604;
    pub const ENUM: u32 = 605;
    pub const MULTIPLE_OF: u32 = 606;
    pub const MAX: u32 = 607;
    pub const MIN: u32 = 608;
    pub const UNIQUE: u32 = 609;
    pub const MAX_ITEMS: u32 = 610;
    pub const MIN_ITEMS: u32 = 611;
    pub const TOO_FEW_PROPERTIES: u32 = 613;
    pub const TOO_MANY_PROPERTIES: u32 = 614;
    pub const UNALLOWED_PROPERTY: u32 = 615;
}

/// One validation finding. `name` is a dotted field path (`spec.items[0].name`) used to
/// anchor the issue back to source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: u32,
    pub message: String,
    pub name: String,
}

impl ValidationIssue {
    pub fn new(code: u32, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code, name: name.into(), message: message.into() }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(codes::ERROR, name, message)
    }

    pub fn warning(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(codes::WARNING, name, message)
    }

    pub fn is_warning(&self) -> bool {
        self.code == codes::WARNING
    }

    pub fn is_required(&self) -> bool {
        self.code == codes::REQUIRED
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
    }
}

impl From<Vec<ValidationIssue>> for ValidationResult {
    fn from(errors: Vec<ValidationIssue>) -> Self {
        Self { errors }
    }
}

/// Validates a decoded object. Failing input is the common case and is reported as data.
pub trait Validator: Send + Sync {
    fn validate(&self, data: &serde_json::Value) -> ValidationResult;

    /// The JSON schema this validator checks against, when it is schema-backed.
    fn schema(&self) -> Option<&serde_json::Value> {
        None
    }
}
