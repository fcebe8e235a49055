//! xpkg workspace: parse a package directory into addressable, positioned nodes.
//!
//! A [`Parser`] walks every `*.yaml` file under a root and produces a [`View`]: nodes keyed by
//! `(name, GVK)`, per-file details, example objects, the package meta and the XRD claim index.
//! Composition templates are parsed as nodes of their own, sharing the Composition's AST.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use lsp_types::TextDocumentContentChangeEvent;
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use xpkg_core::apis::{CompositeResourceDefinition, Composition};
use xpkg_core::fieldpath::{self, Segment};
use xpkg_core::prelude::*;
use xpkg_core::{name_of, type_of};

pub mod ast;
pub mod edit;
pub mod meta;

pub use ast::{AstNode, Pos, Span};
pub use edit::UpdateError;
pub use meta::PackageMeta;

static SPEC_RESOURCES: Lazy<Vec<Segment>> =
    Lazy::new(|| fieldpath::parse("spec.resources").unwrap_or_default());

fn max_yaml_bytes() -> u64 {
    std::env::var("XPKG_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(4 * 1024 * 1024) // 4 MiB default
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("workspace root {path}: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("workspace root {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("{0}: spec.resources of a Composition must be a sequence")]
    MalformedComposition(PathBuf),
    #[error("{second}: package meta already defined in {first}")]
    MultipleMeta { first: PathBuf, second: PathBuf },
    #[error("unknown file {0}")]
    UnknownFile(PathBuf),
    #[error("decoding {kind}: {message}")]
    Decode { kind: String, message: String },
}

impl ParseError {
    /// Whether the error aborts the parse. Document-level decode errors are skipped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ParseError::Decode { .. })
    }
}

/// A decoded object found in the workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub file: PathBuf,
    /// Syntax tree of the document (or embedded sub-document). `None` when the positioned
    /// parse failed even though the document decoded.
    pub ast: Option<Arc<AstNode>>,
    pub object: Value,
}

impl Node {
    pub fn gvk(&self) -> &Gvk {
        &self.id.gvk
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDetails {
    pub body: String,
    /// Top-level nodes in document order. Embedded composition templates are not listed.
    pub node_ids: Vec<NodeId>,
}

/// Parsed projection of one workspace directory.
#[derive(Debug, Default)]
pub struct View {
    root: PathBuf,
    nodes: HashMap<NodeId, Node>,
    files: HashMap<PathBuf, FileDetails>,
    examples: HashMap<Gvk, Vec<Node>>,
    meta: Option<PackageMeta>,
    meta_location: Option<PathBuf>,
    meta_file: Option<PathBuf>,
    xr_claim_refs: HashMap<Gvk, Gvk>,
    claim_ref_sources: HashMap<Gvk, PathBuf>,
}

impl View {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), ..Default::default() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn nodes(&self) -> &HashMap<NodeId, Node> {
        &self.nodes
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn files(&self) -> &HashMap<PathBuf, FileDetails> {
        &self.files
    }

    pub fn file(&self, path: &Path) -> Option<&FileDetails> {
        self.files.get(path)
    }

    /// Example objects of a kind, in encounter order.
    pub fn examples(&self, gvk: &Gvk) -> &[Node] {
        self.examples.get(gvk).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn meta(&self) -> Option<&PackageMeta> {
        self.meta.as_ref()
    }

    /// Directory holding the package meta file.
    pub fn meta_location(&self) -> Option<&Path> {
        self.meta_location.as_deref()
    }

    pub fn meta_file(&self) -> Option<&Path> {
        self.meta_file.as_deref()
    }

    /// Composite GVK to Claim GVK, from every decoded XRD.
    pub fn xr_claim_refs(&self) -> &HashMap<Gvk, Gvk> {
        &self.xr_claim_refs
    }

    /// Add a file body without parsing it.
    pub fn insert_file(&mut self, path: impl Into<PathBuf>, body: String) {
        self.files.insert(path.into(), FileDetails { body, node_ids: Vec::new() });
    }

    /// Parse a file again from its in-memory body, replacing everything it contributed.
    pub fn reparse_file(&mut self, path: &Path) -> Result<(), ParseError> {
        if !self.files.contains_key(path) {
            return Err(ParseError::UnknownFile(path.to_path_buf()));
        }
        self.forget_file(path);
        self.parse_file(path)
    }

    /// Apply editor changes to a file body. The file is not re-parsed.
    pub fn update_content(
        &mut self,
        path: &Path,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Result<(), UpdateError> {
        if changes.is_empty() {
            return Err(UpdateError::NoChanges);
        }
        let details = self
            .files
            .get_mut(path)
            .ok_or_else(|| UpdateError::UnknownFile(path.display().to_string()))?;
        details.body = edit::apply_changes(&details.body, changes)?;
        Ok(())
    }

    fn forget_file(&mut self, path: &Path) {
        self.nodes.retain(|_, n| n.file != path);
        for list in self.examples.values_mut() {
            list.retain(|n| n.file != path);
        }
        self.examples.retain(|_, list| !list.is_empty());
        let stale: Vec<Gvk> = self
            .claim_ref_sources
            .iter()
            .filter(|(_, f)| f.as_path() == path)
            .map(|(g, _)| g.clone())
            .collect();
        for gvk in stale {
            self.claim_ref_sources.remove(&gvk);
            self.xr_claim_refs.remove(&gvk);
        }
        if self.meta_file.as_deref() == Some(path) {
            self.meta = None;
            self.meta_location = None;
            self.meta_file = None;
        }
        if let Some(details) = self.files.get_mut(path) {
            details.node_ids.clear();
        }
    }

    fn parse_file(&mut self, path: &Path) -> Result<(), ParseError> {
        let body = match self.files.get(path) {
            Some(d) => d.body.clone(),
            None => return Err(ParseError::UnknownFile(path.to_path_buf())),
        };
        for doc in ast::split_documents(&body) {
            counter!("xpkg_parse_documents_total", 1u64);
            let object = match decode(doc.text) {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    counter!("xpkg_parse_document_errors_total", 1u64);
                    debug!(file = %path.display(), line = doc.line_offset, error = %e, "skipping undecodable document");
                    continue;
                }
            };
            let tree = match ast::parse(doc.text, doc.line_offset) {
                Ok(t) => Some(t),
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "no positions for document");
                    None
                }
            };
            match self.add_document(path, object, tree, true) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    counter!("xpkg_parse_document_errors_total", 1u64);
                    debug!(file = %path.display(), error = %e, "skipping document");
                }
            }
        }
        Ok(())
    }

    fn add_document(
        &mut self,
        file: &Path,
        object: Value,
        tree: Option<Arc<AstNode>>,
        top_level: bool,
    ) -> Result<(), ParseError> {
        let gvk = type_of(&object)
            .ok_or_else(|| ParseError::Decode { kind: "object".into(), message: "missing apiVersion or kind".into() })?;
        let id = NodeId::new(name_of(&object), gvk.clone());
        let node = Node { id: id.clone(), file: file.to_path_buf(), ast: tree.clone(), object };

        match ObjectKind::of(&gvk) {
            ObjectKind::Xrd => {
                let xrd: CompositeResourceDefinition = serde_json::from_value(node.object.clone())
                    .map_err(|e| ParseError::Decode { kind: "CompositeResourceDefinition".into(), message: e.to_string() })?;
                for v in &xrd.spec.versions {
                    if let Some(claim) = xrd.claim_gvk(&v.name) {
                        let composite = xrd.composite_gvk(&v.name);
                        self.claim_ref_sources.insert(composite.clone(), file.to_path_buf());
                        self.xr_claim_refs.insert(composite, claim);
                    }
                }
            }
            ObjectKind::Composition => {
                let declared = node.object.pointer("/spec/resources").filter(|v| !v.is_null());
                if matches!(declared, Some(v) if !v.is_array()) {
                    return Err(ParseError::MalformedComposition(file.to_path_buf()));
                }
                let comp: Composition = serde_json::from_value(node.object.clone())
                    .map_err(|e| ParseError::Decode { kind: "Composition".into(), message: e.to_string() })?;
                if let Some(resources) = &comp.spec.resources {
                    // without a tree the templates are still parsed, only without positions
                    let seq = match &tree {
                        Some(t) => Some(
                            t.lookup(&SPEC_RESOURCES)
                                .filter(|n| n.is_sequence())
                                .ok_or_else(|| ParseError::MalformedComposition(file.to_path_buf()))?,
                        ),
                        None => None,
                    };
                    for (i, res) in resources.iter().enumerate() {
                        let base_tree = seq.as_ref().and_then(|s| s.item(i)).and_then(|item| item.get("base"));
                        match self.add_document(file, res.base.clone(), base_tree, false) {
                            Ok(()) => {}
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => debug!(file = %file.display(), index = i, error = %e, "skipping composed template"),
                        }
                    }
                }
            }
            ObjectKind::Meta(kind) => {
                if let Some(first) = &self.meta_file {
                    return Err(ParseError::MultipleMeta { first: first.clone(), second: file.to_path_buf() });
                }
                self.meta = Some(PackageMeta::new(node.object.clone(), kind));
                self.meta_location = file.parent().map(Path::to_path_buf);
                self.meta_file = Some(file.to_path_buf());
            }
            _ if is_example(file) => {
                self.examples.entry(gvk).or_default().push(node.clone());
            }
            _ => {}
        }

        if self.nodes.insert(id.clone(), node).is_some() {
            debug!(node = %id, file = %file.display(), "node identity collision; replacing earlier node");
        }
        if top_level {
            if let Some(details) = self.files.get_mut(file) {
                if !details.node_ids.contains(&id) {
                    details.node_ids.push(id);
                }
            }
        }
        Ok(())
    }

}

/// Files whose directory path mentions `example` hold example instances.
fn is_example(file: &Path) -> bool {
    file.parent().map(|dir| dir.to_string_lossy().contains("example")).unwrap_or(false)
}

fn decode(text: &str) -> Result<Option<Value>, String> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
    if yaml.is_null() {
        return Ok(None);
    }
    serde_json::to_value(yaml).map(Some).map_err(|e| e.to_string())
}

/// Walks a workspace directory and builds its [`View`].
#[derive(Debug, Clone)]
pub struct Parser {
    root: PathBuf,
    max_bytes: u64,
}

impl Parser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), max_bytes: max_yaml_bytes() }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn parse(&self) -> Result<View, ParseError> {
        let started = Instant::now();
        let md = std::fs::metadata(&self.root)
            .map_err(|source| ParseError::Root { path: self.root.clone(), source })?;
        if !md.is_dir() {
            return Err(ParseError::NotADirectory(self.root.clone()));
        }

        let mut view = View::new(self.root.clone());
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "walk error; skipping entry");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if len > self.max_bytes {
                warn!(file = %path.display(), len, max = self.max_bytes, "file exceeds XPKG_MAX_YAML_BYTES; skipping");
                continue;
            }
            let body = match std::fs::read_to_string(path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "read failed; skipping");
                    continue;
                }
            };
            counter!("xpkg_parse_files_total", 1u64);
            view.insert_file(path, body);
            view.parse_file(path)?;
        }

        histogram!("xpkg_parse_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(root = %self.root.display(), files = view.files.len(), nodes = view.nodes.len(), "workspace parsed");
        Ok(view)
    }
}
