//! xpkg snapshot: a parsed workspace plus every validator that applies to it.
//!
//! A [`Factory`] parses a workspace, resolves its dependencies through a [`Manager`] and
//! derives schema validators from both the dependencies and the local definitions. The
//! resulting [`Snapshot`] validates files into editor diagnostics and follows edits through
//! [`Snapshot::update_content`] and [`Snapshot::reparse_file`].

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use lsp_types::{Diagnostic, TextDocumentContentChangeEvent};
use metrics::histogram;
use parking_lot::RwLock;
use tracing::{debug, info};
use xpkg_core::apis::CompositeResourceDefinition;
use xpkg_core::kinds;
use xpkg_core::prelude::*;
use xpkg_deps::{DepsError, Manager, ParsedPackage};
use xpkg_schema::{validators_for_obj, ValidatorMap};
use xpkg_workspace::{ParseError, Parser, UpdateError, View};

pub mod diagnostics;
pub mod render;
pub mod validators;

pub use render::{ComposedRenderer, ComposedResource, TemplateRenderer};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error("resolving dependencies: {0}")]
    Deps(#[from] DepsError),
    #[error("unknown file {0}")]
    UnknownFile(PathBuf),
}

/// Schema validators and composite → claim mappings by GVK. Local definitions shadow external
/// ones.
#[derive(Default)]
pub struct ValidatorIndex {
    external: ValidatorMap,
    local: ValidatorMap,
    external_claims: HashMap<Gvk, Gvk>,
    local_claims: HashMap<Gvk, Gvk>,
}

impl ValidatorIndex {
    pub fn new(external: ValidatorMap, local: ValidatorMap) -> Self {
        Self { external, local, ..Default::default() }
    }

    pub fn with_claims(mut self, external: HashMap<Gvk, Gvk>, local: HashMap<Gvk, Gvk>) -> Self {
        self.external_claims = external;
        self.local_claims = local;
        self
    }

    pub fn claim_of(&self, composite: &Gvk) -> Option<&Gvk> {
        self.local_claims.get(composite).or_else(|| self.external_claims.get(composite))
    }

    pub fn schema_validator(&self, gvk: &Gvk) -> Option<Arc<dyn Validator>> {
        self.local.get(gvk).or_else(|| self.external.get(gvk)).cloned()
    }

    /// Validator for a composite resource kind. XRD validators are keyed by claim kind, so the
    /// composite GVK is mapped through the claim index first.
    pub fn composite_validator(&self, composite: &Gvk) -> Option<Arc<dyn Validator>> {
        self.claim_of(composite)
            .and_then(|claim| self.schema_validator(claim))
            .or_else(|| self.schema_validator(composite))
    }

    pub fn len(&self) -> usize {
        self.local.len() + self.external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Schema validators derived from every definition parsed in the workspace.
fn local_validators(view: &View) -> ValidatorMap {
    let mut out = ValidatorMap::new();
    for node in view.nodes().values() {
        if !ObjectKind::of(node.gvk()).defines_schema() {
            continue;
        }
        match validators_for_obj(&node.object) {
            Ok(vs) => out.extend(vs),
            Err(e) => debug!(node = %node.id, file = %node.file.display(), error = %e, "no validators for local definition"),
        }
    }
    out
}

/// Composite → claim mappings declared by an XRD object.
fn claim_refs_of(obj: &serde_json::Value) -> Vec<(Gvk, Gvk)> {
    let Ok(xrd) = serde_json::from_value::<CompositeResourceDefinition>(obj.clone()) else {
        return Vec::new();
    };
    xrd.spec
        .versions
        .iter()
        .filter_map(|v| xrd.claim_gvk(&v.name).map(|claim| (xrd.composite_gvk(&v.name), claim)))
        .collect()
}

/// Builds snapshots. Reusable across workspaces; the manager is shared by every snapshot.
#[derive(Clone)]
pub struct Factory {
    manager: Arc<dyn Manager>,
    renderer: Arc<dyn ComposedRenderer>,
}

impl Factory {
    pub fn new(manager: Arc<dyn Manager>) -> Self {
        Self { manager, renderer: Arc::new(TemplateRenderer) }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ComposedRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub async fn new_snapshot(&self, workdir: impl AsRef<Path>) -> Result<Snapshot, SnapshotError> {
        let started = Instant::now();
        let view = Parser::new(workdir.as_ref()).parse()?;

        let mut external = ValidatorMap::new();
        let mut external_claims = HashMap::new();
        let mut packages = HashMap::new();
        let mut versions = HashMap::new();
        if let Some(meta) = view.meta() {
            let deps = meta.dependencies();
            let (resolved, prebuilt) = self.manager.view(&deps).await?.into_parts();
            external.extend(prebuilt);
            for pkg in resolved.values() {
                for obj in &pkg.objects {
                    let kind = xpkg_core::type_of(obj).map(|g| ObjectKind::of(&g));
                    if kind == Some(ObjectKind::Xrd) {
                        external_claims.extend(claim_refs_of(obj));
                    }
                    if !kind.map(|k| k.defines_schema()).unwrap_or(false) {
                        continue;
                    }
                    match validators_for_obj(obj) {
                        Ok(vs) => {
                            for (gvk, v) in vs {
                                external.entry(gvk).or_insert(v);
                            }
                        }
                        Err(e) => debug!(package = %pkg.name, error = %e, "skipping dependency object"),
                    }
                }
            }
            packages = resolved;

            for dep in &deps {
                match self.manager.versions(dep).await {
                    Ok(vs) => {
                        versions.insert(dep.package.clone(), vs);
                    }
                    Err(e) => debug!(package = %dep.package, error = %e, "no versions for dependency"),
                }
            }
        }

        let local = local_validators(&view);
        let index = Arc::new(RwLock::new(
            ValidatorIndex::new(external, local).with_claims(external_claims, view.xr_claim_refs().clone()),
        ));

        let mut semantic: HashMap<Gvk, Arc<dyn Validator>> = HashMap::new();
        let meta_validator: Arc<dyn Validator> = Arc::new(validators::MetaValidator::new(versions));
        for gvk in kinds::meta_gvks() {
            semantic.insert(gvk, Arc::clone(&meta_validator));
        }
        let composition_validator: Arc<dyn Validator> =
            Arc::new(validators::CompositionValidator::new(Arc::clone(&index), Arc::clone(&self.renderer)));
        for gvk in kinds::composition_gvks() {
            semantic.insert(gvk, Arc::clone(&composition_validator));
        }
        for gvk in kinds::xrd_gvks() {
            semantic.insert(gvk, Arc::new(validators::XrdValidator));
        }

        histogram!("snapshot_build_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(
            root = %view.root().display(),
            nodes = view.nodes().len(),
            validators = index.read().len(),
            packages = packages.len(),
            "snapshot built"
        );
        Ok(Snapshot {
            view: Arc::new(RwLock::new(view)),
            index,
            semantic,
            packages,
            manager: Arc::clone(&self.manager),
        })
    }
}

pub struct Snapshot {
    view: Arc<RwLock<View>>,
    index: Arc<RwLock<ValidatorIndex>>,
    semantic: HashMap<Gvk, Arc<dyn Validator>>,
    packages: HashMap<String, ParsedPackage>,
    manager: Arc<dyn Manager>,
}

impl Snapshot {
    /// The semantic validator for `gvk` if there is one, otherwise its schema validator.
    pub fn validator(&self, gvk: &Gvk) -> Option<Arc<dyn Validator>> {
        if let Some(v) = self.semantic.get(gvk) {
            return Some(Arc::clone(v));
        }
        self.index.read().schema_validator(gvk)
    }

    pub fn package(&self, name: &str) -> Option<&ParsedPackage> {
        self.packages.get(name)
    }

    pub fn packages(&self) -> &HashMap<String, ParsedPackage> {
        &self.packages
    }

    pub fn manager(&self) -> Arc<dyn Manager> {
        Arc::clone(&self.manager)
    }

    pub fn view(&self) -> Arc<RwLock<View>> {
        Arc::clone(&self.view)
    }

    /// Run `f` with read access to the view.
    pub fn with_view<R>(&self, f: impl FnOnce(&View) -> R) -> R {
        f(&self.view.read())
    }

    /// Diagnostics for every top-level node of a file.
    pub fn validate(&self, path: &Path) -> Result<Vec<Diagnostic>, SnapshotError> {
        let started = Instant::now();
        let view = self.view.read();
        let file = view.file(path).ok_or_else(|| SnapshotError::UnknownFile(path.to_path_buf()))?;
        let mut out = Vec::new();
        for id in &file.node_ids {
            let Some(node) = view.node(id) else { continue };
            let Some(ast) = node.ast.as_ref() else { continue };
            let Some(validator) = self.validator(&id.gvk) else { continue };
            let result = validator.validate(&node.object);
            out.extend(diagnostics::project(ast, &result.errors));
        }
        histogram!("validate_file_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(file = %path.display(), diagnostics = out.len(), "file validated");
        Ok(out)
    }

    /// Diagnostics for every file, ordered by path.
    pub fn validate_all_files(&self) -> Result<Vec<(PathBuf, Vec<Diagnostic>)>, SnapshotError> {
        let mut paths: Vec<PathBuf> = self.view.read().files().keys().cloned().collect();
        paths.sort();
        paths
            .into_iter()
            .map(|p| {
                let diags = self.validate(&p)?;
                Ok((p, diags))
            })
            .collect()
    }

    /// Apply editor changes to a file body without re-parsing it.
    pub fn update_content(
        &self,
        path: &Path,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Result<(), SnapshotError> {
        self.view.write().update_content(path, changes)?;
        Ok(())
    }

    /// Re-parse a file and refresh the local validators and claim index derived from it.
    pub fn reparse_file(&self, path: &Path) -> Result<(), SnapshotError> {
        let mut view = self.view.write();
        view.reparse_file(path)?;
        let local = local_validators(&view);
        let mut index = self.index.write();
        index.local = local;
        index.local_claims = view.xr_claim_refs().clone();
        debug!(file = %path.display(), validators = index.len(), "file re-parsed");
        Ok(())
    }
}
