//! xpkg dependency boundary: resolve a package's `dependsOn` list into parsed packages.
//!
//! The snapshot only talks to the [`Manager`] trait. Two implementations ship here: an
//! in-memory [`StaticManager`] and [`LocalCacheManager`], which reads packages already
//! extracted to disk.

#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use xpkg_core::apis::{meta_dependencies, Dependency};
use xpkg_core::kinds::PackageType;
use xpkg_core::prelude::*;
use xpkg_core::type_of;

pub mod cache;
pub mod version;

pub use cache::LocalCacheManager;
pub use version::{select_version, version_match};

#[derive(Debug, thiserror::Error)]
pub enum DepsError {
    #[error("package {0} not found")]
    NotFound(String),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("resolver task failed: {0}")]
    Join(String),
}

/// One resolved dependency and the objects it ships.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPackage {
    pub name: String,
    pub kind: PackageType,
    pub version: String,
    pub objects: Vec<Value>,
}

impl ParsedPackage {
    pub fn new(name: impl Into<String>, kind: PackageType, version: impl Into<String>, objects: Vec<Value>) -> Self {
        Self { name: name.into(), kind, version: version.into(), objects }
    }

    /// Dependencies declared by the package's own meta object.
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.objects
            .iter()
            .find(|o| type_of(o).map(|g| matches!(ObjectKind::of(&g), ObjectKind::Meta(_))).unwrap_or(false))
            .map(|meta| meta_dependencies(meta).into_iter().map(|(_, d)| d).collect())
            .unwrap_or_default()
    }
}

/// Packages resolved for a dependency list, plus any validators the manager already built.
#[derive(Clone, Default)]
pub struct ResolvedView {
    packages: HashMap<String, ParsedPackage>,
    validators: HashMap<Gvk, Arc<dyn Validator>>,
}

impl ResolvedView {
    pub fn packages(&self) -> &HashMap<String, ParsedPackage> {
        &self.packages
    }

    pub fn validators(&self) -> &HashMap<Gvk, Arc<dyn Validator>> {
        &self.validators
    }

    pub fn insert_package(&mut self, pkg: ParsedPackage) {
        self.packages.insert(pkg.name.clone(), pkg);
    }

    pub fn insert_validator(&mut self, gvk: Gvk, validator: Arc<dyn Validator>) {
        self.validators.insert(gvk, validator);
    }

    pub fn into_parts(self) -> (HashMap<String, ParsedPackage>, HashMap<Gvk, Arc<dyn Validator>>) {
        (self.packages, self.validators)
    }
}

/// Source of dependency packages and their published versions.
#[async_trait::async_trait]
pub trait Manager: Send + Sync {
    /// Resolve `deps` and everything they depend on.
    async fn view(&self, deps: &[Dependency]) -> Result<ResolvedView, DepsError>;

    /// Known versions of a dependency's package.
    async fn versions(&self, dep: &Dependency) -> Result<Vec<String>, DepsError>;
}

/// Breadth-first walk over `deps` and their transitive dependencies. A package is loaded once,
/// by the first constraint that names it. Unresolvable packages are skipped.
pub(crate) fn resolve_closure<F>(deps: &[Dependency], mut load: F) -> Result<ResolvedView, DepsError>
where
    F: FnMut(&Dependency) -> Result<Option<ParsedPackage>, DepsError>,
{
    let mut view = ResolvedView::default();
    let mut queue: VecDeque<Dependency> = deps.iter().cloned().collect();
    let mut seen = HashSet::new();
    while let Some(dep) = queue.pop_front() {
        if !seen.insert(dep.package.clone()) {
            continue;
        }
        match load(&dep)? {
            Some(pkg) => {
                debug!(package = %pkg.name, version = %pkg.version, objects = pkg.objects.len(), "dependency resolved");
                queue.extend(pkg.dependencies());
                view.insert_package(pkg);
            }
            None => warn!(package = %dep.package, constraint = %dep.version, "dependency not resolvable; skipping"),
        }
    }
    Ok(view)
}

/// In-memory manager over a fixed set of packages.
#[derive(Clone, Default)]
pub struct StaticManager {
    packages: HashMap<String, Vec<ParsedPackage>>,
    validators: HashMap<Gvk, Arc<dyn Validator>>,
}

impl StaticManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one published version of a package.
    pub fn with_package(mut self, pkg: ParsedPackage) -> Self {
        self.packages.entry(pkg.name.clone()).or_default().push(pkg);
        self
    }

    /// Validator handed out with every view.
    pub fn with_validator(mut self, gvk: Gvk, validator: Arc<dyn Validator>) -> Self {
        self.validators.insert(gvk, validator);
        self
    }

    fn load(&self, dep: &Dependency) -> Option<ParsedPackage> {
        let published = self.packages.get(&dep.package)?;
        let versions: Vec<String> = published.iter().map(|p| p.version.clone()).collect();
        let chosen = select_version(&dep.version, &versions)?;
        published.iter().find(|p| p.version == chosen).cloned()
    }
}

#[async_trait::async_trait]
impl Manager for StaticManager {
    async fn view(&self, deps: &[Dependency]) -> Result<ResolvedView, DepsError> {
        let mut view = resolve_closure(deps, |dep| Ok(self.load(dep)))?;
        for (gvk, v) in &self.validators {
            view.insert_validator(gvk.clone(), Arc::clone(v));
        }
        Ok(view)
    }

    async fn versions(&self, dep: &Dependency) -> Result<Vec<String>, DepsError> {
        self.packages
            .get(&dep.package)
            .map(|ps| ps.iter().map(|p| p.version.clone()).collect())
            .ok_or_else(|| DepsError::NotFound(dep.package.clone()))
    }
}
