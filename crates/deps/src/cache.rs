//! Manager over a local package cache laid out as `<root>/<package>/<version>/**/*.yaml`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;
use xpkg_core::apis::Dependency;

use crate::{resolve_closure, select_version, DepsError, Manager, ParsedPackage, ResolvedView};

#[derive(Debug, Clone)]
pub struct LocalCacheManager {
    root: PathBuf,
}

impl LocalCacheManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache rooted at `XPKG_CACHE_DIR`, when set.
    pub fn from_env() -> Option<Self> {
        std::env::var_os("XPKG_CACHE_DIR").map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn list_versions(&self, package: &str) -> Result<Vec<String>, DepsError> {
        let dir = self.root.join(package);
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DepsError::NotFound(package.to_string()))
            }
            Err(source) => return Err(DepsError::Io { path: dir, source }),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DepsError::Io { path: dir.clone(), source })?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        out.sort();
        Ok(out)
    }

    fn load(&self, dep: &Dependency) -> Result<Option<ParsedPackage>, DepsError> {
        let versions = match self.list_versions(&dep.package) {
            Ok(v) => v,
            Err(DepsError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(version) = select_version(&dep.version, &versions) else {
            return Ok(None);
        };
        let dir = self.root.join(&dep.package).join(version);
        let objects = read_objects(&dir)?;
        Ok(Some(ParsedPackage::new(dep.package.clone(), dep.kind, version, objects)))
    }
}

fn read_objects(dir: &Path) -> Result<Vec<Value>, DepsError> {
    let mut objects = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cache walk error; skipping entry");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let body = std::fs::read_to_string(path).map_err(|source| DepsError::Io { path: path.to_path_buf(), source })?;
        for doc in serde_yaml::Deserializer::from_str(&body) {
            let value = match serde_yaml::Value::deserialize(doc) {
                Ok(serde_yaml::Value::Null) => continue,
                Ok(v) => v,
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "skipping undecodable cached document");
                    continue;
                }
            };
            match serde_json::to_value(value) {
                Ok(v) => objects.push(v),
                Err(e) => debug!(file = %path.display(), error = %e, "skipping non-JSON cached document"),
            }
        }
    }
    Ok(objects)
}

#[async_trait::async_trait]
impl Manager for LocalCacheManager {
    async fn view(&self, deps: &[Dependency]) -> Result<ResolvedView, DepsError> {
        let this = self.clone();
        let deps = deps.to_vec();
        tokio::task::spawn_blocking(move || resolve_closure(&deps, |dep| this.load(dep)))
            .await
            .map_err(|e| DepsError::Join(e.to_string()))?
    }

    async fn versions(&self, dep: &Dependency) -> Result<Vec<String>, DepsError> {
        self.list_versions(&dep.package)
    }
}
