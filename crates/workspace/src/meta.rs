//! Package meta (`meta.pkg.crossplane.io` Provider / Configuration) wrapper.

use serde_json::{json, Map, Value};
use xpkg_core::apis::{meta_dependencies, Dependency};
use xpkg_core::kinds::PackageType;
use xpkg_core::{type_of, Gvk};

#[derive(Debug, Clone, PartialEq)]
pub struct PackageMeta {
    object: Value,
    kind: PackageType,
}

impl PackageMeta {
    pub fn new(object: Value, kind: PackageType) -> Self {
        Self { object, kind }
    }

    pub fn object(&self) -> &Value {
        &self.object
    }

    pub fn kind(&self) -> PackageType {
        self.kind
    }

    pub fn gvk(&self) -> Option<Gvk> {
        type_of(&self.object)
    }

    /// Declared `spec.dependsOn` entries, in file order.
    pub fn dependencies(&self) -> Vec<Dependency> {
        meta_dependencies(&self.object).into_iter().map(|(_, d)| d).collect()
    }

    /// Add `dep`, or overwrite the version of the entry naming the same package.
    /// Returns `true` when a new entry was appended.
    pub fn upsert_dependency(&mut self, dep: &Dependency) -> bool {
        let Some(root) = ensure_object(&mut self.object) else { return false };
        let Some(spec) = ensure_object(root.entry("spec").or_insert_with(|| json!({}))) else { return false };
        let entries = spec.entry("dependsOn").or_insert_with(|| json!([]));
        if !entries.is_array() {
            *entries = json!([]);
        }
        let Value::Array(entries) = entries else { return false };

        let existing = entries.iter_mut().find(|e| {
            ["provider", "configuration"]
                .iter()
                .any(|key| e.get(*key).and_then(Value::as_str) == Some(dep.package.as_str()))
        });
        if let Some(Value::Object(entry)) = existing {
            entry.insert("version".into(), Value::String(dep.version.clone()));
            return false;
        }
        entries.push(json!({ dep.kind.dependency_key(): dep.package, "version": dep.version }));
        true
    }

    /// YAML encoding of the meta object with null `creationTimestamp` fields removed.
    pub fn bytes(&self) -> Result<Vec<u8>, serde_yaml::Error> {
        let mut object = self.object.clone();
        strip_null_timestamps(&mut object);
        Ok(serde_yaml::to_string(&object)?.into_bytes())
    }
}

fn ensure_object(v: &mut Value) -> Option<&mut Map<String, Value>> {
    if !v.is_object() {
        *v = Value::Object(Map::new());
    }
    v.as_object_mut()
}

fn strip_null_timestamps(v: &mut Value) {
    match v {
        Value::Object(map) => {
            if matches!(map.get("creationTimestamp"), Some(Value::Null)) {
                map.remove("creationTimestamp");
            }
            map.values_mut().for_each(strip_null_timestamps);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_null_timestamps),
        _ => {}
    }
}
