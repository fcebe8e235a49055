//! Crossplane API shapes decoded from package documents.
//!
//! Only the fields the parser and validators read are modelled; everything else stays in the
//! node's raw `serde_json::Value`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kinds::PackageType;
use crate::{gvk_from_type, Gvk};

// ---- CompositeResourceDefinition ----

// Missing fields decode to their zero values; only type mismatches fail.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResourceDefinition {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: XrdSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XrdSpec {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub names: XrdNames,
    #[serde(default)]
    pub claim_names: Option<XrdNames>,
    #[serde(default)]
    pub versions: Vec<XrdVersion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XrdNames {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub plural: String,
    #[serde(default)]
    pub singular: Option<String>,
    #[serde(default)]
    pub list_kind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XrdVersion {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub served: bool,
    #[serde(default)]
    pub referenceable: bool,
    #[serde(default)]
    pub schema: Option<XrdSchema>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XrdSchema {
    #[serde(rename = "openAPIV3Schema", default)]
    pub open_api_v3_schema: Option<Value>,
}

impl CompositeResourceDefinition {
    pub fn composite_gvk(&self, version: &str) -> Gvk {
        Gvk { group: self.spec.group.clone(), version: version.to_string(), kind: self.spec.names.kind.clone() }
    }

    /// Claim GVK for a version, when the XRD offers a claim.
    pub fn claim_gvk(&self, version: &str) -> Option<Gvk> {
        let claim = self.spec.claim_names.as_ref()?;
        if claim.kind.is_empty() {
            return None;
        }
        Some(Gvk { group: self.spec.group.clone(), version: version.to_string(), kind: claim.kind.clone() })
    }
}

// ---- Composition ----

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CompositionSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSpec {
    #[serde(default)]
    pub composite_type_ref: TypeReference,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub resources: Option<Vec<ComposedTemplate>>,
    #[serde(default)]
    pub patch_sets: Vec<PatchSet>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeReference {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
}

impl TypeReference {
    pub fn gvk(&self) -> Gvk {
        gvk_from_type(&self.api_version, &self.kind)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedTemplate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base: Value,
    #[serde(default)]
    pub patches: Vec<Patch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchSet {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub patches: Vec<Patch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchType {
    FromCompositeFieldPath,
    ToCompositeFieldPath,
    CombineFromComposite,
    CombineToComposite,
    PatchSet,
    Other(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    #[serde(rename = "type", default)]
    pub patch_type: Option<String>,
    #[serde(default)]
    pub from_field_path: Option<String>,
    #[serde(default)]
    pub to_field_path: Option<String>,
    #[serde(default)]
    pub combine: Option<Combine>,
    #[serde(default)]
    pub patch_set_name: Option<String>,
}

impl Patch {
    pub fn kind(&self) -> PatchType {
        match self.patch_type.as_deref() {
            None | Some("FromCompositeFieldPath") => PatchType::FromCompositeFieldPath,
            Some("ToCompositeFieldPath") => PatchType::ToCompositeFieldPath,
            Some("CombineFromComposite") => PatchType::CombineFromComposite,
            Some("CombineToComposite") => PatchType::CombineToComposite,
            Some("PatchSet") => PatchType::PatchSet,
            Some(other) => PatchType::Other(other.to_string()),
        }
    }

    /// Destination path; defaults to the source path like Crossplane does.
    pub fn effective_to_field_path(&self) -> Option<&str> {
        self.to_field_path.as_deref().or(self.from_field_path.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combine {
    #[serde(default)]
    pub variables: Vec<CombineVariable>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombineVariable {
    #[serde(default)]
    pub from_field_path: String,
}

// ---- Package meta ----

/// A declared package dependency: package reference, version constraint, package type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub package: String,
    pub version: String,
    pub kind: PackageType,
}

impl Dependency {
    pub fn new(package: impl Into<String>, version: impl Into<String>, kind: PackageType) -> Self {
        Self { package: package.into(), version: version.into(), kind }
    }
}

/// One raw `spec.dependsOn` entry as written in a meta file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaDependency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(default)]
    pub version: String,
}

impl MetaDependency {
    pub fn to_dependency(&self) -> Option<Dependency> {
        if let Some(p) = &self.provider {
            return Some(Dependency::new(p.clone(), self.version.clone(), PackageType::Provider));
        }
        self.configuration
            .as_ref()
            .map(|c| Dependency::new(c.clone(), self.version.clone(), PackageType::Configuration))
    }
}

/// Decode `spec.dependsOn` from a meta object. Entries without a package reference are skipped.
pub fn meta_dependencies(meta: &Value) -> Vec<(usize, Dependency)> {
    let Some(entries) = meta.get("spec").and_then(|s| s.get("dependsOn")).and_then(|d| d.as_array()) else {
        return Vec::new();
    };
    entries
        .iter()
        .enumerate()
        .filter_map(|(i, v)| {
            let raw: MetaDependency = serde_json::from_value(v.clone()).ok()?;
            raw.to_dependency().map(|d| (i, d))
        })
        .collect()
}
