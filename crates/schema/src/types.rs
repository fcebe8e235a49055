//! CustomResourceDefinition `apiextensions.k8s.io/v1beta1`, which k8s-openapi no longer ships.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct CrdV1beta1 {
    pub spec: CrdV1beta1Spec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdV1beta1Spec {
    pub group: String,
    pub names: CrdNames,
    /// Deprecated single-version form.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub versions: Vec<CrdV1beta1Version>,
    /// Schema shared by all versions unless a version overrides it.
    #[serde(default)]
    pub validation: Option<CrdValidation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrdNames {
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrdV1beta1Version {
    pub name: String,
    #[serde(default)]
    pub schema: Option<CrdValidation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrdValidation {
    #[serde(rename = "openAPIV3Schema", default)]
    pub open_api_v3_schema: Option<Value>,
}

impl CrdV1beta1Spec {
    /// `(version name, schema)` pairs, falling back to the top-level validation.
    pub fn version_schemas(&self) -> Vec<(String, Option<Value>)> {
        let shared = self.validation.as_ref().and_then(|v| v.open_api_v3_schema.clone());
        if self.versions.is_empty() {
            return self.version.iter().map(|v| (v.clone(), shared.clone())).collect();
        }
        self.versions
            .iter()
            .map(|v| {
                let own = v.schema.as_ref().and_then(|s| s.open_api_v3_schema.clone());
                (v.name.clone(), own.or_else(|| shared.clone()))
            })
            .collect()
    }
}
