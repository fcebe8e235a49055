//! Kind dispatch for package objects.
//!
//! A GVK is resolved once into an [`ObjectKind`]; parsers and validator builders match on the
//! variant instead of re-inspecting strings. New package object kinds are added as variants.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Gvk;

pub const CRD_GROUP: &str = "apiextensions.k8s.io";
pub const XP_APIEXT_GROUP: &str = "apiextensions.crossplane.io";
pub const META_GROUP: &str = "meta.pkg.crossplane.io";

pub const KIND_CRD: &str = "CustomResourceDefinition";
pub const KIND_XRD: &str = "CompositeResourceDefinition";
pub const KIND_COMPOSITION: &str = "Composition";
pub const KIND_CONFIGURATION: &str = "Configuration";
pub const KIND_PROVIDER: &str = "Provider";

/// Package type of a meta file or a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageType {
    Provider,
    Configuration,
}

impl PackageType {
    /// Key used for this type inside a `dependsOn` entry.
    pub fn dependency_key(&self) -> &'static str {
        match self {
            PackageType::Provider => "provider",
            PackageType::Configuration => "configuration",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageType::Provider => f.write_str("Provider"),
            PackageType::Configuration => f.write_str("Configuration"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    CrdV1,
    CrdV1beta1,
    /// CompositeResourceDefinition; v1 and v1beta1 share one shape.
    Xrd,
    Composition,
    Meta(PackageType),
    Other,
}

impl ObjectKind {
    pub fn of(gvk: &Gvk) -> Self {
        match (gvk.group.as_str(), gvk.version.as_str(), gvk.kind.as_str()) {
            (CRD_GROUP, "v1", KIND_CRD) => ObjectKind::CrdV1,
            (CRD_GROUP, "v1beta1", KIND_CRD) => ObjectKind::CrdV1beta1,
            (XP_APIEXT_GROUP, "v1" | "v1beta1", KIND_XRD) => ObjectKind::Xrd,
            (XP_APIEXT_GROUP, _, KIND_COMPOSITION) => ObjectKind::Composition,
            (META_GROUP, _, KIND_PROVIDER) => ObjectKind::Meta(PackageType::Provider),
            (META_GROUP, _, KIND_CONFIGURATION) => ObjectKind::Meta(PackageType::Configuration),
            _ => ObjectKind::Other,
        }
    }

    /// Kinds that define schemas (and therefore produce validators).
    pub fn defines_schema(&self) -> bool {
        matches!(self, ObjectKind::CrdV1 | ObjectKind::CrdV1beta1 | ObjectKind::Xrd)
    }
}

/// GVKs the semantic validators are registered under.
pub fn meta_gvks() -> Vec<Gvk> {
    let mut out = Vec::new();
    for version in ["v1", "v1alpha1"] {
        for kind in [KIND_CONFIGURATION, KIND_PROVIDER] {
            out.push(Gvk { group: META_GROUP.into(), version: version.into(), kind: kind.into() });
        }
    }
    out
}

pub fn composition_gvks() -> Vec<Gvk> {
    ["v1", "v1beta1"]
        .into_iter()
        .map(|v| Gvk { group: XP_APIEXT_GROUP.into(), version: v.into(), kind: KIND_COMPOSITION.into() })
        .collect()
}

pub fn xrd_gvks() -> Vec<Gvk> {
    ["v1", "v1beta1"]
        .into_iter()
        .map(|v| Gvk { group: XP_APIEXT_GROUP.into(), version: v.into(), kind: KIND_XRD.into() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gvk_from_type;

    #[test]
    fn dispatch_by_group_version_kind() {
        assert_eq!(ObjectKind::of(&gvk_from_type("apiextensions.k8s.io/v1", KIND_CRD)), ObjectKind::CrdV1);
        assert_eq!(ObjectKind::of(&gvk_from_type("apiextensions.k8s.io/v1beta1", KIND_CRD)), ObjectKind::CrdV1beta1);
        assert_eq!(ObjectKind::of(&gvk_from_type("apiextensions.crossplane.io/v1", KIND_XRD)), ObjectKind::Xrd);
        assert_eq!(
            ObjectKind::of(&gvk_from_type("meta.pkg.crossplane.io/v1alpha1", "Configuration")),
            ObjectKind::Meta(PackageType::Configuration)
        );
        for gvk in composition_gvks() {
            assert_eq!(ObjectKind::of(&gvk), ObjectKind::Composition);
        }
        // an installed Provider object is not a meta file
        assert_eq!(ObjectKind::of(&gvk_from_type("pkg.crossplane.io/v1", "Provider")), ObjectKind::Other);
    }
}
