use std::collections::HashMap;

use serde_json::Value;
use xpkg_core::apis::meta_dependencies;
use xpkg_core::kinds::META_GROUP;
use xpkg_core::prelude::*;
use xpkg_core::type_of;
use xpkg_deps::version_match;

/// Checks a package meta file's `dependsOn` against the versions the dependency manager knows.
pub struct MetaValidator {
    versions: HashMap<String, Vec<String>>,
}

impl MetaValidator {
    /// `versions` maps package references to their published versions. Packages missing from
    /// the map are unknown.
    pub fn new(versions: HashMap<String, Vec<String>>) -> Self {
        Self { versions }
    }
}

impl Validator for MetaValidator {
    fn validate(&self, data: &Value) -> ValidationResult {
        let mut out = ValidationResult::default();
        let Some(gvk) = type_of(data) else { return out };

        if gvk.group == META_GROUP && gvk.version == "v1alpha1" {
            out.push(ValidationIssue::warning(
                "apiVersion",
                format!("{META_GROUP}/v1alpha1 is deprecated, use {META_GROUP}/v1"),
            ));
        }

        for (i, dep) in meta_dependencies(data) {
            let known = self.versions.get(&dep.package).filter(|v| !v.is_empty());
            let Some(known) = known else {
                out.push(ValidationIssue::error(
                    format!("spec.dependsOn[{i}].{}", dep.kind.dependency_key()),
                    format!("{} package {} not found", dep.kind, dep.package),
                ));
                continue;
            };
            if !version_match(&dep.version, known) {
                out.push(ValidationIssue::error(
                    format!("spec.dependsOn[{i}].version"),
                    format!("no version of {} satisfies {:?}", dep.package, dep.version),
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> MetaValidator {
        MetaValidator::new(HashMap::from([(
            "xpkg.upbound.io/upbound/provider-aws".to_string(),
            vec!["v0.20.0".to_string(), "v0.21.0".to_string()],
        )]))
    }

    #[test]
    fn reports_unknown_packages_and_unmatched_versions() {
        let res = validator().validate(&json!({
            "apiVersion": "meta.pkg.crossplane.io/v1",
            "kind": "Configuration",
            "spec": { "dependsOn": [
                { "provider": "xpkg.upbound.io/upbound/provider-aws", "version": ">=v0.20.0" },
                { "provider": "xpkg.upbound.io/upbound/provider-aws", "version": ">=v1.0.0" },
                { "configuration": "xpkg.upbound.io/acme/missing", "version": "v1.0.0" }
            ] }
        }));
        let names: Vec<_> = res.errors.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["spec.dependsOn[1].version", "spec.dependsOn[2].configuration"]);
        assert!(res.errors.iter().all(|e| e.code == codes::ERROR));
    }

    #[test]
    fn v1alpha1_is_deprecated() {
        let res = validator().validate(&json!({
            "apiVersion": "meta.pkg.crossplane.io/v1alpha1",
            "kind": "Provider"
        }));
        assert_eq!(res.errors.len(), 1);
        assert!(res.errors[0].is_warning());
        assert_eq!(res.errors[0].name, "apiVersion");
    }

    #[test]
    fn undecodable_input_is_empty() {
        assert!(validator().validate(&json!("nope")).is_empty());
    }
}
