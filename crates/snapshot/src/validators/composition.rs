use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use xpkg_core::apis::{Composition, Patch, PatchType};
use xpkg_core::fieldpath;
use xpkg_core::prelude::*;
use xpkg_core::type_of;
use xpkg_schema::schema_has_path;

use crate::render::ComposedRenderer;
use crate::ValidatorIndex;

/// Composite fields Crossplane manages itself; XRD schemas do not declare them.
const COMPOSITE_MACHINERY: &[&str] = &[
    "metadata",
    "spec.claimRef",
    "spec.compositionRef",
    "spec.compositionSelector",
    "spec.compositionRevisionRef",
    "spec.compositionUpdatePolicy",
    "spec.resourceRefs",
    "spec.writeConnectionSecretToRef",
    "spec.publishConnectionDetailsTo",
    "status.conditions",
    "status.connectionDetails",
];

/// Whether `long` is a path below `short`.
fn nested(long: &str, short: &str) -> bool {
    long.strip_prefix(short)
        .map(|rest| rest.starts_with(|c: char| c == '.' || c == '['))
        .unwrap_or(false)
}

fn is_machinery(path: &str) -> bool {
    COMPOSITE_MACHINERY.iter().any(|m| path == *m || nested(path, m))
}

/// Whether writing `patched` makes a field `required` present.
fn covers(patched: &str, required: &str) -> bool {
    patched == required || nested(required, patched) || nested(patched, required)
}

/// Semantic checks for Compositions: template naming, composed resources against their
/// schemas, and patch paths against the composite and composed schemas.
pub struct CompositionValidator {
    index: Arc<RwLock<ValidatorIndex>>,
    renderer: Arc<dyn ComposedRenderer>,
}

impl CompositionValidator {
    pub fn new(index: Arc<RwLock<ValidatorIndex>>, renderer: Arc<dyn ComposedRenderer>) -> Self {
        Self { index, renderer }
    }
}

impl Validator for CompositionValidator {
    fn validate(&self, data: &Value) -> ValidationResult {
        let mut out = ValidationResult::default();
        let Some(raw) = data.pointer("/spec/resources").and_then(Value::as_array) else { return out };
        // naming only needs the raw list, so it survives templates that fail to decode
        check_naming(raw, &mut out);

        let Ok(comp) = serde_json::from_value::<Composition>(data.clone()) else { return out };
        let Some(resources) = comp.spec.resources.as_deref() else { return out };

        let patch_sets: HashMap<&str, &[Patch]> =
            comp.spec.patch_sets.iter().map(|ps| (ps.name.as_str(), ps.patches.as_slice())).collect();

        let index = self.index.read();
        let composite = index.composite_validator(&comp.spec.composite_type_ref.gvk());
        let composite_schema = composite.as_ref().and_then(|v| v.schema());

        for composed in self.renderer.render(&comp) {
            let i = composed.index;
            let base = format!("spec.resources[{i}].base");
            let Some(template) = resources.get(i) else { continue };

            let Some(gvk) = type_of(&composed.object) else {
                out.push(ValidationIssue::warning(base, "composed resource has no apiVersion/kind"));
                continue;
            };
            let Some(validator) = index.schema_validator(&gvk) else {
                out.push(ValidationIssue::warning(
                    format!("{base}.apiVersion"),
                    format!("no schema found for {}; is the providing package a dependency?", gvk_key(&gvk)),
                ));
                continue;
            };

            let patched = patched_paths(&template.patches, &patch_sets);
            for issue in validator.validate(&composed.object).errors {
                if issue.is_required() && patched.iter().any(|p| covers(p, &issue.name)) {
                    continue;
                }
                out.push(ValidationIssue { name: fieldpath::join(&base, &issue.name), ..issue });
            }

            let composed_schema = validator.schema();
            for (j, patch) in template.patches.iter().enumerate() {
                let at = format!("spec.resources[{i}].patches[{j}]");
                check_patch(patch, &at, composite_schema, composed_schema, &patch_sets, &mut out);
            }
        }
        out
    }
}

fn check_naming(resources: &[Value], out: &mut ValidationResult) {
    let names: Vec<Option<&str>> = resources.iter().map(|r| r.get("name").and_then(Value::as_str)).collect();
    let named = names.iter().flatten().count();
    if named > 0 && named < resources.len() {
        out.push(ValidationIssue::error(
            "spec.resources",
            "resources must be either all named or all anonymous",
        ));
    }
    let mut seen = HashSet::new();
    for (j, name) in names.iter().enumerate() {
        if let Some(name) = name {
            if !seen.insert(*name) {
                out.push(ValidationIssue::error(
                    format!("spec.resources[{j}].name"),
                    format!("duplicate resource name {name:?}"),
                ));
            }
        }
    }
}

/// Composed-resource paths written by the template's patches, patch sets included.
fn patched_paths(patches: &[Patch], patch_sets: &HashMap<&str, &[Patch]>) -> Vec<String> {
    let mut out = Vec::new();
    for patch in patches {
        match patch.kind() {
            PatchType::FromCompositeFieldPath | PatchType::CombineFromComposite => {
                if let Some(to) = patch.effective_to_field_path() {
                    out.push(to.to_string());
                }
            }
            PatchType::PatchSet => {
                if let Some(set) = patch.patch_set_name.as_deref().and_then(|n| patch_sets.get(n)) {
                    out.extend(patched_paths(set, &HashMap::new()));
                }
            }
            _ => {}
        }
    }
    out
}

fn check_path(schema: Option<&Value>, path: &str, at: String, composite: bool, out: &mut ValidationResult) {
    let Some(schema) = schema else { return };
    if fieldpath::parse(path).is_err() {
        out.push(ValidationIssue::error(at, format!("{path:?} is not a valid field path")));
        return;
    }
    if composite && is_machinery(path) {
        return;
    }
    if !schema_has_path(schema, path) {
        let side = if composite { "composite" } else { "composed" };
        out.push(ValidationIssue::error(at, format!("{path:?} is not a field of the {side} resource schema")));
    }
}

fn check_patch(
    patch: &Patch,
    at: &str,
    composite: Option<&Value>,
    composed: Option<&Value>,
    patch_sets: &HashMap<&str, &[Patch]>,
    out: &mut ValidationResult,
) {
    // source schema, destination schema, whether the source is the composite
    let (from, to, from_composite) = match patch.kind() {
        PatchType::FromCompositeFieldPath | PatchType::CombineFromComposite => (composite, composed, true),
        PatchType::ToCompositeFieldPath | PatchType::CombineToComposite => (composed, composite, false),
        PatchType::PatchSet => {
            let name = patch.patch_set_name.as_deref().unwrap_or_default();
            if !patch_sets.contains_key(name) {
                out.push(ValidationIssue::error(
                    format!("{at}.patchSetName"),
                    format!("patch set {name:?} is not defined in spec.patchSets"),
                ));
            }
            return;
        }
        PatchType::Other(_) => return,
    };

    match patch.kind() {
        PatchType::CombineFromComposite | PatchType::CombineToComposite => {
            for (k, var) in patch.combine.iter().flat_map(|c| c.variables.iter()).enumerate() {
                check_path(
                    from,
                    &var.from_field_path,
                    format!("{at}.combine.variables[{k}].fromFieldPath"),
                    from_composite,
                    out,
                );
            }
            if let Some(to_path) = patch.to_field_path.as_deref() {
                check_path(to, to_path, format!("{at}.toFieldPath"), !from_composite, out);
            }
        }
        _ => {
            if let Some(from_path) = patch.from_field_path.as_deref() {
                check_path(from, from_path, format!("{at}.fromFieldPath"), from_composite, out);
            }
            if let Some(to_path) = patch.to_field_path.as_deref() {
                check_path(to, to_path, format!("{at}.toFieldPath"), !from_composite, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::TemplateRenderer;

    #[test]
    fn coverage_follows_nesting() {
        assert!(covers("spec.forProvider.region", "spec.forProvider.region"));
        assert!(covers("spec.forProvider", "spec.forProvider.region"));
        assert!(covers("spec.forProvider.tags[0]", "spec.forProvider.tags"));
        assert!(!covers("spec.forProvider.regionName", "spec.forProvider.region"));
    }

    fn validator() -> CompositionValidator {
        CompositionValidator::new(Arc::new(RwLock::new(ValidatorIndex::default())), Arc::new(TemplateRenderer))
    }

    #[test]
    fn naming_survives_undecodable_templates() {
        let comp = serde_json::json!({
            "apiVersion": "apiextensions.crossplane.io/v1",
            "kind": "Composition",
            "spec": {
                "resources": [
                    {"name": "a", "base": {"apiVersion": "acme.io/v1", "kind": "One"}, "patches": "oops"},
                    {"base": {"apiVersion": "acme.io/v1", "kind": "Two"}}
                ]
            }
        });
        let res = validator().validate(&comp);
        assert_eq!(res.errors.len(), 1, "{:?}", res.errors);
        assert_eq!(res.errors[0].name, "spec.resources");
        assert!(!res.errors[0].is_warning());
    }

    #[test]
    fn machinery_paths_are_accepted() {
        assert!(is_machinery("spec.claimRef.namespace"));
        assert!(is_machinery("metadata.labels[app]"));
        assert!(!is_machinery("spec.claimRefs"));
    }
}
