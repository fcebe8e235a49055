use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use xpkg_core::apis::CompositeResourceDefinition;
use xpkg_core::prelude::*;

static BRACKETED: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]").ok());

fn collapse_validation(path: String) -> String {
    match path.strip_prefix("spec.validation") {
        Some(rest) => format!("spec.versions[0].schema{rest}"),
        None => path,
    }
}

fn unbracket_keys(path: String) -> String {
    let Some(re) = BRACKETED.as_ref() else { return path };
    re.replace_all(&path, |caps: &Captures| {
        let key = &caps[1];
        if key.bytes().all(|b| b.is_ascii_digit()) {
            format!("[{key}]")
        } else {
            format!(".{key}")
        }
    })
    .into_owned()
}

fn truncate_ref(path: String) -> String {
    match path.find(".$") {
        Some(at) => path[..at].to_string(),
        None => path,
    }
}

const CLEANUPS: &[fn(String) -> String] = &[collapse_validation, unbracket_keys, truncate_ref];

/// Turn a schema path in `properties[name]` notation into a field path that resolves against
/// the XRD document.
pub fn clean_field_path(path: &str) -> String {
    CLEANUPS.iter().fold(path.to_string(), |p, f| f(p))
}

/// Structural-schema and naming checks for CompositeResourceDefinitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct XrdValidator;

impl Validator for XrdValidator {
    fn validate(&self, data: &Value) -> ValidationResult {
        let Ok(xrd) = serde_json::from_value::<CompositeResourceDefinition>(data.clone()) else {
            return ValidationResult::default();
        };
        let mut raw = Vec::new();
        check_names(&xrd, &mut raw);
        for (i, version) in xrd.spec.versions.iter().enumerate() {
            let Some(schema) = version.schema.as_ref().and_then(|s| s.open_api_v3_schema.as_ref()) else {
                continue;
            };
            let root = format!("spec.versions[{i}].schema.openAPIV3Schema");
            if schema.get("type").and_then(Value::as_str) != Some("object") {
                raw.push(ValidationIssue::error(root.clone(), "schema root must be of type object"));
            }
            check_schema(schema, &root, &mut raw);
        }
        raw.into_iter()
            .map(|issue| ValidationIssue { name: clean_field_path(&issue.name), ..issue })
            .collect::<Vec<_>>()
            .into()
    }
}

fn check_names(xrd: &CompositeResourceDefinition, out: &mut Vec<ValidationIssue>) {
    let spec = &xrd.spec;
    let expected = format!("{}.{}", spec.names.plural, spec.group);
    match xrd.metadata.name.as_deref() {
        Some(name) if name != expected => out.push(ValidationIssue::error(
            "metadata.name",
            format!("name must be {expected:?} (spec.names.plural + \".\" + spec.group)"),
        )),
        _ => {}
    }
    if let Some(claim) = &spec.claim_names {
        if claim.kind == spec.names.kind {
            out.push(ValidationIssue::error(
                "spec.claimNames.kind",
                "claim kind must differ from the composite kind",
            ));
        }
    }
    let referenceable = spec.versions.iter().filter(|v| v.referenceable).count();
    if referenceable != 1 {
        out.push(ValidationIssue::error(
            "spec.versions",
            format!("exactly one version must be referenceable, found {referenceable}"),
        ));
    }
}

fn is_open(schema: &serde_json::Map<String, Value>) -> bool {
    ["x-kubernetes-int-or-string", "x-kubernetes-preserve-unknown-fields"]
        .iter()
        .any(|k| schema.get(*k).and_then(Value::as_bool) == Some(true))
}

fn check_schema(schema: &Value, path: &str, out: &mut Vec<ValidationIssue>) {
    let Some(obj) = schema.as_object() else { return };

    if obj.contains_key("$ref") {
        out.push(ValidationIssue::error(format!("{path}.$ref"), "$ref is not allowed in structural schemas"));
    }
    let ty = obj.get("type").and_then(Value::as_str);
    let props = obj.get("properties").and_then(Value::as_object);

    if props.is_some() && ty != Some("object") {
        out.push(ValidationIssue::error(path, "properties requires type object"));
    }
    if props.is_some() && matches!(obj.get("additionalProperties"), Some(v) if v != &Value::Bool(false)) {
        out.push(ValidationIssue::error(path, "properties and additionalProperties are mutually exclusive"));
    }
    if ty == Some("array") && !obj.contains_key("items") {
        out.push(ValidationIssue::error(path, "arrays must define items"));
    }

    for (name, child) in props.into_iter().flatten() {
        let child_path = format!("{path}.properties[{name}]");
        if let Some(c) = child.as_object() {
            if !c.contains_key("type") && !is_open(c) {
                out.push(ValidationIssue::error(child_path.clone(), format!("type is required for {name}")));
            }
        }
        check_schema(child, &child_path, out);
    }
    if let Some(items @ Value::Object(_)) = obj.get("items") {
        check_schema(items, &format!("{path}.items"), out);
    }
    if let Some(ap @ Value::Object(_)) = obj.get("additionalProperties") {
        check_schema(ap, &format!("{path}.additionalProperties"), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cleans_property_brackets() {
        assert_eq!(
            clean_field_path("spec.versions[0].schema.openAPIV3Schema.properties[spec].properties[parameters]"),
            "spec.versions[0].schema.openAPIV3Schema.properties.spec.properties.parameters"
        );
    }

    #[test]
    fn truncates_at_ref() {
        assert_eq!(
            clean_field_path("spec.versions[0].schema.openAPIV3Schema.$ref"),
            "spec.versions[0].schema.openAPIV3Schema"
        );
    }

    #[test]
    fn collapses_legacy_validation() {
        assert_eq!(
            clean_field_path("spec.validation.openAPIV3Schema.properties[spec]"),
            "spec.versions[0].schema.openAPIV3Schema.properties.spec"
        );
    }

    fn xrd(schema: Value) -> Value {
        json!({
            "apiVersion": "apiextensions.crossplane.io/v1",
            "kind": "CompositeResourceDefinition",
            "metadata": { "name": "xnetworks.acme.io" },
            "spec": {
                "group": "acme.io",
                "names": { "kind": "XNetwork", "plural": "xnetworks" },
                "claimNames": { "kind": "Network", "plural": "networks" },
                "versions": [{ "name": "v1alpha1", "served": true, "referenceable": true,
                               "schema": { "openAPIV3Schema": schema } }]
            }
        })
    }

    #[test]
    fn well_formed_xrd_is_clean() {
        let res = XrdValidator.validate(&xrd(json!({
            "type": "object",
            "properties": { "spec": { "type": "object", "properties": {
                "cidr": { "type": "string" },
                "ports": { "type": "array", "items": { "x-kubernetes-int-or-string": true } },
                "extra": { "type": "object", "x-kubernetes-preserve-unknown-fields": true }
            } } }
        })));
        assert!(res.is_empty(), "{:?}", res.errors);
    }

    #[test]
    fn structural_violations() {
        let res = XrdValidator.validate(&xrd(json!({
            "type": "object",
            "properties": { "spec": { "type": "object", "properties": {
                "untyped": { "description": "no type" },
                "list": { "type": "array" },
                "both": { "type": "object", "properties": { "a": { "type": "string" } }, "additionalProperties": true },
                "linked": { "$ref": "#/definitions/x" }
            } } }
        })));
        let mut names: Vec<_> = res.errors.iter().map(|e| e.name.as_str()).collect();
        names.sort();
        let base = "spec.versions[0].schema.openAPIV3Schema.properties.spec.properties";
        assert_eq!(
            names,
            [
                format!("{base}.both"),
                format!("{base}.linked"),
                format!("{base}.linked"),
                format!("{base}.list"),
                format!("{base}.untyped"),
            ]
        );
    }

    #[test]
    fn naming_checks() {
        let mut bad = xrd(json!({ "type": "object" }));
        bad["metadata"]["name"] = json!("networks.acme.io");
        bad["spec"]["claimNames"]["kind"] = json!("XNetwork");
        bad["spec"]["versions"][0]["referenceable"] = json!(false);
        let res = XrdValidator.validate(&bad);
        let names: Vec<_> = res.errors.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["metadata.name", "spec.claimNames.kind", "spec.versions"]);
    }

    #[test]
    fn non_object_root_is_reported() {
        let res = XrdValidator.validate(&xrd(json!({ "type": "string" })));
        assert_eq!(res.errors.len(), 1);
        assert_eq!(res.errors[0].name, "spec.versions[0].schema.openAPIV3Schema");
    }
}
