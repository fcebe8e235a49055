//! xpkg schema engine: turn CRD / XRD definitions into per-version schema validators.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use tracing::debug;
use xpkg_core::apis::CompositeResourceDefinition;
use xpkg_core::fieldpath::{self, Segment};
use xpkg_core::prelude::*;
use xpkg_core::type_of;

pub mod convert;
pub mod types;

/// Validators keyed by the GVK they check.
pub type ValidatorMap = HashMap<Gvk, Arc<dyn Validator>>;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("{0} is not a known type")]
    NotKnownType(String),
    #[error("object has no apiVersion/kind")]
    MissingType,
    #[error("decoding {kind}: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("compiling schema for {gvk}: {message}")]
    Compile { gvk: String, message: String },
}

/// Schema-backed validator for one GVK.
pub struct SchemaValidator {
    gvk: Gvk,
    schema: Value,
    compiled: JSONSchema,
}

impl SchemaValidator {
    /// Build from a Kubernetes `openAPIV3Schema`. `None` accepts any object.
    pub fn new(gvk: Gvk, openapi: Option<&Value>) -> Result<Self, SchemaError> {
        let schema = match openapi {
            Some(s) => convert::to_json_schema(s),
            None => Value::Object(Default::default()),
        };
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft4)
            .compile(&schema)
            .map_err(|e| SchemaError::Compile { gvk: gvk_key(&gvk), message: e.to_string() })?;
        Ok(Self { gvk, schema, compiled })
    }

    pub fn gvk(&self) -> &Gvk {
        &self.gvk
    }
}

impl Validator for SchemaValidator {
    fn validate(&self, data: &Value) -> ValidationResult {
        let mut out = ValidationResult::default();
        if let Err(errors) = self.compiled.validate(data) {
            for err in errors {
                let mut name = pointer_to_path(data, &err.instance_path.to_string());
                let code = match &err.kind {
                    ValidationErrorKind::Required { property } => {
                        // name the missing child, like OpenAPI validation does
                        if let Some(p) = property.as_str() {
                            name = fieldpath::join(&name, &fieldpath::render(&[Segment::Field(p.to_string())]));
                        }
                        codes::REQUIRED
                    }
                    kind => code_for(kind),
                };
                let name = if name.is_empty() { ".".to_string() } else { name };
                out.push(ValidationIssue::new(code, name, err.to_string()));
            }
        }
        out
    }

    fn schema(&self) -> Option<&Value> {
        Some(&self.schema)
    }
}

fn code_for(kind: &ValidationErrorKind) -> u32 {
    match kind {
        ValidationErrorKind::Type { .. } => codes::INVALID_TYPE,
        ValidationErrorKind::Required { .. } => codes::REQUIRED,
        ValidationErrorKind::MaxLength { .. } => codes::TOO_LONG,
        ValidationErrorKind::MinLength { .. } => codes::TOO_SHORT,
        ValidationErrorKind::Pattern { .. } => codes::PATTERN,
        ValidationErrorKind::Enum { .. } => codes::ENUM,
        ValidationErrorKind::MultipleOf { .. } => codes::MULTIPLE_OF,
        ValidationErrorKind::Maximum { .. } | ValidationErrorKind::ExclusiveMaximum { .. } => codes::MAX,
        ValidationErrorKind::Minimum { .. } | ValidationErrorKind::ExclusiveMinimum { .. } => codes::MIN,
        ValidationErrorKind::UniqueItems { .. } => codes::UNIQUE,
        ValidationErrorKind::MaxItems { .. } => codes::MAX_ITEMS,
        ValidationErrorKind::MinItems { .. } => codes::MIN_ITEMS,
        ValidationErrorKind::MinProperties { .. } => codes::TOO_FEW_PROPERTIES,
        ValidationErrorKind::MaxProperties { .. } => codes::TOO_MANY_PROPERTIES,
        ValidationErrorKind::AdditionalProperties { .. } => codes::UNALLOWED_PROPERTY,
        _ => codes::ERROR,
    }
}

/// Convert a JSON pointer (`/spec/items/0/name`) into a field path (`spec.items[0].name`),
/// walking the instance to tell array indices from numeric keys.
pub fn pointer_to_path(instance: &Value, pointer: &str) -> String {
    let mut segments = Vec::new();
    let mut cur = Some(instance);
    for raw in pointer.split('/').skip_while(|s| s.is_empty()) {
        let chunk = raw.replace("~1", "/").replace("~0", "~");
        match cur {
            Some(Value::Array(items)) => match chunk.parse::<usize>() {
                Ok(i) => {
                    cur = items.get(i);
                    segments.push(Segment::Index(i));
                }
                Err(_) => {
                    cur = None;
                    segments.push(Segment::Field(chunk));
                }
            },
            Some(Value::Object(map)) => {
                cur = map.get(&chunk);
                segments.push(Segment::Field(chunk));
            }
            _ => {
                cur = None;
                segments.push(Segment::Field(chunk));
            }
        }
    }
    fieldpath::render(&segments)
}

/// Derive schema validators for a definition object, one per declared version.
///
/// CRDs register under their own kind; XRDs under the claim kind (falling back to the
/// composite kind when no claim is offered).
pub fn validators_for_obj(obj: &Value) -> Result<ValidatorMap, SchemaError> {
    let gvk = type_of(obj).ok_or(SchemaError::MissingType)?;
    let pairs: Vec<(Gvk, Option<Value>)> = match ObjectKind::of(&gvk) {
        ObjectKind::CrdV1 => crd_v1_schemas(obj)?,
        ObjectKind::CrdV1beta1 => crd_v1beta1_schemas(obj)?,
        ObjectKind::Xrd => xrd_schemas(obj)?,
        _ => return Err(SchemaError::NotKnownType(gvk_key(&gvk))),
    };
    let mut out: ValidatorMap = HashMap::with_capacity(pairs.len());
    for (gvk, schema) in pairs {
        let v = SchemaValidator::new(gvk.clone(), schema.as_ref())?;
        debug!(gvk = %gvk_key(&gvk), "schema validator built");
        out.insert(gvk, Arc::new(v));
    }
    Ok(out)
}

fn crd_v1_schemas(obj: &Value) -> Result<Vec<(Gvk, Option<Value>)>, SchemaError> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    let crd: CustomResourceDefinition = serde_json::from_value(obj.clone())
        .map_err(|source| SchemaError::Decode { kind: "CustomResourceDefinition".into(), source })?;
    let spec = crd.spec;
    let mut out = Vec::with_capacity(spec.versions.len());
    for v in spec.versions {
        let gvk = Gvk { group: spec.group.clone(), version: v.name, kind: spec.names.kind.clone() };
        let schema = v
            .schema
            .and_then(|s| s.open_api_v3_schema)
            .map(|props| serde_json::to_value(props))
            .transpose()
            .map_err(|source| SchemaError::Decode { kind: "JSONSchemaProps".into(), source })?;
        out.push((gvk, schema));
    }
    Ok(out)
}

fn crd_v1beta1_schemas(obj: &Value) -> Result<Vec<(Gvk, Option<Value>)>, SchemaError> {
    let crd: types::CrdV1beta1 = serde_json::from_value(obj.clone())
        .map_err(|source| SchemaError::Decode { kind: "CustomResourceDefinition".into(), source })?;
    let spec = &crd.spec;
    Ok(spec
        .version_schemas()
        .into_iter()
        .map(|(version, schema)| {
            (Gvk { group: spec.group.clone(), version, kind: spec.names.kind.clone() }, schema)
        })
        .collect())
}

fn xrd_schemas(obj: &Value) -> Result<Vec<(Gvk, Option<Value>)>, SchemaError> {
    let xrd: CompositeResourceDefinition = serde_json::from_value(obj.clone())
        .map_err(|source| SchemaError::Decode { kind: "CompositeResourceDefinition".into(), source })?;
    Ok(xrd
        .spec
        .versions
        .iter()
        .map(|v| {
            let gvk = xrd.claim_gvk(&v.name).unwrap_or_else(|| xrd.composite_gvk(&v.name));
            let schema = v.schema.as_ref().and_then(|s| s.open_api_v3_schema.clone());
            (gvk, schema)
        })
        .collect())
}

/// Whether a Crossplane field path (`spec.forProvider.tags[0]`) can exist in objects described
/// by `schema`. Open-ended schemas (preserve-unknown, additionalProperties, untyped) accept any
/// remainder; `metadata` is always accepted since definitions rarely describe it.
pub fn schema_has_path(schema: &Value, path: &str) -> bool {
    let Ok(segments) = fieldpath::parse(path) else { return false };
    if matches!(segments.first(), Some(Segment::Field(f)) if f == "metadata") {
        return true;
    }
    walk_schema(schema, &segments)
}

fn walk_schema(schema: &Value, segments: &[Segment]) -> bool {
    let Some((head, rest)) = segments.split_first() else { return true };
    let Some(obj) = schema.as_object() else { return true };

    for key in ["allOf", "anyOf", "oneOf"] {
        if let Some(branches) = obj.get(key).and_then(|b| b.as_array()) {
            if branches.iter().any(|b| walk_schema(b, segments)) {
                return true;
            }
        }
    }

    let open = obj.get("x-kubernetes-preserve-unknown-fields").and_then(Value::as_bool) == Some(true);
    let untyped = !obj.contains_key("type") && !obj.contains_key("properties") && !obj.contains_key("items");

    match head {
        Segment::Field(name) => {
            if let Some(prop) = obj.get("properties").and_then(|p| p.get(name)) {
                return walk_schema(prop, rest);
            }
            match obj.get("additionalProperties") {
                Some(Value::Bool(true)) => return true,
                Some(ap @ Value::Object(_)) => return walk_schema(ap, rest),
                _ => {}
            }
            open || untyped
        }
        Segment::Index(_) => match obj.get("items") {
            Some(items @ Value::Object(_)) => walk_schema(items, rest),
            Some(_) => true,
            None => open || untyped || obj.get("type").and_then(Value::as_str) == Some("array"),
        },
    }
}
