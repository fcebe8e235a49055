//! Kubernetes structural schema (OpenAPI v3 JSONSchemaProps) to plain JSON Schema.

use serde_json::{json, Value};

/// Convert a Kubernetes `openAPIV3Schema` into a JSON Schema the validator understands:
/// `nullable` becomes a `"null"` type alternative and `x-kubernetes-int-or-string` an
/// integer/string `anyOf`. Unknown `x-kubernetes-*` keywords are left in place and ignored.
pub fn to_json_schema(props: &Value) -> Value {
    let mut out = props.clone();
    convert_in_place(&mut out);
    out
}

fn convert_in_place(v: &mut Value) {
    let Some(obj) = v.as_object_mut() else { return };

    for key in ["properties", "patternProperties", "definitions"] {
        if let Some(Value::Object(children)) = obj.get_mut(key) {
            for (_, child) in children.iter_mut() {
                convert_in_place(child);
            }
        }
    }
    match obj.get_mut("items") {
        Some(Value::Array(items)) => items.iter_mut().for_each(convert_in_place),
        Some(items) => convert_in_place(items),
        None => {}
    }
    if let Some(ap @ Value::Object(_)) = obj.get_mut("additionalProperties") {
        convert_in_place(ap);
    }
    for key in ["allOf", "anyOf", "oneOf"] {
        if let Some(Value::Array(branches)) = obj.get_mut(key) {
            branches.iter_mut().for_each(convert_in_place);
        }
    }
    if let Some(not) = obj.get_mut("not") {
        convert_in_place(not);
    }

    if obj.get("x-kubernetes-int-or-string").and_then(Value::as_bool) == Some(true) {
        obj.remove("type");
        if !obj.contains_key("anyOf") {
            obj.insert("anyOf".into(), json!([{ "type": "integer" }, { "type": "string" }]));
        }
    }

    if obj.remove("nullable").and_then(|n| n.as_bool()) == Some(true) {
        if let Some(Value::String(t)) = obj.get("type").cloned() {
            obj.insert("type".into(), json!([t, "null"]));
        }
        if let Some(Value::Array(options)) = obj.get_mut("enum") {
            if !options.contains(&Value::Null) {
                options.push(Value::Null);
            }
        }
    }
}
