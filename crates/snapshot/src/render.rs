//! Composition rendering boundary.

use serde_json::{json, Value};
use xpkg_core::apis::Composition;

pub const COMPOSITION_RESOURCE_NAME: &str = "crossplane.io/composition-resource-name";

/// A composed resource produced for `spec.resources[index]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedResource {
    pub index: usize,
    pub object: Value,
}

/// Produces the composed resources of a Composition. Implementations may run real composition
/// logic; the snapshot only needs the objects and the template each came from.
pub trait ComposedRenderer: Send + Sync {
    fn render(&self, composition: &Composition) -> Vec<ComposedResource>;
}

/// Renders each template's base unchanged apart from the resource-name annotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl ComposedRenderer for TemplateRenderer {
    fn render(&self, composition: &Composition) -> Vec<ComposedResource> {
        let Some(resources) = &composition.spec.resources else { return Vec::new() };
        resources
            .iter()
            .enumerate()
            .map(|(index, template)| {
                let mut object = template.base.clone();
                if let (Some(name), Some(obj)) = (&template.name, object.as_object_mut()) {
                    let meta = obj.entry("metadata").or_insert_with(|| json!({}));
                    if let Some(meta) = meta.as_object_mut() {
                        let annotations = meta.entry("annotations").or_insert_with(|| json!({}));
                        if let Some(annotations) = annotations.as_object_mut() {
                            annotations.insert(COMPOSITION_RESOURCE_NAME.into(), Value::String(name.clone()));
                        }
                    }
                }
                ComposedResource { index, object }
            })
            .collect()
    }
}
