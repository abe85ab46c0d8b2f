use std::collections::HashSet;

use varia_core::VariaError;

use crate::template::{Layer, TagKind, Template};

/// Validate a template for structural correctness before rendering.
///
/// Each tag kind must use a single addressing mode: all ordinal indices or
/// all anchor points. Mixing both for the same kind is rejected rather than
/// guessing which locator should win.
pub fn validate_template(template: &Template) -> Result<(), Vec<VariaError>> {
    let mut errors = Vec::new();

    validate_layer("graphic", &template.graphic, &mut errors);
    for (i, layer) in template.images.iter().enumerate() {
        validate_layer(&format!("images[{}]", i), layer, &mut errors);
    }

    let mut tag_ids = HashSet::new();
    for tag in &template.tags {
        if !tag.id.is_empty() && !tag_ids.insert(tag.id.as_str()) {
            errors.push(VariaError::InvalidTemplate(format!(
                "duplicate tag id '{}'",
                tag.id
            )));
        }
    }

    for kind in [TagKind::Text, TagKind::Color] {
        let anchors = template.tags_of(kind).filter(|t| t.locator.is_anchor()).count();
        let total = template.tags_of(kind).count();
        if anchors > 0 && anchors < total {
            errors.push(VariaError::InvalidTemplate(format!(
                "{} tags mix index and anchor addressing",
                kind
            )));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_layer(label: &str, layer: &Layer, errors: &mut Vec<VariaError>) {
    if layer.file_name.trim().is_empty() {
        errors.push(VariaError::InvalidTemplate(format!(
            "{} has an empty document reference",
            label
        )));
    }
    for (name, value) in [("width", layer.width), ("height", layer.height)] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                errors.push(VariaError::InvalidTemplate(format!(
                    "{} has invalid {} {}",
                    label, name, v
                )));
            }
        }
    }
}
