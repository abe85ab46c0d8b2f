//! Template compositing.
//!
//! Applies a resolved template onto its base document: text substitution,
//! fill substitution and overlay layers. Tag targets are located against the
//! untouched base document before any mutation so ordinal indices keep the
//! meaning they had at tagging time.

use std::sync::Arc;

use futures::future::try_join_all;

use varia_core::{ContentHash, VariaError, VariaResult};
use varia_ir::{validate_template, Layer, Locator, ResolvedTemplate, TagKind, Template};

use crate::geometry::{element_center, intrinsic_size, layer_placement};
use crate::store::DocumentStore;
use crate::svg::{ElementPath, SvgDocument, SvgElement, SvgNode};

/// Id of the group that receives overlay layers.
pub const OVERLAY_GROUP_ID: &str = "additionalImages";

const SHAPE_ELEMENTS: [&str; 5] = ["path", "rect", "circle", "polygon", "polyline"];

/// The final composed SVG.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedDocument {
    pub svg: String,
    pub hash: ContentHash,
}

impl ComposedDocument {
    pub fn new(svg: String) -> Self {
        let hash = ContentHash::of(svg.as_bytes());
        Self { svg, hash }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.svg.as_bytes()
    }

    /// Standalone HTML page with the document inside `<div id="{marker_id}">`,
    /// which is what the rasterizer waits for.
    pub fn to_html(&self, marker_id: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
             <style>html,body{{margin:0;padding:0;background:transparent}}\
             #{id}{{display:inline-block;line-height:0}}</style>\n\
             </head>\n<body>\n<div id=\"{id}\">{svg}</div>\n</body>\n</html>\n",
            id = quick_xml::escape::escape(marker_id),
            svg = self.svg
        )
    }
}

/// Elements of the base document a tag kind can address, in document order.
///
/// Text tags address `text` elements. Color tags address elements carrying a
/// `fill` attribute, or every basic shape when no element carries one.
pub fn candidates(doc: &SvgDocument, kind: TagKind) -> Vec<ElementPath> {
    match kind {
        TagKind::Text => doc.find_paths(|e| e.local_name() == "text"),
        TagKind::Color => {
            let filled = doc.find_paths(|e| e.has_attr("fill"));
            if filled.is_empty() {
                doc.find_paths(|e| SHAPE_ELEMENTS.contains(&e.local_name()))
            } else {
                filled
            }
        }
    }
}

/// Find the element a locator addresses.
///
/// An ordinal index outside `[0, len)` finds nothing. An anchor finds the
/// candidate whose center is nearest, first in document order on ties;
/// candidates without a computable center are ignored.
pub fn locate(doc: &SvgDocument, kind: TagKind, locator: &Locator) -> Option<ElementPath> {
    locate_in(doc, &candidates(doc, kind), locator)
}

fn locate_in(doc: &SvgDocument, candidates: &[ElementPath], locator: &Locator) -> Option<ElementPath> {
    match *locator {
        Locator::ByIndex { index } => {
            let i = usize::try_from(index).ok()?;
            candidates.get(i).cloned()
        }
        Locator::ByAnchor { x, y } => {
            let anchor = varia_core::Point2D::new(x, y);
            let mut best: Option<(f64, &ElementPath)> = None;
            for path in candidates {
                let Some(center) = doc.element(path).and_then(element_center) else {
                    continue;
                };
                let d = center.distance(&anchor);
                if d.is_nan() {
                    continue;
                }
                if best.map_or(true, |(bd, _)| d < bd) {
                    best = Some((d, path));
                }
            }
            best.map(|(_, p)| p.clone())
        }
    }
}

/// Replace an element's children with a single text node.
pub fn apply_text(el: &mut SvgElement, value: &str) {
    el.set_text(value);
}

/// Set an element's fill.
///
/// An existing `fill` attribute is replaced; otherwise the inline style's
/// `fill:` declaration is rewritten, or appended when the style has none;
/// otherwise a `fill` attribute is added.
pub fn apply_fill(el: &mut SvgElement, value: &str) {
    if el.has_attr("fill") {
        el.set_attr("fill", value);
        return;
    }
    if let Some(style) = el.attr("style").map(str::to_owned) {
        let updated = replace_style_fill(&style, value)
            .unwrap_or_else(|| append_style_fill(&style, value));
        el.set_attr("style", updated);
        return;
    }
    el.set_attr("fill", value);
}

/// Replace the `fill` declaration of an inline style, keeping every other
/// declaration as written. `None` when there is no fill declaration.
pub fn replace_style_fill(style: &str, value: &str) -> Option<String> {
    let mut replaced = false;
    let parts: Vec<String> = style
        .split(';')
        .map(|decl| {
            let is_fill = decl
                .split_once(':')
                .map(|(prop, _)| prop.trim().eq_ignore_ascii_case("fill"))
                .unwrap_or(false);
            if is_fill && !replaced {
                replaced = true;
                let indent = &decl[..decl.len() - decl.trim_start().len()];
                format!("{}fill: {}", indent, value)
            } else {
                decl.to_string()
            }
        })
        .collect();
    replaced.then(|| parts.join(";"))
}

fn append_style_fill(style: &str, value: &str) -> String {
    let trimmed = style.trim_end();
    if trimmed.is_empty() {
        format!("fill: {}", value)
    } else if trimmed.ends_with(';') {
        format!("{}fill: {}", trimmed, value)
    } else {
        format!("{};fill: {}", trimmed, value)
    }
}

/// Compose a resolved template from already-fetched documents.
///
/// `overlays` pairs each overlay layer with its document bytes; they are
/// painted in ascending `order`, stable for ties.
pub fn compose_documents(
    template: &Template,
    base: &[u8],
    overlays: &[(&Layer, Vec<u8>)],
) -> VariaResult<ComposedDocument> {
    let mut doc = SvgDocument::parse_bytes(base)?;

    if let Some(size) = template.graphic.target_size() {
        doc.root.set_attr("width", varia_core::format_number(size.width));
        doc.root.set_attr("height", varia_core::format_number(size.height));
    }

    // Locate every target before mutating anything.
    let text_candidates = candidates(&doc, TagKind::Text);
    let color_candidates = candidates(&doc, TagKind::Color);
    let mut edits: Vec<(TagKind, ElementPath, &str)> = Vec::new();
    for kind in [TagKind::Text, TagKind::Color] {
        let pool = match kind {
            TagKind::Text => &text_candidates,
            TagKind::Color => &color_candidates,
        };
        for tag in template.tags_of(kind) {
            let Some(path) = locate_in(&doc, pool, &tag.locator) else {
                tracing::debug!(
                    "{} tag '{}' matches no element ({:?}, {} candidates), skipped",
                    kind,
                    tag.id,
                    tag.locator,
                    pool.len()
                );
                continue;
            };
            match (kind, tag.value.as_deref()) {
                (TagKind::Text, value) => edits.push((kind, path, value.unwrap_or(""))),
                (TagKind::Color, Some(value)) if !value.is_empty() => {
                    edits.push((kind, path, value))
                }
                (TagKind::Color, _) => {
                    tracing::debug!("color tag '{}' has no value, skipped", tag.id)
                }
            }
        }
    }

    for (kind, path, value) in edits {
        let Some(el) = doc.element_mut(&path) else {
            tracing::debug!("{} target {:?} no longer exists, skipped", kind, path);
            continue;
        };
        match kind {
            TagKind::Text => apply_text(el, value),
            TagKind::Color => apply_fill(el, value),
        }
    }

    if !overlays.is_empty() {
        let mut ordered: Vec<&(&Layer, Vec<u8>)> = overlays.iter().collect();
        ordered.sort_by_key(|(layer, _)| layer.order);

        let mut group = SvgElement::new("g").with_attr("id", OVERLAY_GROUP_ID);
        for (layer, bytes) in ordered {
            let overlay = SvgDocument::parse_bytes(bytes)?;
            let placement = layer_placement(layer, intrinsic_size(&overlay.root));
            let mut wrapper = SvgElement::new("g").with_attr("transform", placement.to_svg_transform());
            // Prefixes the overlay root binds must stay bound once its root is gone.
            for (name, uri) in &overlay.root.attributes {
                if name.starts_with("xmlns:") && doc.root.attr(name) != Some(uri.as_str()) {
                    wrapper.set_attr(name, uri.clone());
                }
            }
            wrapper.children = overlay.root.children;
            group.append_child(SvgNode::Element(wrapper));
        }
        doc.root.append_child(SvgNode::Element(group));
    }

    Ok(ComposedDocument::new(doc.to_svg_string()))
}

/// Fetches a template's documents from a store and composes them.
#[derive(Clone)]
pub struct Compositor {
    store: Arc<dyn DocumentStore>,
}

impl Compositor {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Compose a resolved template. The base and overlay documents are
    /// fetched concurrently; any fetch or parse failure fails the whole
    /// composition.
    pub async fn compose(&self, resolved: &ResolvedTemplate) -> VariaResult<ComposedDocument> {
        let template = &resolved.template;
        validate_template(template).map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            VariaError::InvalidTemplate(msgs.join("; "))
        })?;

        let base = self.store.get(&template.graphic.file_name);
        let overlays = try_join_all(template.images.iter().map(|layer| async move {
            let bytes = self.store.get(&layer.file_name).await?;
            Ok::<_, VariaError>((layer, bytes))
        }));
        let (base, overlays) = futures::try_join!(base, overlays)?;

        tracing::debug!(
            "composing {} with {} tags and {} layers",
            template.graphic.file_name,
            template.tags.len(),
            overlays.len()
        );
        compose_documents(template, &base, &overlays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varia_ir::TaggedVariable;

    fn doc(src: &str) -> SvgDocument {
        SvgDocument::parse(src).unwrap()
    }

    #[test]
    fn test_style_fill_replacement() {
        assert_eq!(
            replace_style_fill("fill:#fff;stroke:red", "#000").as_deref(),
            Some("fill: #000;stroke:red")
        );
        assert_eq!(
            replace_style_fill("stroke:red; fill : blue", "#000").as_deref(),
            Some("stroke:red; fill: #000")
        );
        assert_eq!(replace_style_fill("fill-opacity:0.5", "#000"), None);
    }

    #[test]
    fn test_apply_fill_variants() {
        let mut el = SvgElement::new("rect").with_attr("style", "fill:#fff;stroke:red");
        apply_fill(&mut el, "#000");
        assert_eq!(el.attr("style"), Some("fill: #000;stroke:red"));
        assert!(!el.has_attr("fill"));

        let mut el = SvgElement::new("rect").with_attr("fill", "red");
        apply_fill(&mut el, "blue");
        assert_eq!(el.attr("fill"), Some("blue"));

        let mut el = SvgElement::new("rect").with_attr("style", "stroke:red;");
        apply_fill(&mut el, "blue");
        assert_eq!(el.attr("style"), Some("stroke:red;fill: blue"));

        let mut el = SvgElement::new("rect").with_attr("style", "stroke:red").with_attr("fill", "red");
        apply_fill(&mut el, "blue");
        assert_eq!(el.attr("fill"), Some("blue"));
        assert_eq!(el.attr("style"), Some("stroke:red"));

        let mut el = SvgElement::new("rect");
        apply_fill(&mut el, "blue");
        assert_eq!(el.attr("fill"), Some("blue"));

        let mut el = SvgElement::new("rect").with_attr("style", "");
        apply_fill(&mut el, "blue");
        assert_eq!(el.attr("style"), Some("fill: blue"));
    }

    #[test]
    fn test_fill_attribute_wins_over_style_declaration() {
        let mut el = SvgElement::new("rect")
            .with_attr("fill", "red")
            .with_attr("style", "fill:#fff;stroke:red");
        apply_fill(&mut el, "#000");
        assert_eq!(el.attr("fill"), Some("#000"));
        assert_eq!(el.attr("style"), Some("fill:#fff;stroke:red"));
    }

    #[test]
    fn test_color_candidates_fall_back_to_shapes() {
        let d = doc(r#"<svg><rect width="1" height="1"/><g/><circle r="1"/></svg>"#);
        assert_eq!(candidates(&d, TagKind::Color).len(), 2);

        let d = doc(r#"<svg><rect width="1" height="1"/><g fill="red"/></svg>"#);
        let c = candidates(&d, TagKind::Color);
        assert_eq!(c.len(), 1);
        assert_eq!(d.element(&c[0]).unwrap().local_name(), "g");
    }

    #[test]
    fn test_locate_by_anchor_nearest_and_ties() {
        let d = doc(
            r#"<svg>
                <rect fill="a" x="0" y="0" width="10" height="10"/>
                <circle fill="b" cx="50" cy="50" r="5"/>
                <rect fill="c" x="0" y="0" width="10" height="10"/>
                <g fill="d"/>
            </svg>"#,
        );
        let hit = locate(&d, TagKind::Color, &Locator::anchor(48.0, 49.0)).unwrap();
        assert_eq!(d.element(&hit).unwrap().attr("fill"), Some("b"));

        let hit = locate(&d, TagKind::Color, &Locator::anchor(5.0, 5.0)).unwrap();
        assert_eq!(d.element(&hit).unwrap().attr("fill"), Some("a"));
    }

    #[test]
    fn test_locate_by_index_bounds() {
        let d = doc("<svg><text>a</text><text>b</text></svg>");
        assert!(locate(&d, TagKind::Text, &Locator::index(1)).is_some());
        assert!(locate(&d, TagKind::Text, &Locator::index(2)).is_none());
        assert!(locate(&d, TagKind::Text, &Locator::index(-1)).is_none());
    }

    #[test]
    fn test_compose_text_and_color() {
        let base = br##"<svg width="10" height="10"><text>A</text><text><tspan>B</tspan></text><rect fill="#fff"/></svg>"##;
        let mut t = Template::new(Layer::new("base.svg").with_size(800.0, 600.0));
        t.tags = vec![
            TaggedVariable::text("t", 1).with_value("Hi <there>"),
            TaggedVariable::color("c", Locator::index(0)).with_value("#123456"),
        ];
        let out = compose_documents(&t, base, &[]).unwrap();
        assert_eq!(
            out.svg,
            r##"<svg width="800" height="600"><text>A</text><text>Hi &lt;there&gt;</text><rect fill="#123456"/></svg>"##
        );
    }

    #[test]
    fn test_base_size_needs_both_extents() {
        let mut graphic = Layer::new("base.svg");
        graphic.width = Some(800.0);
        let t = Template::new(graphic);
        let out = compose_documents(&t, br#"<svg width="10" height="10"/>"#, &[]).unwrap();
        assert_eq!(out.svg, r#"<svg width="10" height="10"/>"#);
    }

    #[test]
    fn test_compose_undefined_text_value_clears() {
        let base = b"<svg><text>A</text></svg>";
        let mut t = Template::new(Layer::new("base.svg"));
        t.tags.push(TaggedVariable::text("t", 0).with_variable("title"));
        let out = compose_documents(&t, base, &[]).unwrap();
        assert_eq!(out.svg, "<svg><text></text></svg>");
    }

    #[test]
    fn test_compose_no_overlays_adds_no_group() {
        let t = Template::new(Layer::new("base.svg"));
        let out = compose_documents(&t, b"<svg/>", &[]).unwrap();
        assert_eq!(out.svg, "<svg/>");
    }

    #[test]
    fn test_html_wrapper() {
        let out = ComposedDocument::new("<svg/>".into());
        let html = out.to_html("finalGraphic");
        assert!(html.contains("<div id=\"finalGraphic\"><svg/></div>"));
        assert_eq!(out.hash, ContentHash::of(b"<svg/>"));
    }
}
