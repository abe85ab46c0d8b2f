use std::sync::Arc;

use varia_core::VariaError;
use varia_ir::{resolve, Layer, Locator, ParameterOverrides, TaggedVariable, Template};
use varia_render::{Compositor, MemoryDocumentStore, SvgDocument};

const BASE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="300">
  <rect id="bg" style="fill:#fff;stroke:red" x="0" y="0" width="400" height="300"/>
  <text id="title">Title</text>
  <text id="subtitle">Subtitle</text>
</svg>"##;

fn overlay(tag: &str) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 200 100"><{tag}/></svg>"#,
        tag = tag
    )
}

fn store() -> Arc<MemoryDocumentStore> {
    let store = MemoryDocumentStore::new();
    store.insert("graphics/base.svg", BASE);
    store.insert("images/a.svg", overlay("a"));
    store.insert("images/b.svg", overlay("b"));
    store.insert("images/c.svg", overlay("c"));
    store.insert("images/broken.svg", "<svg><g></svg>");
    Arc::new(store)
}

fn template() -> Template {
    let mut t = Template::new(Layer::new("graphics/base.svg"));
    t.tags = vec![
        TaggedVariable::text("t1", 0).with_variable("title"),
        TaggedVariable::color("c1", Locator::index(0))
            .with_value("#fff")
            .with_variable("background"),
    ];
    t
}

fn text_of(svg: &str, id: &str) -> String {
    let doc = SvgDocument::parse(svg).unwrap();
    let path = doc.find_paths(|e| e.attr("id") == Some(id)).remove(0);
    doc.element(&path).unwrap().text_content()
}

#[tokio::test]
async fn test_text_tag_replaces_only_its_element() {
    let compositor = Compositor::new(store());
    let resolved = resolve(&template(), &ParameterOverrides::new().with("title", "Hello"));
    let out = compositor.compose(&resolved).await.unwrap();

    assert_eq!(text_of(&out.svg, "title"), "Hello");
    assert_eq!(text_of(&out.svg, "subtitle"), "Subtitle");
}

#[tokio::test]
async fn test_out_of_range_index_is_ignored() {
    let mut t = template();
    t.tags.push(TaggedVariable::text("t9", 9).with_variable("nothing"));
    let resolved = resolve(&t, &ParameterOverrides::new().with("nothing", "x"));
    let out = Compositor::new(store()).compose(&resolved).await.unwrap();

    assert_eq!(text_of(&out.svg, "title"), "");
    assert_eq!(text_of(&out.svg, "subtitle"), "Subtitle");
    assert!(!out.svg.contains(">x<"));
}

#[tokio::test]
async fn test_style_fill_is_rewritten_in_place() {
    let resolved = resolve(
        &template(),
        &ParameterOverrides::new().with("background", "#000"),
    );
    let out = Compositor::new(store()).compose(&resolved).await.unwrap();
    assert!(out.svg.contains(r##"style="fill: #000;stroke:red""##));
}

#[tokio::test]
async fn test_layer_scaled_from_view_box() {
    let mut t = template();
    t.images.push(
        Layer::new("images/a.svg")
            .with_position(10.0, 20.0)
            .with_size(100.0, 50.0),
    );
    let out = Compositor::new(store())
        .compose(&resolve(&t, &ParameterOverrides::new()))
        .await
        .unwrap();
    assert!(out.svg.contains(
        r#"<g id="additionalImages"><g transform="translate(10, 20) scale(0.5, 0.5)"><a/></g></g></svg>"#
    ));
}

#[tokio::test]
async fn test_layers_painted_in_ascending_order() {
    let mut t = template();
    t.images = vec![
        Layer::new("images/c.svg").with_order(2),
        Layer::new("images/a.svg").with_order(0),
        Layer::new("images/b.svg").with_order(1),
    ];
    let out = Compositor::new(store())
        .compose(&resolve(&t, &ParameterOverrides::new()))
        .await
        .unwrap();
    let a = out.svg.find("<a/>").unwrap();
    let b = out.svg.find("<b/>").unwrap();
    let c = out.svg.find("<c/>").unwrap();
    assert!(a < b && b < c);
    assert_eq!(out.svg.matches("additionalImages").count(), 1);
}

#[tokio::test]
async fn test_layer_reference_replaced_by_override() {
    let mut t = template();
    t.images.push(Layer::new("images/a.svg").with_variable("logo"));
    let resolved = resolve(&t, &ParameterOverrides::new().with("logo", "images/b.svg"));
    let out = Compositor::new(store()).compose(&resolved).await.unwrap();
    assert!(out.svg.contains("<b/>"));
    assert!(!out.svg.contains("<a/>"));
}

#[tokio::test]
async fn test_composing_twice_is_identical() {
    let mut t = template();
    t.images.push(Layer::new("images/a.svg").with_size(20.0, 20.0));
    let resolved = resolve(&t, &ParameterOverrides::new().with("title", "Same"));
    let compositor = Compositor::new(store());

    let first = compositor.compose(&resolved).await.unwrap();
    let second = compositor.compose(&resolved).await.unwrap();
    assert_eq!(first.svg, second.svg);
    assert_eq!(first.hash, second.hash);
}

#[tokio::test]
async fn test_missing_document_fails() {
    let mut t = template();
    t.images.push(Layer::new("images/missing.svg"));
    let err = Compositor::new(store())
        .compose(&resolve(&t, &ParameterOverrides::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, VariaError::DocumentLoad { .. }));
}

#[tokio::test]
async fn test_malformed_overlay_fails() {
    let mut t = template();
    t.images.push(Layer::new("images/broken.svg"));
    let err = Compositor::new(store())
        .compose(&resolve(&t, &ParameterOverrides::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, VariaError::MalformedDocument(_)));
}

#[tokio::test]
async fn test_mixed_addressing_is_rejected() {
    let mut t = template();
    t.tags.push(TaggedVariable::color("c2", Locator::anchor(1.0, 1.0)));
    let err = Compositor::new(store())
        .compose(&resolve(&t, &ParameterOverrides::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, VariaError::InvalidTemplate(_)));
}

async fn compose_single_overlay(overlay_svg: &str, layer: Layer) -> String {
    let store = MemoryDocumentStore::new();
    store.insert("graphics/base.svg", BASE);
    store.insert("images/overlay.svg", overlay_svg);
    let mut t = template();
    t.images.push(layer);
    Compositor::new(Arc::new(store))
        .compose(&resolve(&t, &ParameterOverrides::new()))
        .await
        .unwrap()
        .svg
}

#[tokio::test]
async fn test_zero_size_attributes_fall_back_to_view_box() {
    let svg = compose_single_overlay(
        r#"<svg width="0" height="0" viewBox="0 0 200 100"><a/></svg>"#,
        Layer::new("images/overlay.svg").with_size(100.0, 50.0),
    )
    .await;
    assert!(svg.contains(r#"<g transform="translate(0, 0) scale(0.5, 0.5)"><a/></g>"#));
}

#[tokio::test]
async fn test_explicit_size_takes_precedence_over_view_box() {
    let svg = compose_single_overlay(
        r#"<svg width="50" height="25" viewBox="10 20 200 100"><a/></svg>"#,
        Layer::new("images/overlay.svg")
            .with_position(5.0, 5.0)
            .with_size(100.0, 50.0),
    )
    .await;
    assert!(svg.contains(r#"<g transform="translate(5, 5) scale(2, 2)"><a/></g>"#));
}

#[tokio::test]
async fn test_view_box_origin_shifts_translation() {
    let svg = compose_single_overlay(
        r#"<svg viewBox="10 20 200 100"><a/></svg>"#,
        Layer::new("images/overlay.svg")
            .with_position(30.0, 40.0)
            .with_size(100.0, 50.0),
    )
    .await;
    // translate(30 - 10 * 0.5, 40 - 20 * 0.5)
    assert!(svg.contains(r#"<g transform="translate(25, 30) scale(0.5, 0.5)"><a/></g>"#));
}

#[tokio::test]
async fn test_overlay_namespace_prefixes_stay_bound() {
    let svg = compose_single_overlay(
        r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" viewBox="0 0 10 10"><use xlink:href="#a"/></svg>"##,
        Layer::new("images/overlay.svg"),
    )
    .await;
    assert!(svg.contains(
        r##"<g transform="translate(0, 0) scale(1, 1)" xmlns:xlink="http://www.w3.org/1999/xlink"><use xlink:href="#a"/></g>"##
    ));
    SvgDocument::parse(&svg).unwrap();
}
