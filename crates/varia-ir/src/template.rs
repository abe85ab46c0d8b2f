use serde::{Deserialize, Serialize};

use varia_core::{Point2D, Size2D, VariaError, VariaResult};

/// One vector-document reference placed on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Opaque document reference resolved through a document store.
    #[serde(alias = "file")]
    pub file_name: String,
    /// Runtime parameter that may replace `file_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Z-order, ascending from bottom to top.
    #[serde(default)]
    pub order: i64,
}

impl Layer {
    /// Create a layer referencing a document, at the origin, with no target size.
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            id: None,
            file_name: file_name.into(),
            variable_name: None,
            x: None,
            y: None,
            width: None,
            height: None,
            order: 0,
        }
    }

    /// Builder: set position.
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    /// Builder: set target size.
    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Builder: set z-order.
    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    /// Builder: bind the document reference to a runtime variable.
    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variable_name = Some(name.into());
        self
    }

    /// Declared position, missing coordinates default to zero.
    pub fn position(&self) -> Point2D {
        Point2D::new(self.x.unwrap_or(0.0), self.y.unwrap_or(0.0))
    }

    /// Declared target size, when both extents are present.
    pub fn target_size(&self) -> Option<Size2D> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(Size2D::new(w, h)),
            _ => None,
        }
    }

    /// Key looked up in the overrides to replace this layer's document:
    /// the variable name, or the file name itself when no variable is bound.
    pub fn binding_key(&self) -> &str {
        self.variable_name.as_deref().unwrap_or(&self.file_name)
    }
}

/// The substitution algorithm a tag applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Text,
    Color,
}

impl std::fmt::Display for TagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagKind::Text => write!(f, "text"),
            TagKind::Color => write!(f, "color"),
        }
    }
}

/// How a tag finds its target element inside the base document.
///
/// Serialized flat on the tag: `{"index": 3}` or `{"x": 10, "y": 20}`.
/// A tag carrying both forms is read as `ByIndex`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    /// Ordinal position in the document-order candidate list.
    ByIndex { index: i64 },
    /// Legacy mode: nearest candidate to a point in document coordinates.
    ByAnchor { x: f64, y: f64 },
}

impl Locator {
    pub fn index(index: i64) -> Self {
        Locator::ByIndex { index }
    }

    pub fn anchor(x: f64, y: f64) -> Self {
        Locator::ByAnchor { x, y }
    }

    pub fn is_anchor(&self) -> bool {
        matches!(self, Locator::ByAnchor { .. })
    }
}

/// A substitution point inside the base document, bound to a runtime variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedVariable {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fabric_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: TagKind,
    #[serde(flatten)]
    pub locator: Locator,
    /// Effective value. Before resolution this is the stored default and,
    /// when `variable_name` is absent, also the name of the binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,
}

impl TaggedVariable {
    pub fn text(id: impl Into<String>, index: i64) -> Self {
        Self {
            id: id.into(),
            fabric_id: None,
            kind: TagKind::Text,
            locator: Locator::index(index),
            value: None,
            variable_name: None,
        }
    }

    pub fn color(id: impl Into<String>, locator: Locator) -> Self {
        Self {
            id: id.into(),
            fabric_id: None,
            kind: TagKind::Color,
            locator,
            value: None,
            variable_name: None,
        }
    }

    /// Builder: set the stored value.
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Builder: bind to a runtime variable.
    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variable_name = Some(name.into());
        self
    }

    /// Override key for this tag: `variableName`, else `value`.
    pub fn binding_key(&self) -> Option<&str> {
        self.variable_name.as_deref().or(self.value.as_deref())
    }
}

/// A reusable graphic definition (persisted as the `ExportSchema` document).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub graphic: Layer,
    #[serde(default)]
    pub tags: Vec<TaggedVariable>,
    #[serde(default)]
    pub images: Vec<Layer>,
}

/// Name used by the template store documents.
pub type ExportSchema = Template;

impl Template {
    pub fn new(graphic: Layer) -> Self {
        Self {
            graphic,
            tags: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> VariaResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> VariaResult<String> {
        serde_json::to_string_pretty(self).map_err(VariaError::from)
    }

    /// Overlay layers in paint order (ascending `order`, stable for ties).
    pub fn layers_in_paint_order(&self) -> Vec<&Layer> {
        let mut layers: Vec<&Layer> = self.images.iter().collect();
        layers.sort_by_key(|l| l.order);
        layers
    }

    pub fn tags_of(&self, kind: TagKind) -> impl Iterator<Item = &TaggedVariable> {
        self.tags.iter().filter(move |t| t.kind == kind)
    }
}
