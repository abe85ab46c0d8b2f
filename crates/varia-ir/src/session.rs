//! Editor session state.
//!
//! The tagging workflow is an explicit, serializable value driven by a pure
//! reducer: [`EditorSession::apply`] takes an action and returns the next
//! session, leaving the previous one intact. The session exports the
//! [`Template`] persisted to the template store and the parameterized render
//! URL handed to batch callers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use varia_core::{VariaError, VariaResult};

use crate::request::PROJECT_ID_PARAM;
use crate::template::{Layer, Locator, TagKind, TaggedVariable, Template};
use crate::validate::validate_template;

/// A document uploaded into the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: String,
    pub name: String,
    /// Document store reference the upload was written to.
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    pub order: i64,
}

/// The element currently picked inside the graphic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub kind: TagKind,
    pub locator: Locator,
    /// Current text or fill of the element.
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fabric_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EditorAction {
    SetProjectId { project_id: String },
    AddUpload { name: String, reference: String },
    RemoveUpload { id: String },
    TagAsGraphic { id: String },
    SetVariableName { id: String, name: String },
    Place {
        id: String,
        x: f64,
        y: f64,
        width: Option<f64>,
        height: Option<f64>,
    },
    Select { selection: Selection },
    EditSelection { value: String },
    ClearSelection,
    TagSelection { variable_name: String },
    Untag { tag_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorSession {
    pub project_id: String,
    pub uploads: Vec<Upload>,
    pub graphic_id: Option<String>,
    pub tags: Vec<TaggedVariable>,
    pub selection: Option<Selection>,
}

impl EditorSession {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    /// Apply one action, returning the next session state.
    pub fn apply(&self, action: EditorAction) -> VariaResult<EditorSession> {
        let mut next = self.clone();
        match action {
            EditorAction::SetProjectId { project_id } => next.project_id = project_id,
            EditorAction::AddUpload { name, reference } => {
                let order = next.uploads.iter().map(|u| u.order + 1).max().unwrap_or(0);
                next.uploads.push(Upload {
                    id: Uuid::new_v4().to_string(),
                    name,
                    reference,
                    variable_name: None,
                    x: None,
                    y: None,
                    width: None,
                    height: None,
                    order,
                });
            }
            EditorAction::RemoveUpload { id } => {
                next.upload_index(&id)?;
                next.uploads.retain(|u| u.id != id);
                if next.graphic_id.as_deref() == Some(id.as_str()) {
                    next.graphic_id = None;
                    next.tags.clear();
                    next.selection = None;
                }
            }
            EditorAction::TagAsGraphic { id } => {
                next.upload_index(&id)?;
                if next.graphic_id.as_deref() != Some(id.as_str()) {
                    // Tag locators are only meaningful against the graphic they were made on.
                    next.tags.clear();
                }
                next.graphic_id = Some(id);
                next.selection = None;
            }
            EditorAction::SetVariableName { id, name } => {
                let i = next.upload_index(&id)?;
                let name = name.trim();
                next.uploads[i].variable_name = (!name.is_empty()).then(|| name.to_string());
            }
            EditorAction::Place {
                id,
                x,
                y,
                width,
                height,
            } => {
                let i = next.upload_index(&id)?;
                let upload = &mut next.uploads[i];
                upload.x = Some(x);
                upload.y = Some(y);
                upload.width = width;
                upload.height = height;
            }
            EditorAction::Select { selection } => {
                if next.graphic_id.is_none() {
                    return Err(VariaError::InvalidRequest(
                        "select requires a tagged graphic".into(),
                    ));
                }
                next.selection = Some(selection);
            }
            EditorAction::EditSelection { value } => match next.selection.as_mut() {
                Some(sel) => sel.value = value,
                None => return Err(VariaError::InvalidRequest("nothing selected".into())),
            },
            EditorAction::ClearSelection => next.selection = None,
            EditorAction::TagSelection { variable_name } => {
                let sel = next
                    .selection
                    .clone()
                    .ok_or_else(|| VariaError::InvalidRequest("nothing selected".into()))?;
                let variable_name = variable_name.trim().to_string();
                if variable_name.is_empty() {
                    return Err(VariaError::InvalidRequest("variable name is empty".into()));
                }
                let already = next
                    .tags
                    .iter()
                    .any(|t| t.kind == sel.kind && t.locator == sel.locator);
                if !already {
                    next.tags.push(TaggedVariable {
                        id: Uuid::new_v4().to_string(),
                        fabric_id: sel.fabric_id,
                        kind: sel.kind,
                        locator: sel.locator,
                        value: Some(sel.value),
                        variable_name: Some(variable_name),
                    });
                }
            }
            EditorAction::Untag { tag_id } => next.tags.retain(|t| t.id != tag_id),
        }
        Ok(next)
    }

    fn upload_index(&self, id: &str) -> VariaResult<usize> {
        self.uploads
            .iter()
            .position(|u| u.id == id)
            .ok_or_else(|| VariaError::InvalidRequest(format!("unknown upload '{}'", id)))
    }

    /// Build the template for the current session.
    pub fn export(&self) -> VariaResult<Template> {
        let graphic_id = self
            .graphic_id
            .as_deref()
            .ok_or_else(|| VariaError::InvalidTemplate("no upload tagged as graphic".into()))?;

        let mut graphic = None;
        let mut images = Vec::new();
        for upload in &self.uploads {
            let layer = Layer {
                id: Some(upload.id.clone()),
                file_name: upload.reference.clone(),
                variable_name: upload.variable_name.clone(),
                x: upload.x,
                y: upload.y,
                width: upload.width,
                height: upload.height,
                order: upload.order,
            };
            if upload.id == graphic_id {
                graphic = Some(layer);
            } else {
                images.push(layer);
            }
        }

        let template = Template {
            graphic: graphic.ok_or_else(|| {
                VariaError::InvalidTemplate(format!("graphic '{}' is not uploaded", graphic_id))
            })?,
            tags: self.tags.clone(),
            images,
        };

        validate_template(&template).map_err(|errors| {
            let msgs: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
            VariaError::InvalidTemplate(msgs.join("; "))
        })?;
        Ok(template)
    }

    /// Render URL with one `{{variable}}` placeholder per bound variable,
    /// ready to be filled from tabular input.
    pub fn export_url(&self, base: &str) -> VariaResult<url::Url> {
        let mut url = url::Url::parse(base)
            .and_then(|u| u.join("generate"))
            .map_err(|e| VariaError::invalid_url(base, e.to_string()))?;

        let mut names: Vec<&str> = Vec::new();
        let tag_vars = self.tags.iter().filter_map(|t| t.variable_name.as_deref());
        let layer_vars = self
            .uploads
            .iter()
            .filter(|u| self.graphic_id.as_deref() != Some(u.id.as_str()))
            .filter_map(|u| u.variable_name.as_deref());
        for name in tag_vars.chain(layer_vars) {
            if !names.contains(&name) {
                names.push(name);
            }
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair(PROJECT_ID_PARAM, &self.project_id);
            for name in names {
                query.append_pair(name, &format!("{{{{{}}}}}", name));
            }
        }
        Ok(url)
    }
}
