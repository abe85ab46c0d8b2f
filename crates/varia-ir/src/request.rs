//! Query-parameter protocol between callers and the render entry point.
//!
//! `projectId` selects the template, `graphicName` / `graphicUrl` replace the
//! base document reference, and every other parameter is an override.

use varia_core::{VariaError, VariaResult};

use crate::overrides::{resolve, ParameterOverrides, ResolvedTemplate};
use crate::template::Template;

pub const PROJECT_ID_PARAM: &str = "projectId";
pub const GRAPHIC_NAME_PARAM: &str = "graphicName";
pub const GRAPHIC_URL_PARAM: &str = "graphicUrl";

/// A parsed render request.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub project_id: String,
    /// Replacement for the template's base document reference.
    pub graphic: Option<String>,
    pub overrides: ParameterOverrides,
}

impl RenderRequest {
    /// Split query pairs into the reserved parameters and the overrides.
    /// Later duplicates of a key win.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> VariaResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut project_id = None;
        let mut graphic_name = None;
        let mut graphic_url = None;
        let mut overrides = ParameterOverrides::new();

        for (key, value) in pairs {
            let value = value.into();
            match key.as_ref() {
                PROJECT_ID_PARAM => project_id = Some(value),
                GRAPHIC_NAME_PARAM => graphic_name = Some(value),
                GRAPHIC_URL_PARAM => graphic_url = Some(value),
                other => overrides.insert(other, value),
            }
        }

        let project_id = project_id
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| VariaError::InvalidRequest(format!("missing `{}`", PROJECT_ID_PARAM)))?;

        Ok(Self {
            project_id,
            graphic: graphic_name.or(graphic_url).filter(|g| !g.is_empty()),
            overrides,
        })
    }

    /// Parse the query string of a URL.
    pub fn from_url(url: &url::Url) -> VariaResult<Self> {
        Self::from_query_pairs(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())))
    }

    /// Resolve `template` against this request's overrides and graphic reference.
    pub fn resolve(&self, template: &Template) -> ResolvedTemplate {
        let mut resolved = resolve(template, &self.overrides);
        if let Some(graphic) = &self.graphic {
            resolved.template.graphic.file_name = graphic.clone();
        }
        resolved
    }
}
