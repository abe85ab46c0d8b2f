//! Stores and services assembled from configuration, shared by the CLI
//! commands and the render server.

use std::sync::Arc;

use anyhow::{Context, Result};

use varia_core::{VariaConfig, VariaResult};
use varia_ir::RenderRequest;
use varia_render::{
    ComposedDocument, Compositor, DocumentStore, FsDocumentStore, FsTemplateStore,
    HttpDocumentStore, TemplateStore,
};
use varia_web::{PlaywrightRasterizer, Rasterizer};

pub struct AppContext {
    pub config: VariaConfig,
    pub documents: Arc<dyn DocumentStore>,
    pub templates: Arc<dyn TemplateStore>,
}

impl AppContext {
    pub fn new(
        config: VariaConfig,
        documents: Arc<dyn DocumentStore>,
        templates: Arc<dyn TemplateStore>,
    ) -> Self {
        Self {
            config,
            documents,
            templates,
        }
    }

    pub fn from_config(config: VariaConfig) -> Result<Self> {
        let storage = &config.storage;
        let documents: Arc<dyn DocumentStore> = match storage.kind.as_str() {
            "fs" => {
                let mut store = FsDocumentStore::new(&storage.root);
                if let Some(base) = &storage.public_base_url {
                    store = store.with_public_base(base.clone());
                }
                Arc::new(store)
            }
            "http" => {
                let base = storage
                    .base_url
                    .as_deref()
                    .context("storage.base_url is required when storage.kind = \"http\"")?;
                let mut store = HttpDocumentStore::new(base)?;
                if let Some(public) = &storage.public_base_url {
                    store = store.with_public_base(public.clone());
                }
                Arc::new(store)
            }
            other => anyhow::bail!("unknown storage kind '{}' (expected fs or http)", other),
        };
        let templates = Arc::new(FsTemplateStore::new(&storage.templates_dir));
        Ok(Self::new(config, documents, templates))
    }

    pub fn rasterizer(&self) -> Result<Arc<dyn Rasterizer>> {
        let rasterizer = PlaywrightRasterizer::from_config(&self.config.rasterizer)
            .context("failed to set up the Playwright rasterizer")?;
        Ok(Arc::new(rasterizer))
    }

    /// Look up the request's template, apply its overrides and compose it.
    pub async fn compose(&self, request: &RenderRequest) -> VariaResult<ComposedDocument> {
        let template = self.templates.get(&request.project_id).await?;
        let resolved = request.resolve(&template);
        Compositor::new(Arc::clone(&self.documents))
            .compose(&resolved)
            .await
    }

    /// Id of the element the rendered page wraps the document in.
    pub fn marker_id(&self) -> &str {
        let selector = self.config.rasterizer.ready_selector.as_str();
        selector.strip_prefix('#').unwrap_or(selector)
    }

    /// Public `/generate` URL for an encoded query string.
    pub fn generate_url(&self, query: &str) -> String {
        let base = self.config.server.public_url.trim_end_matches('/');
        if query.is_empty() {
            format!("{}/generate", base)
        } else {
            format!("{}/generate?{}", base, query)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_and_urls() {
        let mut config = VariaConfig::default();
        config.server.public_url = "http://render.local:8080/".into();
        let ctx = AppContext::from_config(config).unwrap();
        assert_eq!(ctx.marker_id(), "finalGraphic");
        assert_eq!(
            ctx.generate_url("projectId=p&title=Hi"),
            "http://render.local:8080/generate?projectId=p&title=Hi"
        );
        assert_eq!(ctx.generate_url(""), "http://render.local:8080/generate");
    }

    #[test]
    fn test_storage_kinds() {
        let mut config = VariaConfig::default();
        config.storage.kind = "http".into();
        assert!(AppContext::from_config(config.clone()).is_err());
        config.storage.base_url = Some("https://bucket.example.com".into());
        assert!(AppContext::from_config(config.clone()).is_ok());
        config.storage.kind = "s3".into();
        assert!(AppContext::from_config(config).is_err());
    }
}
