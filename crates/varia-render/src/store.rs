//! Document and template stores.
//!
//! The compositor reads vector documents and the batch pipeline writes raster
//! output through [`DocumentStore`]; templates are looked up by project id
//! through [`TemplateStore`].

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use varia_core::{VariaError, VariaResult};
use varia_ir::Template;

const MAX_RETRIES: usize = 3;
const BACKOFF_MS: u64 = 50;

async fn sleep_backoff(attempt: usize) {
    let ms = BACKOFF_MS.saturating_mul((attempt + 1) as u64);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Opaque-reference blob storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the bytes behind a reference.
    async fn get(&self, reference: &str) -> VariaResult<Vec<u8>>;

    /// Store bytes under `name` and return a public reference to them.
    async fn put(&self, name: &str, bytes: Vec<u8>) -> VariaResult<String>;
}

/// Persisted templates keyed by project id.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get(&self, project_id: &str) -> VariaResult<Template>;
    async fn put(&self, project_id: &str, template: &Template) -> VariaResult<()>;
}

fn join_public(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Resolve a store-relative name below `root`, refusing anything that could
/// escape it.
fn confined_path(root: &Path, name: &str) -> Option<PathBuf> {
    let rel = Path::new(name);
    let mut out = root.to_path_buf();
    let mut any = false;
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                any = true;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    any.then_some(out)
}

fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Documents on the local filesystem under a root directory.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
    public_base: Option<String>,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base: None,
        }
    }

    /// Builder: prefix returned references with a public URL instead of the file path.
    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = Some(base.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn get(&self, reference: &str) -> VariaResult<Vec<u8>> {
        let path = confined_path(&self.root, reference).ok_or_else(|| {
            VariaError::document_load(reference, "reference escapes the store root")
        })?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| VariaError::document_load(reference, e.to_string()))
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> VariaResult<String> {
        let path = confined_path(&self.root, name)
            .ok_or_else(|| VariaError::upload(name, "name escapes the store root"))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VariaError::upload(name, e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| VariaError::upload(name, e.to_string()))?;
        Ok(match &self.public_base {
            Some(base) => join_public(base, name),
            None => path.display().to_string(),
        })
    }
}

/// Documents held in memory. Used by tests and single-process setups.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<HashMap<String, Vec<u8>>>,
    public_base: String,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = base.into();
        self
    }

    pub fn insert(&self, reference: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.docs.write().insert(reference.into(), bytes.into());
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.docs.read().contains_key(reference)
    }

    /// Stored names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.docs.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, reference: &str) -> VariaResult<Vec<u8>> {
        self.docs
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| VariaError::document_load(reference, "not found"))
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> VariaResult<String> {
        self.docs.write().insert(name.to_string(), bytes);
        Ok(if self.public_base.is_empty() {
            name.to_string()
        } else {
            join_public(&self.public_base, name)
        })
    }
}

/// Documents behind an HTTP object-storage endpoint.
///
/// Relative references resolve against `base_url`; absolute `http(s)`
/// references are fetched as-is. Reads retry with linear backoff.
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    client: reqwest::Client,
    base_url: url::Url,
    public_base: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str) -> VariaResult<Self> {
        // A trailing slash keeps the last path segment when joining.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = url::Url::parse(&normalized)
            .map_err(|e| VariaError::invalid_url(base_url, e.to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            public_base: None,
        })
    }

    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = Some(base.into());
        self
    }

    pub fn resolve(&self, reference: &str) -> VariaResult<url::Url> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return url::Url::parse(reference)
                .map_err(|e| VariaError::invalid_url(reference, e.to_string()));
        }
        self.base_url
            .join(reference.trim_start_matches('/'))
            .map_err(|e| VariaError::invalid_url(reference, e.to_string()))
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get(&self, reference: &str) -> VariaResult<Vec<u8>> {
        let url = self.resolve(reference)?;
        let mut last_err = String::from("request failed");
        for attempt in 0..MAX_RETRIES {
            match self.client.get(url.clone()).send().await {
                Ok(res) if res.status().is_success() => {
                    return res
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .map_err(|e| VariaError::document_load(reference, e.to_string()));
                }
                Ok(res) => {
                    let status = res.status();
                    let body = res.text().await.unwrap_or_default();
                    last_err = format!("{}: {}", status, body);
                    // Client errors will not change on retry.
                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => last_err = e.to_string(),
            }
            if attempt + 1 < MAX_RETRIES {
                sleep_backoff(attempt).await;
            }
        }
        Err(VariaError::document_load(reference, last_err))
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> VariaResult<String> {
        let url = self.resolve(name)?;
        let res = self
            .client
            .put(url.clone())
            .header(reqwest::header::CONTENT_TYPE, content_type_for(name))
            .body(bytes)
            .send()
            .await
            .map_err(|e| VariaError::upload(name, e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VariaError::upload(name, format!("{}: {}", status, body)));
        }
        Ok(match &self.public_base {
            Some(base) => join_public(base, name),
            None => url.to_string(),
        })
    }
}

/// Templates stored as `<dir>/<projectId>.json`.
#[derive(Debug, Clone)]
pub struct FsTemplateStore {
    dir: PathBuf,
}

impl FsTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, project_id: &str) -> VariaResult<PathBuf> {
        let valid = !project_id.is_empty()
            && project_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !project_id.starts_with('.');
        if !valid {
            return Err(VariaError::InvalidRequest(format!(
                "invalid project id '{}'",
                project_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", project_id)))
    }
}

#[async_trait]
impl TemplateStore for FsTemplateStore {
    async fn get(&self, project_id: &str) -> VariaResult<Template> {
        let path = self.path_for(project_id)?;
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VariaError::TemplateNotFound(project_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Template::from_json(&json)
    }

    async fn put(&self, project_id: &str, template: &Template) -> VariaResult<()> {
        let path = self.path_for(project_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, template.to_json_pretty()?).await?;
        tracing::debug!("saved template {} to {}", project_id, path.display());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    templates: RwLock<HashMap<String, Template>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project_id: impl Into<String>, template: Template) {
        self.templates.write().insert(project_id.into(), template);
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn get(&self, project_id: &str) -> VariaResult<Template> {
        self.templates
            .read()
            .get(project_id)
            .cloned()
            .ok_or_else(|| VariaError::TemplateNotFound(project_id.to_string()))
    }

    async fn put(&self, project_id: &str, template: &Template) -> VariaResult<()> {
        self.insert(project_id, template.clone());
        Ok(())
    }
}
