/// Core error types for the Varia renderer.
use std::path::PathBuf;

/// A specialized Result type for Varia operations.
pub type VariaResult<T> = Result<T, VariaError>;

/// Top-level error type encompassing all Varia subsystems.
#[derive(Debug, thiserror::Error)]
pub enum VariaError {
    /// A referenced document could not be fetched from its store.
    #[error("document load error: {message} ({reference})")]
    DocumentLoad { reference: String, message: String },

    /// A document could not be parsed as SVG/XML.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// The rasterizer could not navigate to the target URL.
    #[error("navigation error: {message} ({url})")]
    Navigation { url: String, message: String },

    /// The ready marker did not appear before the deadline.
    #[error("render timed out after {timeout_ms}ms waiting for '{marker}' ({url})")]
    RenderTimeout {
        url: String,
        marker: String,
        timeout_ms: u64,
    },

    /// The page loaded but no image could be captured.
    #[error("capture error: {0}")]
    Capture(String),

    /// Writing raster output to the object store failed.
    #[error("upload error: {message} ({name})")]
    Upload { name: String, message: String },

    #[error("template not found for project '{0}'")]
    TemplateNotFound(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid url '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Tabular input could not be read.
    #[error("parse error: {message} at {file}:{line}")]
    Parse {
        message: String,
        file: String,
        line: usize,
    },

    #[error("config error: {message} ({path:?})")]
    Config { message: String, path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl VariaError {
    /// Create a document load error.
    pub fn document_load(reference: impl Into<String>, message: impl Into<String>) -> Self {
        VariaError::DocumentLoad {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create an upload error.
    pub fn upload(name: impl Into<String>, message: impl Into<String>) -> Self {
        VariaError::Upload {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a tabular-input parse error with source location.
    pub fn parse(message: impl Into<String>, file: impl Into<String>, line: usize) -> Self {
        VariaError::Parse {
            message: message.into(),
            file: file.into(),
            line,
        }
    }

    /// Create an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        VariaError::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Whether a retry of the same operation could plausibly succeed.
    ///
    /// Parse failures and invalid input are deterministic; network, browser
    /// and storage failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VariaError::DocumentLoad { .. }
                | VariaError::Navigation { .. }
                | VariaError::RenderTimeout { .. }
                | VariaError::Capture(_)
                | VariaError::Upload { .. }
                | VariaError::Io(_)
        )
    }
}
