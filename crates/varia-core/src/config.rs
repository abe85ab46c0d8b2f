use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{VariaError, VariaResult};

/// Default file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "varia.config.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL of the render server. The rasterizer
    /// navigates to `<public_url>/generate?...`.
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            public_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RasterizerConfig {
    pub node: String,
    /// Path to the capture script. Resolved against the working directory
    /// when unset.
    pub script: Option<PathBuf>,
    /// CSS selector of the element whose presence marks the page as ready.
    pub ready_selector: String,
    pub timeout_ms: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_scale_factor: f64,
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        Self {
            node: "node".to_string(),
            script: None,
            ready_selector: "#finalGraphic".to_string(),
            timeout_ms: 30_000,
            viewport_width: 1920,
            viewport_height: 1080,
            device_scale_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: String, // "fs" | "http"
    /// Filesystem root for documents and uploads (kind = "fs").
    pub root: PathBuf,
    /// Base URL for GET/PUT (kind = "http").
    pub base_url: Option<String>,
    /// Prefix used to build public references for uploaded objects.
    pub public_base_url: Option<String>,
    /// Directory holding `<projectId>.json` templates.
    pub templates_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: "fs".to_string(),
            root: PathBuf::from("storage"),
            base_url: None,
            public_base_url: None,
            templates_dir: PathBuf::from("templates"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
    /// Row column used to name uploaded images.
    pub id_column: String,
    pub retries: u32,
    /// Extra time granted past the rasterizer timeout before a row is
    /// abandoned by the pipeline itself.
    pub render_grace_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            id_column: "projectId".to_string(),
            retries: 0,
            render_grace_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct VariaConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rasterizer: RasterizerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl VariaConfig {
    pub fn load_from_file(path: &Path) -> VariaResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| VariaError::Config {
            message: e.to_string(),
            path: path.to_path_buf(),
        })
    }

    /// Load `path` if it exists, otherwise fall back to defaults. A file that
    /// exists but fails to parse is still an error.
    pub fn load_or_default(path: &Path) -> VariaResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to_file(&self, path: &Path) -> VariaResult<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| VariaError::Config {
            message: e.to_string(),
            path: path.to_path_buf(),
        })?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
