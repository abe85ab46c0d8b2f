//! Playwright-driven rasterizer.
//!
//! Each render spawns `node scripts/rasterize.js`, writes one JSON request
//! line to its stdin and reads one JSON response line from its stdout:
//!
//! ```text
//! -> {"type":"render","url":..,"selector":..,"timeoutMs":..,"viewport":{..},"deviceScaleFactor":..}
//! <- {"type":"image","data":"<base64 png>"}
//! <- {"type":"error","stage":"navigation"|"timeout"|"capture","error":".."}
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use varia_core::{RasterizerConfig, VariaError, VariaResult};

use crate::backend::{RasterImage, RasterRequest, Rasterizer};

const SCRIPT_NAME: &str = "rasterize.js";

/// Extra time the helper process gets beyond the page timeout before it is killed.
const DEFAULT_PROCESS_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "render", rename_all = "camelCase")]
struct RenderMessage<'a> {
    url: &'a str,
    selector: &'a str,
    timeout_ms: u64,
    viewport: Viewport,
    device_scale_factor: f64,
}

#[derive(Debug, Serialize)]
struct Viewport {
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ResponseMessage {
    Image { data: String },
    Error { stage: ErrorStage, error: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ErrorStage {
    Navigation,
    Timeout,
    Capture,
}

pub struct PlaywrightRasterizer {
    node: String,
    script: PathBuf,
    grace: Duration,
}

impl PlaywrightRasterizer {
    pub fn new(node: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            node: node.into(),
            script: script.into(),
            grace: DEFAULT_PROCESS_GRACE,
        }
    }

    /// Build from configuration, locating the helper script when the config
    /// does not name one.
    pub fn from_config(config: &RasterizerConfig) -> VariaResult<Self> {
        let script = match &config.script {
            Some(path) => path.clone(),
            None => locate_script()?,
        };
        Ok(Self::new(config.node.clone(), script))
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    async fn run(&self, request: &RasterRequest) -> VariaResult<String> {
        let mut child = Command::new(&self.node)
            .arg(&self.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VariaError::Capture(format!(
                    "failed to spawn {} {}: {}",
                    self.node,
                    self.script.display(),
                    e
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VariaError::Capture("rasterizer stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VariaError::Capture("rasterizer stdout not available".into()))?;

        let msg = request_line(request)?;
        stdin
            .write_all(msg.as_bytes())
            .await
            .map_err(|e| VariaError::Capture(format!("failed to send request: {}", e)))?;
        drop(stdin);

        let mut line = String::new();
        BufReader::new(stdout)
            .read_line(&mut line)
            .await
            .map_err(|e| VariaError::Capture(format!("failed to read response: {}", e)))?;

        // Let the helper close its browser; `kill_on_drop` covers a hang.
        let _ = tokio::time::timeout(self.grace, child.wait()).await;
        Ok(line)
    }
}

#[async_trait]
impl Rasterizer for PlaywrightRasterizer {
    async fn render(&self, request: &RasterRequest) -> VariaResult<RasterImage> {
        tracing::debug!("rasterizing {}", request.url);
        let deadline = request.timeout + self.grace;
        let line = match tokio::time::timeout(deadline, self.run(request)).await {
            Ok(line) => line?,
            Err(_) => {
                return Err(VariaError::RenderTimeout {
                    url: request.url.clone(),
                    marker: request.ready_selector.clone(),
                    timeout_ms: request.timeout.as_millis() as u64,
                })
            }
        };
        parse_response(&line, request)
    }
}

fn request_line(request: &RasterRequest) -> VariaResult<String> {
    let msg = RenderMessage {
        url: &request.url,
        selector: &request.ready_selector,
        timeout_ms: request.timeout.as_millis() as u64,
        viewport: Viewport {
            width: request.viewport_width,
            height: request.viewport_height,
        },
        device_scale_factor: request.device_scale_factor,
    };
    Ok(serde_json::to_string(&msg)? + "\n")
}

/// Interpret one response line from the helper script.
fn parse_response(line: &str, request: &RasterRequest) -> VariaResult<RasterImage> {
    if line.trim().is_empty() {
        return Err(VariaError::Capture(
            "rasterizer exited without a response".into(),
        ));
    }
    let msg: ResponseMessage = serde_json::from_str(line.trim())
        .map_err(|e| VariaError::Capture(format!("unreadable rasterizer response: {}", e)))?;

    match msg {
        ResponseMessage::Image { data } => {
            let bytes = general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|e| VariaError::Capture(format!("invalid base64 image: {}", e)))?;
            let img = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
                .map_err(|e| VariaError::Capture(format!("invalid PNG: {}", e)))?;
            Ok(RasterImage {
                width: img.width(),
                height: img.height(),
                bytes,
            })
        }
        ResponseMessage::Error { stage, error } => Err(match stage {
            ErrorStage::Navigation => VariaError::Navigation {
                url: request.url.clone(),
                message: error,
            },
            ErrorStage::Timeout => VariaError::RenderTimeout {
                url: request.url.clone(),
                marker: request.ready_selector.clone(),
                timeout_ms: request.timeout.as_millis() as u64,
            },
            ErrorStage::Capture => VariaError::Capture(error),
        }),
    }
}

/// Find `rasterize.js` relative to the working directory, then next to this crate.
fn locate_script() -> VariaResult<PathBuf> {
    let cwd = std::env::current_dir()?;
    let candidates = [
        cwd.join("crates").join("varia-web").join("scripts").join(SCRIPT_NAME),
        cwd.join("scripts").join(SCRIPT_NAME),
        Path::new(env!("CARGO_MANIFEST_DIR")).join("scripts").join(SCRIPT_NAME),
    ];
    candidates
        .iter()
        .find(|p| p.exists())
        .cloned()
        .ok_or_else(|| VariaError::Other(format!("could not find scripts/{}", SCRIPT_NAME)))
}
