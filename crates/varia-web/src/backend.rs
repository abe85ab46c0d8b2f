use std::time::Duration;

use async_trait::async_trait;

use varia_core::{RasterizerConfig, VariaResult};

/// One page to rasterize.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterRequest {
    pub url: String,
    /// CSS selector of the element that signals the page is ready; it is
    /// also the element that gets captured.
    pub ready_selector: String,
    pub timeout: Duration,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_scale_factor: f64,
}

impl RasterRequest {
    pub fn new(url: impl Into<String>, config: &RasterizerConfig) -> Self {
        Self {
            url: url.into(),
            ready_selector: config.ready_selector.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            device_scale_factor: config.device_scale_factor,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A captured PNG and its pixel size.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Turns a URL into raster bytes.
///
/// Implementations fail with `Navigation` when the page cannot be loaded,
/// `RenderTimeout` when the ready marker does not appear in time and
/// `Capture` when the page loaded but no image could be taken.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn render(&self, request: &RasterRequest) -> VariaResult<RasterImage>;
}
