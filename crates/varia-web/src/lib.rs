pub mod backend;
pub mod playwright;

pub use backend::{RasterImage, RasterRequest, Rasterizer};
pub use playwright::PlaywrightRasterizer;
