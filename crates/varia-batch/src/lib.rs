//! # varia-batch
//!
//! Drives one render per row of tabular input: builds the row's render URL,
//! rasterizes it, uploads the image and collects public references. A failed
//! row is logged and left out; it never stops the batch.

pub mod naming;
pub mod pipeline;
pub mod url;

pub use naming::object_name;
pub use pipeline::{BatchOptions, BatchPipeline, BatchReport, RowProcessingError, RowResult, RowStage};
pub use url::{build_row_url, placeholder_name};
