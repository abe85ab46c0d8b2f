//! # varia-core
//!
//! Core types and primitives for the Varia template renderer.
//! This crate contains the foundational types shared across all Varia crates:
//! geometry, content hashing, configuration, and the error taxonomy.

pub mod config;
pub mod error;
pub mod hash;
pub mod math;

pub use config::*;

pub use error::{VariaError, VariaResult};
pub use hash::ContentHash;
pub use math::{format_number, Placement, Point2D, Size2D};
