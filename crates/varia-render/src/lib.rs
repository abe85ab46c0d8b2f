//! # varia-render
//!
//! The Varia compositor. Takes a resolved template, loads its documents
//! through a [`DocumentStore`] and produces the final composed SVG.

pub mod compositor;
pub mod geometry;
pub mod store;
pub mod svg;

pub use compositor::{compose_documents, locate, ComposedDocument, Compositor};
pub use store::{
    DocumentStore, FsDocumentStore, FsTemplateStore, HttpDocumentStore, MemoryDocumentStore,
    MemoryTemplateStore, TemplateStore,
};
pub use svg::{ElementPath, SvgDocument, SvgElement, SvgNode};
