//! # varia-ir
//!
//! The Varia template model: a base graphic, the text/color tags bound to
//! runtime variables, and the overlay layers composited on top of it.
//!
//! Every render request, CLI invocation and batch row is reduced to a
//! [`Template`] plus [`ParameterOverrides`] before compositing.

pub mod data;
pub mod overrides;
pub mod request;
pub mod session;
pub mod template;
pub mod validate;

pub use data::{DataRow, DataSet};
pub use overrides::{resolve, ParameterOverrides, ResolvedTemplate};
pub use request::RenderRequest;
pub use session::{EditorAction, EditorSession, Selection, Upload};
pub use template::{ExportSchema, Layer, Locator, TagKind, TaggedVariable, Template};
pub use validate::validate_template;
