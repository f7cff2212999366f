//! The ERP side: the sales invoice aggregate and its projection into the
//! canonical model.

mod model;
mod project;
mod text;

pub use model::*;
pub use project::{Projection, project, skonto_line};
pub use text::html_to_text;

pub(crate) use project::tax_category;
