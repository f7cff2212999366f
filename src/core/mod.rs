//! Canonical invoice model, profiles and errors.
//!
//! The canonical [`Invoice`] follows the EN 16931 semantic model and is the
//! bridge between the ERP aggregate and CII XML in both directions.

mod builder;
mod error;
mod profile;
mod types;
pub mod units;
mod validation;

pub use builder::*;
pub use error::*;
pub use profile::*;
pub use types::*;
pub use units::is_known_unit_code;
pub use validation::*;
