//! CLI commands module.

mod build;
mod inspect;
mod query;
mod util;

pub use build::BuildCommand;
pub use inspect::InspectCommand;
pub use query::QueryCommand;

pub(crate) use util::*;
