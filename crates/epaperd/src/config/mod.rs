// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod config;
mod diagnostics;
mod partial;

pub use config::*;
pub use diagnostics::{Diagnostic, format_diagnostics};
