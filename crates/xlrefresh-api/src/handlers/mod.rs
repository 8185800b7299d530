//! HTTP handlers, grouped by resource.

pub mod files;
pub mod refresh;
pub mod settings;
pub mod system;
