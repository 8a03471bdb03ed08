//! HTTP handler implementations, one module per resource.

pub mod auth;
pub mod execution;
pub mod folders;
pub mod logs;
pub mod scripts;
pub mod settings;
