//! Long-lived background tasks.

pub mod retention;
pub mod seed;
