//! Tempo core: domain primitives shared by every other crate.
//!
//! This crate has zero internal dependencies so it can be used by the
//! database layer, the event bus, the API server, and any future CLI
//! tooling. It contains:
//!
//! - [`types`] — shared id/timestamp aliases.
//! - [`error`] — the domain error taxonomy.
//! - [`naming`] — display-name to filesystem-slug derivation.
//! - [`cron`] — the five-field cron expression engine (scheduling and
//!   preview share this single parser).
//! - [`validation`] — write-boundary checks for requirements manifests,
//!   environment variable mappings, and interpreter versions.
//! - [`scripting`] — subprocess execution and per-script virtualenv
//!   management.

pub mod cron;
pub mod error;
pub mod naming;
pub mod scripting;
pub mod types;
pub mod validation;
