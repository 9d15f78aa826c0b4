// lib.rs — Exposes the bundle index modules for the CLI and integration
// tests.
//
// The binary entry point lives in main.rs.

pub mod async_runner;
pub mod bundle_index;
pub mod config;
pub mod events;
pub mod jsonc;
pub mod line_index;
pub mod manifest;
pub mod multi_value_index;
pub mod resolver;
pub mod service_index;
