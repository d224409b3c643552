// ABOUTME: Library root for drydock - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod error;
pub mod health;
pub mod hooks;
pub mod runtime;
pub mod store;
pub mod types;
pub mod update;
