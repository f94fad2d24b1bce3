//! smartmarks: a bookmark manager core that keeps one ordered, deduplicated
//! list consistent across initial load, optimistic edits, backend
//! confirmation and pushed change events.
//!
//! This library crate exposes all modules for use by the RPC binary and integration tests.

pub mod app;
pub mod backend;
pub mod database;
pub mod managers;
pub mod rpc_handler;
pub mod services;
pub mod types;
