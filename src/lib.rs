//! Chunkstream - HTTP range streaming of chunked remote objects
//!
//! This library crate exposes the server pieces for integration testing.

pub mod config;
pub mod server;
pub mod store;
pub mod streaming;
