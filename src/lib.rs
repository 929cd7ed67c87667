//! sshmitm-setup library exports.
//!
//! Exposes the pipeline internals for integration testing; the binary in
//! `main.rs` is a thin CLI over `pipeline`.

pub mod config;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod host;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod stages;
pub mod verify;
