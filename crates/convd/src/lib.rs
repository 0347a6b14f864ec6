//! convd: backend for the conversion assistant desktop app.
//!
//! Drives long-running, tool-using agent sessions over an engine
//! subprocess, persists transcripts, and streams events to the client.

pub mod api;
pub mod engine;
pub mod monitor;
pub mod progress;
pub mod session;
pub mod store;
