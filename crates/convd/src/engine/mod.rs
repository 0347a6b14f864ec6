//! Conversion engine boundary.
//!
//! The engine is an external tool-using agent consumed as a subprocess
//! speaking JSON-lines RPC over stdin/stdout.

pub mod client;
pub mod config;
pub mod types;

pub use client::{EngineClient, EngineClientConfig};
pub use config::{AuthMode, EngineConfig};
pub use types::{AgentEvent, ContentBlock, EngineCommand, EngineMessage, EngineResponse, ErrorKind};
