//! Session lifecycle: models, registry, and the per-session worker.

pub mod models;
pub mod registry;
pub mod worker;

pub use models::{Message, Role, SessionRecord, SessionSummary, WorkerStatus};
pub use registry::{CreateSession, SessionRegistry};
pub use worker::{SessionHandle, SessionWorker, WorkerConfig};
