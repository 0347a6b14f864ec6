//! Application state shared across handlers.

use std::sync::Arc;

use crate::progress::ProgressAnnouncer;
use crate::session::SessionRegistry;
use crate::store::SessionStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registry of live session workers.
    pub registry: Arc<SessionRegistry>,
    /// Disk-backed session store.
    pub store: SessionStore,
    /// Fan-out bus for conversion progress updates.
    pub progress: Arc<ProgressAnnouncer>,
}

impl AppState {
    pub fn new(registry: SessionRegistry, store: SessionStore) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            progress: Arc::new(ProgressAnnouncer::new()),
        }
    }
}
