//! Broadcast announcer for conversion progress.
//!
//! Conversion tooling POSTs progress payloads to the backend; the
//! announcer fans them out to any number of SSE listeners. Publishing
//! never blocks: a subscriber that cannot keep up is dropped.

use std::sync::Mutex;

use log::debug;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Per-subscriber queue capacity. Small on purpose: progress updates are
/// only useful fresh, and a stalled listener should not pile up history.
pub const SUBSCRIBER_BUFFER: usize = 5;

/// One fanned-out progress update.
#[derive(Debug, Clone)]
pub struct ProgressMessage {
    /// Optional SSE event label.
    pub event: Option<String>,
    /// JSON payload, already serialized.
    pub data: String,
}

/// Fan-out bus for progress updates.
#[derive(Debug, Default)]
pub struct ProgressAnnouncer {
    listeners: Mutex<Vec<mpsc::Sender<ProgressMessage>>>,
}

impl ProgressAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its receiving end.
    pub fn listen(&self) -> mpsc::Receiver<ProgressMessage> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.listeners
            .lock()
            .expect("announcer lock poisoned")
            .push(tx);
        rx
    }

    /// Publish an update to every subscriber.
    ///
    /// Iterates in reverse so eviction by index stays valid while
    /// removing. Full or closed subscribers are evicted.
    pub fn announce(&self, data: &Value, event: Option<&str>) {
        let message = ProgressMessage {
            event: event.map(|e| e.to_string()),
            data: data.to_string(),
        };

        let mut listeners = self.listeners.lock().expect("announcer lock poisoned");
        for i in (0..listeners.len()).rev() {
            match listeners[i].try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("Evicting slow progress subscriber");
                    listeners.remove(i);
                }
                Err(TrySendError::Closed(_)) => {
                    listeners.remove(i);
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().expect("announcer lock poisoned").len()
    }
}
