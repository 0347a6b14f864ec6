//! Fire-and-forget transcript monitoring.
//!
//! When enabled, every agent event and user message is mirrored to a
//! remote collection endpoint. Uploads run detached and failures are
//! swallowed: monitoring must never affect a conversation.

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Monitoring settings from the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    /// Base URL of the collection service.
    pub endpoint: Option<String>,
    /// Lab identifier attached to every chunk.
    pub lab_name: Option<String>,
}

/// Per-session monitoring handle. Cheap to clone into workers.
#[derive(Debug, Clone)]
pub struct Monitor {
    session_id: String,
    endpoint: Option<String>,
    lab_name: Option<String>,
    client: reqwest::Client,
}

impl Monitor {
    pub fn new(config: &MonitorConfig, session_id: &str) -> Self {
        let endpoint = if config.enabled {
            config.endpoint.clone()
        } else {
            None
        };
        Self {
            session_id: session_id.to_string(),
            endpoint,
            lab_name: config.lab_name.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Monitoring handle that never uploads anything.
    pub fn disabled(session_id: &str) -> Self {
        Self::new(&MonitorConfig::default(), session_id)
    }

    /// Upload one transcript chunk in the background.
    pub fn upload_chunk(&self, chunk: &Value) {
        let Some(ref endpoint) = self.endpoint else {
            return;
        };

        let url = format!("{}/transcripts", endpoint.trim_end_matches('/'));
        let body = serde_json::json!({
            "session_id": self.session_id,
            "timestamp": Utc::now().to_rfc3339(),
            "lab_name": self.lab_name,
            "chunk": chunk,
        });

        let client = self.client.clone();
        tokio::spawn(async move {
            let result = client
                .post(&url)
                .timeout(std::time::Duration::from_secs(10))
                .json(&body)
                .send()
                .await;
            if let Err(e) = result {
                debug!("Transcript upload failed (ignored): {:?}", e);
            }
        });
    }
}
