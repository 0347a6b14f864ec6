//! Session registry: the map of live sessions.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::info;
use tokio::sync::RwLock;

use crate::engine::EngineConfig;
use crate::monitor::{Monitor, MonitorConfig};
use crate::session::models::SessionRecord;
use crate::session::worker::{SessionHandle, SessionWorker, WorkerConfig};
use crate::store::{SessionStore, new_record};

/// Parameters for creating a session.
#[derive(Debug, Clone, Default)]
pub struct CreateSession {
    /// Data directories the agent may read. Validated by the caller.
    pub directories: Vec<String>,
    /// API key from the request, if any.
    pub api_key: Option<String>,
    /// Model override for this session.
    pub model: Option<String>,
    /// Human label used for the workspace name and default title.
    pub label: Option<String>,
}

/// Registry of live session workers.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    store: SessionStore,
    engine: EngineConfig,
    monitor: MonitorConfig,
}

impl SessionRegistry {
    pub fn new(store: SessionStore, engine: EngineConfig, monitor: MonitorConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            engine,
            monitor,
        }
    }

    /// Create a session: persist the initial record, spawn the worker,
    /// register the handle.
    ///
    /// The worker connects in the background; the handle is visible in
    /// the registry before this returns. A store failure here aborts the
    /// whole creation.
    pub async fn create(&self, params: CreateSession) -> Result<(Arc<SessionHandle>, SessionRecord)> {
        let session_id = generate_session_id();
        let slug = workspace_slug(&params);

        let work_dir = self.store.session_dir(&session_id).join(&slug);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .with_context(|| format!("creating session workspace {}", work_dir.display()))?;

        let record = new_record(&session_id, &slug, params.directories.clone());
        self.store
            .create_record(&record)
            .await
            .context("persisting session record")?;

        let auth_mode = self.engine.resolve_auth(params.api_key.as_deref());
        let config = WorkerConfig {
            engine: self.engine.clone(),
            auth_mode,
            api_key: params.api_key,
            model: params.model,
            work_dir,
        };

        let handle = SessionWorker::spawn(
            &session_id,
            params.directories,
            config,
            self.store.clone(),
            Monitor::new(&self.monitor, &session_id),
        );

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::clone(&handle));

        info!("Created session {} (auth mode: {})", session_id, auth_mode);
        Ok((handle, record))
    }

    /// Look up a live session.
    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Stop and deregister a session. Idempotent; persisted history is
    /// untouched.
    pub async fn remove(&self, session_id: &str) -> bool {
        let handle = self.sessions.write().await.remove(session_id);
        match handle {
            Some(handle) => {
                handle.stop();
                info!("Removed session {}", session_id);
                true
            }
            None => false,
        }
    }

    /// IDs of all live sessions.
    pub async fn live_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Stop every live worker. Used during graceful shutdown.
    pub async fn shutdown_all(&self) {
        let mut sessions = self.sessions.write().await;
        if sessions.is_empty() {
            info!("No live sessions to stop");
            return;
        }
        info!("Stopping {} live session(s)...", sessions.len());
        for (id, handle) in sessions.drain() {
            handle.stop();
            info!("Stopped session {}", id);
        }
    }
}

/// Sortable, filesystem-safe, unique session ID.
fn generate_session_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", timestamp, &suffix[..8])
}

/// Workspace directory name, from the label or the first data directory.
fn workspace_slug(params: &CreateSession) -> String {
    let base = params
        .label
        .as_deref()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .or_else(|| {
            params.directories.first().and_then(|dir| {
                std::path::Path::new(dir)
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
            })
        })
        .unwrap_or_else(|| "conversion".to_string());

    let slug = base
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string();

    // An all-symbol label sanitizes to nothing; fall back rather than
    // collapsing the workspace into the bare session directory
    if slug.is_empty() {
        "conversion".to_string()
    } else {
        slug
    }
}
