//! Test utilities and common setup.

use axum::Router;
use tempfile::TempDir;

use convd::api;
use convd::engine::EngineConfig;
use convd::monitor::MonitorConfig;
use convd::session::SessionRegistry;
use convd::store::SessionStore;

/// Create a test application backed by a temp sessions directory.
///
/// The engine executable intentionally does not exist: workers spawn,
/// fail to connect, and surface that on their event queues, which is all
/// the HTTP layer needs for these tests.
pub fn test_app() -> (TempDir, Router) {
    let temp = TempDir::new().unwrap();
    let store = SessionStore::new(temp.path());

    let engine = EngineConfig {
        executable: "definitely-not-an-engine-binary".to_string(),
        model: None,
        proxy_url: None,
    };
    let registry = SessionRegistry::new(store.clone(), engine, MonitorConfig::default());
    let state = api::AppState::new(registry, store);

    (temp, api::create_router(state))
}
