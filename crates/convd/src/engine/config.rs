//! Engine process configuration and auth mode resolution.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable the engine reads its API key from.
pub const ENGINE_API_KEY_VAR: &str = "CONVD_ENGINE_API_KEY";
/// Environment variable overriding the engine's API base URL.
pub const ENGINE_BASE_URL_VAR: &str = "CONVD_ENGINE_BASE_URL";

/// Configuration for spawning engine processes.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine executable name or path.
    pub executable: String,
    /// Default model passed to the engine, if any.
    pub model: Option<String>,
    /// Base URL of the billing proxy used when no credentials are available.
    pub proxy_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: "convagent".to_string(),
            model: None,
            proxy_url: None,
        }
    }
}

/// How engine API usage is billed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// The host machine has its own credentials (env key or engine on PATH).
    Subscription,
    /// The creation request supplied an API key.
    ApiKey,
    /// Route through the billing proxy with a session-scoped key.
    Proxy,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subscription => write!(f, "subscription"),
            Self::ApiKey => write!(f, "api_key"),
            Self::Proxy => write!(f, "proxy"),
        }
    }
}

impl EngineConfig {
    /// Resolve the auth mode for a new session.
    ///
    /// Host credentials win over a request-supplied key; the proxy is the
    /// fallback when neither is available.
    pub fn resolve_auth(&self, request_api_key: Option<&str>) -> AuthMode {
        let has_env_key = std::env::var(ENGINE_API_KEY_VAR)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false);
        if has_env_key || executable_on_path(&self.executable) {
            AuthMode::Subscription
        } else if request_api_key.map(|k| !k.trim().is_empty()).unwrap_or(false) {
            AuthMode::ApiKey
        } else {
            AuthMode::Proxy
        }
    }

    /// Build the environment for an engine process under the given mode.
    ///
    /// In proxy mode the key is scoped to the session so the proxy can
    /// attribute usage per conversation.
    pub fn auth_env(
        &self,
        mode: AuthMode,
        request_api_key: Option<&str>,
        session_id: &str,
    ) -> Vec<(String, String)> {
        match mode {
            // The engine finds its own credentials
            AuthMode::Subscription => Vec::new(),
            AuthMode::ApiKey => request_api_key
                .map(|key| vec![(ENGINE_API_KEY_VAR.to_string(), key.to_string())])
                .unwrap_or_default(),
            AuthMode::Proxy => {
                let mut env = vec![(
                    ENGINE_API_KEY_VAR.to_string(),
                    format!("proxy:{}", session_id),
                )];
                if let Some(ref url) = self.proxy_url {
                    env.push((ENGINE_BASE_URL_VAR.to_string(), url.clone()));
                }
                env
            }
        }
    }
}

/// Check whether an executable resolves via PATH (or is a direct path).
fn executable_on_path(executable: &str) -> bool {
    let candidate = PathBuf::from(executable);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }

    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(executable).is_file())
}
