use serde::{Deserialize, Serialize};

/// Top-level application settings container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppSettings {
    pub backend: BackendSettings,
    pub auth: AuthSettings,
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Which backend implementation to talk to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Rest,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendSettings {
    pub kind: BackendKind,
    /// SQLite file used by the local backend and the session vault.
    /// `None` resolves to `<data dir>/smartmarks.db`.
    pub database_path: Option<String>,
    /// Base URL of the hosted backend, e.g. `https://abc.supabase.co`.
    pub rest_url: String,
    /// Public (anon) API key sent with every hosted request.
    pub anon_key: String,
    /// Change-feed polling interval for the hosted backend.
    pub poll_interval_secs: u64,
    /// User id the local backend signs in as.
    pub local_user: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::Local,
            database_path: None,
            rest_url: String::new(),
            anon_key: String::new(),
            poll_interval_secs: 5,
            local_user: "local".to_string(),
        }
    }
}

/// Sign-in settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSettings {
    pub provider: String,
    pub redirect_to: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            provider: "google".to_string(),
            redirect_to: "http://localhost:3000".to_string(),
        }
    }
}

/// Mutation pipeline behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSettings {
    /// Re-insert a bookmark whose optimistic delete the backend rejected.
    pub rollback_failed_deletes: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            rollback_failed_deletes: true,
        }
    }
}

/// Log output settings. `RUST_LOG` takes precedence when set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}
