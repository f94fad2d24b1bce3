use thiserror::Error;

// === BackendError ===

/// Errors reported by a backend implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never produced a response.
    #[error("Backend network error: {0}")]
    Network(String),
    /// The backend answered with a non-success status.
    #[error("Backend API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// The addressed record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),
    /// Local database operation failed.
    #[error("Backend database error: {0}")]
    Database(String),
    /// A payload could not be encoded or decoded.
    #[error("Backend serialization error: {0}")]
    Serialization(String),
    /// The operation requires a signed-in session.
    #[error("Not authenticated")]
    Unauthenticated,
}

impl BackendError {
    /// The message shown to a user: the backend's own text for API errors,
    /// the full description otherwise.
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        BackendError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Serialization(e.to_string())
    }
}

// === AuthError ===

/// Errors related to sign-in, sign-out and session resolution.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Starting or completing the sign-in flow failed.
    #[error("Sign-in failed: {0}")]
    SignIn(#[source] BackendError),
    /// The backend refused to terminate the session.
    #[error("Sign-out failed: {0}")]
    SignOut(#[source] BackendError),
    /// A prior session could not be resolved.
    #[error("Session resolution failed: {0}")]
    Resolve(#[source] BackendError),
}

// === PipelineError ===

/// Errors surfaced by the mutation pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Another add is still waiting for the backend.
    #[error("A bookmark submission is already in flight")]
    SubmissionInFlight,
    /// The backend rejected a new bookmark. The collection is unchanged.
    #[error("Bookmark submission failed: {message}")]
    Submission {
        message: String,
        #[source]
        source: BackendError,
    },
    /// The backend rejected a delete after the bookmark was removed locally.
    #[error("Bookmark deletion failed for {id}: {source}")]
    Deletion {
        id: String,
        rolled_back: bool,
        #[source]
        source: BackendError,
    },
}

// === VaultError ===

/// Errors related to persisting the hosted auth session.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Key derivation, encryption or decryption failed.
    #[error("Vault crypto error: {0}")]
    Crypto(String),
    /// Database operation failed.
    #[error("Vault database error: {0}")]
    Database(String),
    /// Failed to serialize or deserialize the session.
    #[error("Vault serialization error: {0}")]
    Serialization(String),
}

impl From<VaultError> for BackendError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::Database(msg) => BackendError::Database(msg),
            other => BackendError::Serialization(other.to_string()),
        }
    }
}

// === SettingsError ===

/// Errors related to settings management.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// An I/O error occurred while reading or writing settings.
    #[error("Settings I/O error: {0}")]
    IoError(String),
    /// Failed to serialize or deserialize settings.
    #[error("Settings serialization error: {0}")]
    SerializationError(String),
    /// The provided settings key is invalid.
    #[error("Invalid settings key: {0}")]
    InvalidKey(String),
    /// The provided settings value is invalid.
    #[error("Invalid settings value: {0}")]
    InvalidValue(String),
}

// === AppError ===

/// Errors raised while assembling the application.
#[derive(Debug, Error)]
pub enum AppError {
    /// Settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The database could not be opened or migrated.
    #[error("Failed to open database: {0}")]
    Database(String),
    /// The configured backend could not be built.
    #[error("Failed to initialize backend: {0}")]
    Backend(#[from] BackendError),
}
