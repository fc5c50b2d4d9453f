//! Core error types for duesync-core.
//!
//! This module defines the error hierarchy used across the library,
//! mirroring the taxonomy callers need to act on: credential problems
//! ask for re-authentication, rate limits carry a retry-after hint,
//! and vault integrity failures are always fatal.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::model::AccountRole;

/// Core error type for duesync-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Credential vault errors
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    /// Calendar provider errors
    #[error("Calendar provider error: {0}")]
    Provider(#[from] ProviderError),

    /// OAuth-related errors
    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A sync run is already in flight for this (owner, student) pair
    #[error("Sync already in progress for owner {owner_id}, student {student_id}")]
    SyncInProgress { owner_id: i64, student_id: i64 },

    /// A single-item or settings-apply sync hit per-operation failures
    #[error("Sync failed: {}", errors.join("; "))]
    SyncFailed { errors: Vec<String> },

    /// The upstream work-item source failed
    #[error("Work item source error: {0}")]
    Source(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Credential vault errors.
///
/// `Integrity` is deliberately distinct from "not found": a ciphertext
/// that fails authentication means tampering or a wrong key, and must
/// never be masked as a missing credential.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Encryption key is not valid 256-bit hex
    #[error("Vault key must be 64 hex characters (256 bits)")]
    InvalidKey,

    /// Ciphertext failed authentication on decrypt
    #[error("Stored credential failed authentication (tampered ciphertext or wrong vault key)")]
    Integrity,

    /// Stored credential row is structurally broken
    #[error("Malformed stored credential: {0}")]
    Corrupt(String),

    /// Underlying persistence failure
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Calendar provider errors, classified by how callers should react.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider rate limit hit; `retry_after` is a suggested wait
    #[error("Rate limited by calendar API, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Provider rejected our credentials (401/403)
    #[error("Calendar API rejected credentials: {0}")]
    AuthRejected(String),

    /// Requested calendar or event does not exist
    #[error("Calendar resource not found: {0}")]
    NotFound(String),

    /// Permanent 4xx failure; retrying cannot help
    #[error("Calendar API rejected request ({status}): {message}")]
    Permanent { status: u16, message: String },

    /// Transient 5xx failure; retried internally before surfacing
    #[error("Calendar API unavailable ({status}): {message}")]
    Transient { status: u16, message: String },

    /// Retry budget exhausted on a transient failure
    #[error("Calendar API retries exhausted: {0}")]
    Exhausted(#[source] Box<ProviderError>),

    /// No valid access token and no usable refresh token
    #[error("No valid calendar credential for {role} (owner {owner_id}, student {student_id})")]
    NoCredential {
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
    },

    /// Network-level failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Provider returned a body we could not interpret
    #[error("Malformed calendar API response: {0}")]
    Response(String),
}

impl ProviderError {
    /// Whether the bounded retry loop should try this failure again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Transient { .. }
        )
    }
}

/// OAuth-specific errors.
#[derive(Error, Debug)]
pub enum OAuthError {
    /// Callback state did not match the issued state
    #[error("OAuth state mismatch: callback state does not match issued state")]
    StateMismatch,

    /// State string could not be parsed back into its context
    #[error("Invalid OAuth state: {0}")]
    InvalidState(String),

    /// Authorization code exchange failed
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    /// Token refresh failed
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// OAuth client credentials are not configured
    #[error("OAuth client credentials not configured")]
    CredentialsNotConfigured,

    /// Network-level failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Validation errors, rejected synchronously before persistence.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Reminder offset outside the provider's accepted range
    #[error("Invalid reminder offset {minutes} min: must be between 0 and {max} min")]
    InvalidReminderOffset { minutes: i64, max: i64 },

    /// Too many reminder overrides for one event
    #[error("Too many reminders ({count}): the calendar provider allows at most {max}")]
    TooManyReminders { count: usize, max: usize },

    /// Invalid value with field context
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        VaultError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
