//! # Duesync Core Library
//!
//! This library provides the core business logic for Duesync, a one-way
//! mirror of due-dated school work items into Google Calendar. A guardian
//! and a student each connect their own Google account; the engine keeps a
//! dedicated "Assignments" calendar per role in step with the upstream
//! source-of-record.
//!
//! ## Architecture
//!
//! - **Storage**: SQLite-backed credential vault (ChaCha20-Poly1305 sealed
//!   tokens), per-pair sync settings, and item-to-event mappings
//! - **Calendar**: Google OAuth flow, the raw Calendar API provider, and a
//!   retrying client with automatic token refresh
//! - **Sync**: The reconciliation orchestrator that decides per item and
//!   per role whether to create, update, complete, or delete events
//!
//! ## Key Components
//!
//! - [`SyncOrchestrator`]: Reconciliation engine and entry point
//! - [`CredentialVault`]: Encrypted OAuth token storage
//! - [`CalendarClient`]: Retrying Google Calendar client
//! - [`SyncSettings`]: Per-(owner, student) filtering and reminder policy

pub mod calendar;
pub mod error;
pub mod model;
pub mod storage;
pub mod sync;

pub use calendar::{CalendarClient, CalendarProvider, GoogleProvider, OAuthClient, RetryPolicy};
pub use error::{
    ConfigError, CoreError, DatabaseError, OAuthError, ProviderError, ValidationError, VaultError,
};
pub use model::{AccountRole, AssignmentType, WorkItem};
pub use storage::{
    AppConfig, ConnectionStatus, Credential, CredentialVault, Database, EventMapping,
    EventMappingStore, GoogleConfig, SettingsStore, SyncSettings,
};
pub use sync::{
    BatchHandle, SyncAction, SyncGate, SyncOrchestrator, SyncResult, SyncRunStatus, TaskSpawner,
    WorkItemSource,
};
