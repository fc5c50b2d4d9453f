//! Google Calendar access: OAuth flow helpers, the raw provider API, and
//! the retrying client the orchestrator talks to.

pub mod client;
pub mod oauth;
pub mod provider;

#[cfg(test)]
pub(crate) mod fake;
#[cfg(test)]
mod client_tests;

pub use client::{CalendarClient, RetryPolicy};
pub use oauth::{OAuthClient, OAuthState, TokenResponse};
pub use provider::{CalendarProvider, GoogleProvider};
