//! Raw calendar provider API.
//!
//! `CalendarProvider` is the seam between the retrying client and the
//! wire: one method per provider operation, each already classified into
//! [`ProviderError`] variants so the retry loop can decide what is worth
//! another attempt.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;

use crate::error::ProviderError;

const GOOGLE_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Suggested wait when the provider rate-limits without a Retry-After.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Raw event/calendar operations against the external provider.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Create a secondary calendar, returning its id.
    async fn insert_calendar(&self, token: &str, summary: &str) -> Result<String, ProviderError>;

    /// Insert an event, returning the provider's event id.
    async fn insert_event(
        &self,
        token: &str,
        calendar_id: &str,
        body: &Value,
    ) -> Result<String, ProviderError>;

    /// Patch fields on an existing event.
    async fn patch_event(
        &self,
        token: &str,
        calendar_id: &str,
        event_id: &str,
        body: &Value,
    ) -> Result<(), ProviderError>;

    /// Delete an event.
    async fn delete_event(
        &self,
        token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), ProviderError>;
}

/// Google Calendar v3 implementation.
pub struct GoogleProvider {
    http: Client,
    base_url: String,
}

impl GoogleProvider {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            base_url: GOOGLE_API_BASE.to_string(),
        }
    }

    /// Point the provider at a mock server (tests).
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn read_json(response: Response) -> Result<Value, ProviderError> {
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::Response(e.to_string()))
    }
}

impl Default for GoogleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CalendarProvider for GoogleProvider {
    async fn insert_calendar(&self, token: &str, summary: &str) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(format!("{}/calendars", self.base_url))
            .bearer_auth(token)
            .json(&serde_json::json!({ "summary": summary }))
            .send()
            .await?;
        let body = Self::read_json(response).await?;
        body.get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ProviderError::Response("calendar insert missing id".into()))
    }

    async fn insert_event(
        &self,
        token: &str,
        calendar_id: &str,
        body: &Value,
    ) -> Result<String, ProviderError> {
        let response = self
            .http
            .post(format!(
                "{}/calendars/{}/events",
                self.base_url,
                urlencoding::encode(calendar_id)
            ))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        let body = Self::read_json(response).await?;
        body.get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ProviderError::Response("event insert missing id".into()))
    }

    async fn patch_event(
        &self,
        token: &str,
        calendar_id: &str,
        event_id: &str,
        body: &Value,
    ) -> Result<(), ProviderError> {
        let response = self
            .http
            .patch(format!(
                "{}/calendars/{}/events/{}",
                self.base_url,
                urlencoding::encode(calendar_id),
                urlencoding::encode(event_id)
            ))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn delete_event(
        &self,
        token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), ProviderError> {
        let response = self
            .http
            .delete(format!(
                "{}/calendars/{}/events/{}",
                self.base_url,
                urlencoding::encode(calendar_id),
                urlencoding::encode(event_id)
            ))
            .bearer_auth(token)
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }
}

/// Map an HTTP response onto the provider error taxonomy.
async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let message = response.text().await.unwrap_or_default();

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        },
        StatusCode::FORBIDDEN if message.contains("ateLimitExceeded") => {
            // Google reports quota as 403 rateLimitExceeded / userRateLimitExceeded.
            ProviderError::RateLimited {
                retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::AuthRejected(truncate(&message))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => ProviderError::NotFound(truncate(&message)),
        s if s.is_client_error() => ProviderError::Permanent {
            status: s.as_u16(),
            message: truncate(&message),
        },
        s => ProviderError::Transient {
            status: s.as_u16(),
            message: truncate(&message),
        },
    })
}

fn truncate(message: &str) -> String {
    const MAX: usize = 200;
    if message.len() > MAX {
        let mut end = MAX;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &message[..end])
    } else {
        message.to_string()
    }
}
