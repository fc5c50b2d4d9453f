//! Retrying calendar client.
//!
//! Wraps a [`CalendarProvider`] with credential lookup/refresh via the
//! vault and a bounded retry loop. Backoff is explicit data: a delay that
//! doubles per attempt, slept between retries, and handed back as a
//! retry-after hint when the rate-limit budget runs out.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use chrono::Utc;
use serde_json::{json, Value};

use crate::calendar::oauth::OAuthClient;
use crate::calendar::provider::CalendarProvider;
use crate::error::{CoreError, ProviderError, Result, ValidationError};
use crate::model::{AccountRole, WorkItem};
use crate::storage::CredentialVault;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
        }
    }
}

/// Calendar operations for the orchestrator: credentialed, retried,
/// and shaped for work items.
pub struct CalendarClient<P> {
    provider: P,
    vault: CredentialVault,
    oauth: OAuthClient,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl<P: CalendarProvider> CalendarClient<P> {
    pub fn new(provider: P, vault: CredentialVault, oauth: OAuthClient) -> Self {
        Self {
            provider,
            vault,
            oauth,
            http: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[cfg(test)]
    pub(crate) fn provider_ref(&self) -> &P {
        &self.provider
    }

    /// Valid access token for the role, refreshing through the stored
    /// refresh token when the access token is expired or near expiry.
    ///
    /// Never proceeds unauthenticated: a missing or unrefreshable
    /// credential is an immediate [`ProviderError::NoCredential`].
    pub async fn access_token(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
    ) -> Result<String> {
        if let Some(token) = self.vault.valid_access_token(owner_id, student_id, role)? {
            return Ok(token);
        }
        let no_credential = || {
            CoreError::Provider(ProviderError::NoCredential {
                owner_id,
                student_id,
                role,
            })
        };
        let Some(refresh) = self.vault.refresh_token(owner_id, student_id, role)? else {
            return Err(no_credential());
        };
        match self.oauth.refresh_access_token(&self.http, &refresh).await {
            Ok(tokens) => {
                self.vault.update_access_token(
                    owner_id,
                    student_id,
                    role,
                    &tokens.access_token,
                    tokens.expires_at,
                )?;
                Ok(tokens.access_token)
            }
            Err(err) => {
                tracing::warn!(%err, owner_id, student_id, %role, "token refresh failed");
                Err(no_credential())
            }
        }
    }

    /// Role's dedicated calendar id, creating the calendar lazily and
    /// persisting the id back into the credential.
    pub async fn ensure_calendar(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
        display_name: &str,
    ) -> Result<String> {
        if let Some(existing) = self
            .vault
            .credential(owner_id, student_id, role)?
            .and_then(|c| c.calendar_id)
        {
            return Ok(existing);
        }
        let token = self.access_token(owner_id, student_id, role).await?;
        let calendar_id = self
            .with_retry("insert_calendar", || {
                self.provider.insert_calendar(&token, display_name)
            })
            .await?;
        self.vault
            .set_calendar_id(owner_id, student_id, role, &calendar_id)?;
        tracing::info!(owner_id, student_id, %role, calendar_id, "created dedicated calendar");
        Ok(calendar_id)
    }

    /// Create an event for a work item, returning the provider event id.
    pub async fn create_event(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
        calendar_id: &str,
        item: &WorkItem,
        reminder_offsets: &[u32],
    ) -> Result<String> {
        let token = self.access_token(owner_id, student_id, role).await?;
        let body = event_body(item, reminder_offsets)?;
        let event_id = self
            .with_retry("insert_event", || {
                self.provider.insert_event(&token, calendar_id, &body)
            })
            .await?;
        Ok(event_id)
    }

    /// Update an existing event from current item state.
    ///
    /// Returns false if the event no longer exists at the provider.
    pub async fn update_event(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
        calendar_id: &str,
        event_id: &str,
        item: &WorkItem,
        reminder_offsets: &[u32],
    ) -> Result<bool> {
        let token = self.access_token(owner_id, student_id, role).await?;
        let body = event_body(item, reminder_offsets)?;
        match self
            .with_retry("patch_event", || {
                self.provider.patch_event(&token, calendar_id, event_id, &body)
            })
            .await
        {
            Ok(()) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete an event. Returns false if it was already gone.
    pub async fn delete_event(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<bool> {
        let token = self.access_token(owner_id, student_id, role).await?;
        match self
            .with_retry("delete_event", || {
                self.provider.delete_event(&token, calendar_id, event_id)
            })
            .await
        {
            Ok(()) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Visually mark an event done without deleting it, for items the
    /// settings say to keep after completion.
    pub async fn mark_completed(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
        calendar_id: &str,
        event_id: &str,
        item: &WorkItem,
    ) -> Result<bool> {
        let token = self.access_token(owner_id, student_id, role).await?;
        let body = json!({
            "summary": format!("✓ {}", item.title),
            // Graphite in Google's event palette; visually "done".
            "colorId": "8",
            "transparency": "transparent",
        });
        match self
            .with_retry("patch_event", || {
                self.provider.patch_event(&token, calendar_id, event_id, &body)
            })
            .await
        {
            Ok(()) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Bounded retry loop. Only rate-limit and transient failures are
    /// retried; everything else surfaces on the first attempt.
    async fn with_retry<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    tracing::warn!(
                        %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "{op_name} failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(ProviderError::RateLimited { .. }) => {
                    // Budget exhausted on rate limits: surface the next
                    // backoff step as the suggested retry-after.
                    return Err(ProviderError::RateLimited { retry_after: delay });
                }
                Err(err @ ProviderError::Transient { .. }) => {
                    return Err(ProviderError::Exhausted(Box::new(err)));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Build the provider event payload for a work item.
///
/// The event spans the hour ending at the due time; the description keeps
/// course, points, and the upstream identity for traceability; reminders
/// always override provider defaults.
pub(crate) fn event_body(item: &WorkItem, reminder_offsets: &[u32]) -> Result<Value> {
    let due = item.due_at.ok_or_else(|| {
        CoreError::Validation(ValidationError::InvalidValue {
            field: "due_at".into(),
            message: "cannot build a calendar event for an item with no due date".into(),
        })
    })?;
    let start = due - ChronoDuration::hours(1);

    let mut description = format!("Course: {}\n", item.course_name);
    if let Some(points) = item.points_possible {
        description.push_str(&format!("Points possible: {points}\n"));
    }
    description.push_str(&format!("Assignment ID: {}", item.plannable_id));

    let overrides: Vec<Value> = reminder_offsets
        .iter()
        .map(|minutes| json!({ "method": "popup", "minutes": minutes }))
        .collect();

    Ok(json!({
        "summary": item.title,
        "description": description,
        "start": { "dateTime": start.to_rfc3339() },
        "end": { "dateTime": due.to_rfc3339() },
        "reminders": {
            "useDefault": false,
            "overrides": overrides,
        },
        "extendedProperties": {
            "private": {
                "duesync_plannable_id": item.plannable_id.to_string(),
                "duesync_student_id": item.student_id.to_string(),
                "duesync_synced": Utc::now().to_rfc3339(),
            }
        }
    }))
}
