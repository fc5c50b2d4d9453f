//! Tests for the retrying calendar client against a scripted provider.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};

use crate::calendar::client::{event_body, CalendarClient, RetryPolicy};
use crate::calendar::fake::FakeProvider;
use crate::calendar::oauth::OAuthClient;
use crate::error::{CoreError, ProviderError};
use crate::model::{AccountRole, WorkItem};
use crate::storage::{CredentialVault, Database, GoogleConfig};

fn test_item() -> WorkItem {
    WorkItem {
        student_id: 2,
        plannable_id: 10,
        title: "Math Worksheet".into(),
        course_name: "Math".into(),
        due_at: Some(Utc::now() + ChronoDuration::days(2)),
        points_possible: Some(20.0),
        grade: None,
        submitted: false,
        missing: false,
        late: false,
        graded: false,
        updated_at: Utc::now(),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
    }
}

fn vault_with_credential() -> CredentialVault {
    let vault = CredentialVault::new(
        Arc::new(Database::open_memory().unwrap()),
        &"ab".repeat(32),
    )
    .unwrap();
    vault
        .store(
            1,
            2,
            AccountRole::Guardian,
            "tok",
            "refresh",
            Utc::now() + ChronoDuration::hours(1),
            "parent@example.com",
            Some("cal-0"),
        )
        .unwrap();
    vault
}

fn client(vault: CredentialVault) -> CalendarClient<FakeProvider> {
    CalendarClient::new(
        FakeProvider::new(),
        vault,
        OAuthClient::new(&GoogleConfig::default()),
    )
    .with_retry_policy(fast_retry())
}

fn rate_limited() -> ProviderError {
    ProviderError::RateLimited {
        retry_after: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn two_rate_limits_then_success_makes_three_attempts() {
    let client = client(vault_with_credential());
    client.provider_ref().push_failure(rate_limited());
    client.provider_ref().push_failure(rate_limited());

    let event_id = client
        .create_event(1, 2, AccountRole::Guardian, "cal-0", &test_item(), &[120])
        .await
        .unwrap();
    assert!(event_id.starts_with("ev-"));
    assert_eq!(client.provider_ref().call_count(), 3);
    assert_eq!(client.provider_ref().event_count(), 1);
}

#[tokio::test]
async fn three_rate_limits_surface_rate_limit_with_hint() {
    let client = client(vault_with_credential());
    for _ in 0..3 {
        client.provider_ref().push_failure(rate_limited());
    }

    let err = client
        .create_event(1, 2, AccountRole::Guardian, "cal-0", &test_item(), &[120])
        .await
        .unwrap_err();
    // Exactly the retry budget, no further attempts.
    assert_eq!(client.provider_ref().call_count(), 3);
    match err {
        CoreError::Provider(ProviderError::RateLimited { retry_after }) => {
            // 1ms initial delay, doubled twice.
            assert_eq!(retry_after, Duration::from_millis(4));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn transient_exhaustion_wraps_last_cause() {
    let client = client(vault_with_credential());
    for _ in 0..3 {
        client.provider_ref().push_failure(ProviderError::Transient {
            status: 502,
            message: "bad gateway".into(),
        });
    }

    let err = client
        .create_event(1, 2, AccountRole::Guardian, "cal-0", &test_item(), &[])
        .await
        .unwrap_err();
    assert_eq!(client.provider_ref().call_count(), 3);
    assert!(matches!(
        err,
        CoreError::Provider(ProviderError::Exhausted(_))
    ));
}

#[tokio::test]
async fn permanent_errors_fail_without_retry() {
    let client = client(vault_with_credential());
    client.provider_ref().push_failure(ProviderError::Permanent {
        status: 400,
        message: "bad request".into(),
    });

    let err = client
        .create_event(1, 2, AccountRole::Guardian, "cal-0", &test_item(), &[])
        .await
        .unwrap_err();
    assert_eq!(client.provider_ref().call_count(), 1);
    assert!(matches!(
        err,
        CoreError::Provider(ProviderError::Permanent { .. })
    ));
}

#[tokio::test]
async fn missing_credential_fails_before_any_provider_call() {
    let vault = CredentialVault::new(
        Arc::new(Database::open_memory().unwrap()),
        &"ab".repeat(32),
    )
    .unwrap();
    let client = client(vault);

    let err = client
        .create_event(1, 2, AccountRole::Guardian, "cal-0", &test_item(), &[])
        .await
        .unwrap_err();
    assert_eq!(client.provider_ref().call_count(), 0);
    assert!(matches!(
        err,
        CoreError::Provider(ProviderError::NoCredential { .. })
    ));
}

#[tokio::test]
async fn expired_token_refreshes_through_oauth() {
    let vault = CredentialVault::new(
        Arc::new(Database::open_memory().unwrap()),
        &"ab".repeat(32),
    )
    .unwrap();
    // Token expires within the refresh buffer.
    vault
        .store(
            1,
            2,
            AccountRole::Guardian,
            "stale",
            "refresh-1",
            Utc::now() + ChronoDuration::minutes(1),
            "parent@example.com",
            Some("cal-0"),
        )
        .unwrap();

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"fresh","expires_in":3600}"#)
        .create_async()
        .await;

    let oauth = OAuthClient::new(&GoogleConfig {
        client_id: "id".into(),
        client_secret: "secret".into(),
        redirect_uri: "http://localhost/cb".into(),
    })
    .with_endpoints(&format!("{}/token", server.url()), &server.url());

    let client = CalendarClient::new(FakeProvider::new(), vault.clone(), oauth)
        .with_retry_policy(fast_retry());
    let token = client.access_token(1, 2, AccountRole::Guardian).await.unwrap();
    mock.assert_async().await;
    assert_eq!(token, "fresh");
    // The refreshed token is persisted and now valid.
    assert_eq!(
        vault
            .valid_access_token(1, 2, AccountRole::Guardian)
            .unwrap()
            .as_deref(),
        Some("fresh")
    );
}

#[tokio::test]
async fn delete_treats_missing_event_as_gone() {
    let client = client(vault_with_credential());
    let deleted = client
        .delete_event(1, 2, AccountRole::Guardian, "cal-0", "never-existed")
        .await
        .unwrap();
    assert!(!deleted);
}

#[tokio::test]
async fn ensure_calendar_reuses_stored_id() {
    let client = client(vault_with_credential());
    let id = client
        .ensure_calendar(1, 2, AccountRole::Guardian, "Assignments (Guardian)")
        .await
        .unwrap();
    assert_eq!(id, "cal-0");
    assert_eq!(client.provider_ref().call_count(), 0);
}

#[tokio::test]
async fn ensure_calendar_creates_and_persists() {
    let vault = CredentialVault::new(
        Arc::new(Database::open_memory().unwrap()),
        &"ab".repeat(32),
    )
    .unwrap();
    vault
        .store(
            1,
            2,
            AccountRole::Student,
            "tok",
            "refresh",
            Utc::now() + ChronoDuration::hours(1),
            "kid@example.com",
            None,
        )
        .unwrap();
    let client = client(vault.clone());

    let id = client
        .ensure_calendar(1, 2, AccountRole::Student, "Assignments (Student)")
        .await
        .unwrap();
    assert!(id.starts_with("cal-"));
    assert_eq!(
        vault
            .credential(1, 2, AccountRole::Student)
            .unwrap()
            .unwrap()
            .calendar_id,
        Some(id)
    );
    // Second call short-circuits on the stored id.
    client
        .ensure_calendar(1, 2, AccountRole::Student, "Assignments (Student)")
        .await
        .unwrap();
    assert_eq!(client.provider_ref().call_count(), 1);
}

#[test]
fn event_body_spans_hour_before_due_with_reminder_overrides() {
    let item = test_item();
    let due = item.due_at.unwrap();
    let body = event_body(&item, &[1440, 120]).unwrap();

    assert_eq!(body["summary"], "Math Worksheet");
    assert_eq!(body["end"]["dateTime"], due.to_rfc3339());
    assert_eq!(
        body["start"]["dateTime"],
        (due - ChronoDuration::hours(1)).to_rfc3339()
    );
    assert_eq!(body["reminders"]["useDefault"], false);
    let overrides = body["reminders"]["overrides"].as_array().unwrap();
    assert_eq!(overrides.len(), 2);
    assert_eq!(overrides[0]["minutes"], 1440);
    assert_eq!(overrides[1]["minutes"], 120);

    let description = body["description"].as_str().unwrap();
    assert!(description.contains("Course: Math"));
    assert!(description.contains("Points possible: 20"));
    assert!(description.contains("Assignment ID: 10"));
    assert_eq!(
        body["extendedProperties"]["private"]["duesync_plannable_id"],
        "10"
    );
}

#[test]
fn event_body_rejects_missing_due_date() {
    let mut item = test_item();
    item.due_at = None;
    assert!(event_body(&item, &[]).is_err());
}
