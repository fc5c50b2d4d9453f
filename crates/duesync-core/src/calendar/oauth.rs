//! OAuth2 Authorization Code flow against Google.
//!
//! Builds the consent URL, exchanges the one-time code, and refreshes
//! access tokens. The callback `state` string embeds the (owner, student,
//! role) context plus 16 random bytes so the callback handler can recover
//! who was connecting without the value being guessable.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use reqwest::Client;

use crate::error::OAuthError;
use crate::model::AccountRole;
use crate::storage::GoogleConfig;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

/// Tokens returned by a code exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Anti-CSRF state carrying the connection context through the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    pub owner_id: i64,
    pub student_id: i64,
    pub role: AccountRole,
    pub nonce: String,
}

impl OAuthState {
    /// Issue a fresh state for a connection attempt.
    pub fn issue(owner_id: i64, student_id: i64, role: AccountRole) -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            owner_id,
            student_id,
            role,
            nonce: hex::encode(bytes),
        }
    }

    /// Opaque wire form: `o{owner}.s{student}.{role}.{nonce}`.
    pub fn encode(&self) -> String {
        format!(
            "o{}.s{}.{}.{}",
            self.owner_id, self.student_id, self.role, self.nonce
        )
    }

    /// Recover the context from a callback state string.
    pub fn parse(raw: &str) -> Result<Self, OAuthError> {
        let mut parts = raw.split('.');
        let owner = parts
            .next()
            .and_then(|p| p.strip_prefix('o'))
            .and_then(|p| p.parse::<i64>().ok());
        let student = parts
            .next()
            .and_then(|p| p.strip_prefix('s'))
            .and_then(|p| p.parse::<i64>().ok());
        let role = parts.next().and_then(AccountRole::from_str);
        let nonce = parts.next();
        match (owner, student, role, nonce, parts.next()) {
            (Some(owner_id), Some(student_id), Some(role), Some(nonce), None)
                if nonce.len() == 32 =>
            {
                Ok(Self {
                    owner_id,
                    student_id,
                    role,
                    nonce: nonce.to_string(),
                })
            }
            _ => Err(OAuthError::InvalidState(raw.to_string())),
        }
    }

    /// Compare a callback state against the issued one. Mismatch is a hard
    /// failure, never silently ignored.
    pub fn verify(issued: &str, callback: &str) -> Result<(), OAuthError> {
        if issued == callback {
            Ok(())
        } else {
            Err(OAuthError::StateMismatch)
        }
    }
}

/// OAuth client for one Google app registration.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
}

impl OAuthClient {
    pub fn new(config: &GoogleConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
        }
    }

    /// Point token/userinfo endpoints at a mock server (tests).
    #[cfg(test)]
    pub(crate) fn with_endpoints(mut self, token_url: &str, userinfo_url: &str) -> Self {
        self.token_url = token_url.to_string();
        self.userinfo_url = userinfo_url.to_string();
        self
    }

    /// Build the consent URL for one role's connection attempt.
    pub fn authorization_url(&self, state: &str) -> Result<String, OAuthError> {
        if self.client_id.is_empty() {
            return Err(OAuthError::CredentialsNotConfigured);
        }
        Ok(format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(CALENDAR_SCOPE),
            urlencoding::encode(state),
        ))
    }

    /// Exchange a one-time authorization code for tokens.
    pub async fn exchange_code(
        &self,
        http: &Client,
        code: &str,
    ) -> Result<TokenResponse, OAuthError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(OAuthError::CredentialsNotConfigured);
        }
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        let body: serde_json::Value = http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = body.get("error") {
            return Err(OAuthError::ExchangeFailed(error.to_string()));
        }
        parse_token_body(&body, None).ok_or_else(|| {
            OAuthError::ExchangeFailed("token response missing access_token".into())
        })
    }

    /// Refresh an access token using a stored refresh token.
    pub async fn refresh_access_token(
        &self,
        http: &Client,
        refresh_token: &str,
    ) -> Result<TokenResponse, OAuthError> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let body: serde_json::Value = http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = body.get("error") {
            return Err(OAuthError::RefreshFailed(error.to_string()));
        }
        // Google often omits refresh_token on refresh; keep the old one.
        parse_token_body(&body, Some(refresh_token)).ok_or_else(|| {
            OAuthError::RefreshFailed("token response missing access_token".into())
        })
    }

    /// Fetch the connected account's email address for display.
    pub async fn fetch_user_email(
        &self,
        http: &Client,
        access_token: &str,
    ) -> Result<String, OAuthError> {
        let body: serde_json::Value = http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?
            .json()
            .await?;
        body.get("email")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| OAuthError::ExchangeFailed("userinfo response missing email".into()))
    }
}

fn parse_token_body(
    body: &serde_json::Value,
    fallback_refresh: Option<&str>,
) -> Option<TokenResponse> {
    let access_token = body.get("access_token")?.as_str()?.to_string();
    let expires_in = body
        .get("expires_in")
        .and_then(|v| v.as_i64())
        .unwrap_or(3600);
    let refresh_token = body
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| fallback_refresh.map(String::from));
    Some(TokenResponse {
        access_token,
        refresh_token,
        expires_at: Utc::now() + Duration::seconds(expires_in),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OAuthClient {
        OAuthClient::new(&GoogleConfig {
            client_id: "client-123".into(),
            client_secret: "secret".into(),
            redirect_uri: "http://localhost:8080/oauth/callback".into(),
        })
    }

    #[test]
    fn state_round_trips() {
        let state = OAuthState::issue(7, 42, AccountRole::Student);
        let encoded = state.encode();
        let parsed = OAuthState::parse(&encoded).unwrap();
        assert_eq!(parsed, state);
        assert_eq!(parsed.nonce.len(), 32);
    }

    #[test]
    fn states_are_unique() {
        let a = OAuthState::issue(1, 2, AccountRole::Guardian);
        let b = OAuthState::issue(1, 2, AccountRole::Guardian);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn parse_rejects_garbage() {
        for raw in ["", "o1.s2", "x1.s2.guardian.aaaa", "o1.s2.parent.aaaa", "o1.s2.guardian.short"] {
            assert!(matches!(
                OAuthState::parse(raw),
                Err(OAuthError::InvalidState(_))
            ));
        }
    }

    #[test]
    fn verify_mismatch_is_hard_failure() {
        let issued = OAuthState::issue(1, 2, AccountRole::Guardian).encode();
        assert!(OAuthState::verify(&issued, &issued).is_ok());
        let other = OAuthState::issue(1, 2, AccountRole::Guardian).encode();
        assert!(matches!(
            OAuthState::verify(&issued, &other),
            Err(OAuthError::StateMismatch)
        ));
    }

    #[test]
    fn authorization_url_carries_state_and_scope() {
        let url = client().authorization_url("o1.s2.guardian.abc").unwrap();
        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=o1.s2.guardian.abc"));
        assert!(url.contains(&urlencoding::encode(CALENDAR_SCOPE).into_owned()));
    }

    #[test]
    fn authorization_url_requires_client_id() {
        let unconfigured = OAuthClient::new(&GoogleConfig::default());
        assert!(matches!(
            unconfigured.authorization_url("s"),
            Err(OAuthError::CredentialsNotConfigured)
        ));
    }

    #[tokio::test]
    async fn exchange_code_parses_tokens() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":3600,"token_type":"Bearer"}"#,
            )
            .create_async()
            .await;

        let oauth = client().with_endpoints(&format!("{}/token", server.url()), &server.url());
        let tokens = oauth
            .exchange_code(&Client::new(), "code-1")
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
        assert!(tokens.expires_at > Utc::now() + Duration::minutes(50));
    }

    #[tokio::test]
    async fn refresh_keeps_old_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at-2","expires_in":1800}"#)
            .create_async()
            .await;

        let oauth = client().with_endpoints(&format!("{}/token", server.url()), &server.url());
        let tokens = oauth
            .refresh_access_token(&Client::new(), "rt-old")
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "at-2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-old"));
    }

    #[tokio::test]
    async fn oauth_error_body_surfaces() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let oauth = client().with_endpoints(&format!("{}/token", server.url()), &server.url());
        let err = oauth
            .exchange_code(&Client::new(), "stale-code")
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::ExchangeFailed(_)));
    }
}
