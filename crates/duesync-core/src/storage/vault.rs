//! Encrypted-at-rest storage for per-role OAuth credentials.
//!
//! Access and refresh tokens are sealed with ChaCha20-Poly1305 under a
//! single 256-bit vault key. Each seal uses a fresh random nonce, stored
//! alongside the ciphertext; decryption verifies the authentication tag,
//! so a tampered row or a wrong key fails hard with
//! [`VaultError::Integrity`] instead of yielding garbage plaintext.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use crate::error::VaultError;
use crate::model::AccountRole;
use crate::storage::{AppConfig, Database};

/// Access tokens expiring within this window count as "needs refresh".
const REFRESH_BUFFER_MINUTES: i64 = 5;

const NONCE_LEN: usize = 12;

/// A decrypted credential row.
#[derive(Debug, Clone)]
pub struct Credential {
    pub owner_id: i64,
    pub student_id: i64,
    pub role: AccountRole,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub google_email: String,
    pub calendar_id: Option<String>,
}

/// Per-role connection state for one (owner, student) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub guardian_connected: bool,
    pub student_connected: bool,
}

impl ConnectionStatus {
    pub fn any_connected(&self) -> bool {
        self.guardian_connected || self.student_connected
    }

    pub fn is_connected(&self, role: AccountRole) -> bool {
        match role {
            AccountRole::Guardian => self.guardian_connected,
            AccountRole::Student => self.student_connected,
        }
    }
}

/// Encrypted credential store, keyed by (owner, student, role).
#[derive(Clone)]
pub struct CredentialVault {
    db: Arc<Database>,
    cipher: ChaCha20Poly1305,
}

impl CredentialVault {
    /// Build a vault from a 64-hex-char (256-bit) key.
    pub fn new(db: Arc<Database>, key_hex: &str) -> Result<Self, VaultError> {
        let bytes = hex::decode(key_hex.trim()).map_err(|_| VaultError::InvalidKey)?;
        if bytes.len() != 32 {
            return Err(VaultError::InvalidKey);
        }
        Ok(Self {
            db,
            cipher: ChaCha20Poly1305::new(Key::from_slice(&bytes)),
        })
    }

    /// Build a vault with a freshly generated key.
    ///
    /// The key is logged at WARN level on purpose: a key that only lives in
    /// process memory invalidates every stored credential on restart, and
    /// that has to be loud, not silent.
    pub fn with_generated_key(db: Arc<Database>) -> Self {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        tracing::warn!(
            vault_key = %hex::encode(key),
            "no vault key configured; generated a one-off key. Persist it as \
             DUESYNC_VAULT_KEY or vault_key in config.toml, or every stored \
             calendar credential becomes unreadable on restart"
        );
        Self {
            db,
            cipher: ChaCha20Poly1305::new(&key),
        }
    }

    /// Build from application config, generating a key if none is set.
    pub fn from_config(db: Arc<Database>, config: &AppConfig) -> Result<Self, VaultError> {
        match &config.vault_key {
            Some(key) => Self::new(db, key),
            None => Ok(Self::with_generated_key(db)),
        }
    }

    fn seal(&self, plaintext: &str) -> Result<String, VaultError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Corrupt("encryption failed".into()))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    fn open(&self, sealed: &str) -> Result<String, VaultError> {
        let blob = BASE64
            .decode(sealed)
            .map_err(|e| VaultError::Corrupt(format!("bad base64: {e}")))?;
        if blob.len() <= NONCE_LEN {
            return Err(VaultError::Corrupt("sealed token too short".into()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Integrity)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Corrupt("non-utf8 token".into()))
    }

    /// Upsert a credential, sealing both tokens.
    ///
    /// A `None` calendar id preserves any previously stored calendar id, so
    /// re-authenticating does not orphan the role's dedicated calendar.
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
        google_email: &str,
        calendar_id: Option<&str>,
    ) -> Result<Credential, VaultError> {
        let sealed_access = self.seal(access_token)?;
        let sealed_refresh = self.seal(refresh_token)?;
        self.db.conn().execute(
            "INSERT INTO calendar_credentials
                 (owner_id, student_id, role, access_token, refresh_token,
                  expires_at, google_email, calendar_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(owner_id, student_id, role) DO UPDATE SET
                 access_token = excluded.access_token,
                 refresh_token = excluded.refresh_token,
                 expires_at = excluded.expires_at,
                 google_email = excluded.google_email,
                 calendar_id = COALESCE(excluded.calendar_id, calendar_credentials.calendar_id),
                 updated_at = excluded.updated_at",
            params![
                owner_id,
                student_id,
                role.as_str(),
                sealed_access,
                sealed_refresh,
                expires_at.to_rfc3339(),
                google_email,
                calendar_id,
                Utc::now().to_rfc3339(),
            ],
        )?;
        // Read back so callers see the row as stored (calendar id may have
        // been preserved from an earlier connect).
        self.credential(owner_id, student_id, role)?
            .ok_or_else(|| VaultError::Corrupt("credential vanished after upsert".into()))
    }

    /// Decrypted view of a credential, if one exists.
    pub fn credential(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
    ) -> Result<Option<Credential>, VaultError> {
        let row = {
            let conn = self.db.conn();
            let mut stmt = conn.prepare(
                "SELECT access_token, refresh_token, expires_at, google_email, calendar_id
                 FROM calendar_credentials
                 WHERE owner_id = ?1 AND student_id = ?2 AND role = ?3",
            )?;
            let result = stmt.query_row(params![owner_id, student_id, role.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            });
            match result {
                Ok(r) => Some(r),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            }
        };

        let Some((sealed_access, sealed_refresh, expires_raw, email, calendar_id)) = row else {
            return Ok(None);
        };
        let expires_at = DateTime::parse_from_rfc3339(&expires_raw)
            .map_err(|e| VaultError::Corrupt(format!("bad expiry timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(Credential {
            owner_id,
            student_id,
            role,
            access_token: self.open(&sealed_access)?,
            refresh_token: self.open(&sealed_refresh)?,
            expires_at,
            google_email: email,
            calendar_id,
        }))
    }

    /// Access token if present and not expiring within the refresh buffer.
    ///
    /// `None` means "re-authentication or refresh required"; callers must
    /// not wait on it.
    pub fn valid_access_token(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
    ) -> Result<Option<String>, VaultError> {
        match self.credential(owner_id, student_id, role)? {
            Some(cred)
                if cred.expires_at > Utc::now() + Duration::minutes(REFRESH_BUFFER_MINUTES) =>
            {
                Ok(Some(cred.access_token))
            }
            _ => Ok(None),
        }
    }

    /// Refresh token, if a credential exists.
    pub fn refresh_token(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
    ) -> Result<Option<String>, VaultError> {
        Ok(self
            .credential(owner_id, student_id, role)?
            .map(|c| c.refresh_token))
    }

    /// Replace the access token and expiry after a refresh.
    ///
    /// Returns true iff a credential existed and was updated.
    pub fn update_access_token(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
        new_access_token: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<bool, VaultError> {
        let sealed = self.seal(new_access_token)?;
        let changed = self.db.conn().execute(
            "UPDATE calendar_credentials
             SET access_token = ?4, expires_at = ?5, updated_at = ?6
             WHERE owner_id = ?1 AND student_id = ?2 AND role = ?3",
            params![
                owner_id,
                student_id,
                role.as_str(),
                sealed,
                new_expiry.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Record the role's dedicated calendar id after lazy creation.
    pub fn set_calendar_id(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
        calendar_id: &str,
    ) -> Result<bool, VaultError> {
        let changed = self.db.conn().execute(
            "UPDATE calendar_credentials
             SET calendar_id = ?4, updated_at = ?5
             WHERE owner_id = ?1 AND student_id = ?2 AND role = ?3",
            params![
                owner_id,
                student_id,
                role.as_str(),
                calendar_id,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Whether a non-expired credential exists for the role.
    ///
    /// An expired-but-present credential reports disconnected.
    pub fn is_connected(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
    ) -> Result<bool, VaultError> {
        let expires_raw = {
            let conn = self.db.conn();
            let mut stmt = conn.prepare(
                "SELECT expires_at FROM calendar_credentials
                 WHERE owner_id = ?1 AND student_id = ?2 AND role = ?3",
            )?;
            match stmt.query_row(params![owner_id, student_id, role.as_str()], |row| {
                row.get::<_, String>(0)
            }) {
                Ok(raw) => raw,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        };
        let expires_at = DateTime::parse_from_rfc3339(&expires_raw)
            .map_err(|e| VaultError::Corrupt(format!("bad expiry timestamp: {e}")))?
            .with_timezone(&Utc);
        Ok(expires_at > Utc::now())
    }

    /// Connection state for both roles at once.
    pub fn connection_status(
        &self,
        owner_id: i64,
        student_id: i64,
    ) -> Result<ConnectionStatus, VaultError> {
        Ok(ConnectionStatus {
            guardian_connected: self.is_connected(owner_id, student_id, AccountRole::Guardian)?,
            student_connected: self.is_connected(owner_id, student_id, AccountRole::Student)?,
        })
    }

    /// Delete one role's credential. Idempotent.
    pub fn revoke(
        &self,
        owner_id: i64,
        student_id: i64,
        role: AccountRole,
    ) -> Result<(), VaultError> {
        self.db.conn().execute(
            "DELETE FROM calendar_credentials
             WHERE owner_id = ?1 AND student_id = ?2 AND role = ?3",
            params![owner_id, student_id, role.as_str()],
        )?;
        Ok(())
    }

    /// Delete both roles' credentials. Idempotent.
    pub fn revoke_all(&self, owner_id: i64, student_id: i64) -> Result<(), VaultError> {
        self.db.conn().execute(
            "DELETE FROM calendar_credentials WHERE owner_id = ?1 AND student_id = ?2",
            params![owner_id, student_id],
        )?;
        Ok(())
    }

    /// Bulk delete credentials whose expiry has passed.
    ///
    /// Intended for a periodic external scheduler, not self-triggered.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, VaultError> {
        let deleted = self.db.conn().execute(
            "DELETE FROM calendar_credentials WHERE expires_at <= ?1",
            params![now.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}
