//! File-backed credential store
//!
//! One JSON record per user at `<users_dir>/<identifier>.json`. Passwords are
//! stored only as Argon2id PHC strings with a random salt.

use std::io::Write;
use std::path::{Path, PathBuf};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Profile summary given to newly registered users
pub const DEFAULT_PROFILE_SUMMARY: &str = "New user profile";

/// A registered user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "username")]
    pub id: String,
    pub password_hash: String,
    #[serde(rename = "context_summary", default)]
    pub profile_summary: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    AlreadyExists,
}

/// Stores and verifies user credentials
#[derive(Debug, Clone)]
pub struct CredentialStore {
    users_dir: PathBuf,
}

impl CredentialStore {
    /// Open the store rooted at `users_dir`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn open(users_dir: impl Into<PathBuf>) -> Result<Self> {
        let users_dir = users_dir.into();
        std::fs::create_dir_all(&users_dir)?;
        Ok(Self { users_dir })
    }

    /// Directory holding the user records
    #[must_use]
    pub fn users_dir(&self) -> &Path {
        &self.users_dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.users_dir.join(format!("{id}.json"))
    }

    /// Register a new user
    ///
    /// Existing identifiers are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns `Error::Auth` for an invalid identifier or empty password, or
    /// an IO error if the record cannot be written
    pub fn register(&self, id: &str, password: &str) -> Result<Registration> {
        validate_identifier(id)?;
        if password.is_empty() {
            return Err(Error::Auth("password must not be empty".to_string()));
        }

        let path = self.record_path(id);
        if path.exists() {
            return Ok(Registration::AlreadyExists);
        }

        let now = Utc::now();
        let user = User {
            id: id.to_string(),
            password_hash: hash_password(password)?,
            profile_summary: Some(DEFAULT_PROFILE_SUMMARY.to_string()),
            created_at: now,
            updated_at: now,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&self.users_dir)?;
        serde_json::to_writer_pretty(&mut tmp, &user)?;
        tmp.flush()?;

        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                tracing::info!(user = id, "registered user");
                Ok(Registration::Created)
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok(Registration::AlreadyExists)
            }
            Err(e) => Err(e.error.into()),
        }
    }

    /// Check a password against the stored hash
    ///
    /// Returns `false` when the user is unknown, the record is unreadable, or
    /// the password does not match.
    #[must_use]
    pub fn authenticate(&self, id: &str, password: &str) -> bool {
        let user = match self.find(id) {
            Ok(Some(user)) => user,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(user = id, error = %e, "failed to read credential record");
                return false;
            }
        };

        verify_password(password, &user.password_hash)
    }

    /// Look up a user record
    ///
    /// # Errors
    ///
    /// Returns error if the record exists but cannot be read or parsed
    pub fn find(&self, id: &str) -> Result<Option<User>> {
        if validate_identifier(id).is_err() {
            return Ok(None);
        }

        let path = self.record_path(id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Replace the user's free-text profile summary
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for unknown users, or an IO error on write
    pub fn set_profile_summary(&self, id: &str, summary: &str) -> Result<()> {
        let mut user = self
            .find(id)?
            .ok_or_else(|| Error::NotFound(format!("user {id}")))?;

        user.profile_summary = Some(summary.to_string());
        user.updated_at = Utc::now();

        let mut tmp = tempfile::NamedTempFile::new_in(&self.users_dir)?;
        serde_json::to_writer_pretty(&mut tmp, &user)?;
        tmp.flush()?;
        tmp.persist(self.record_path(id)).map_err(|e| e.error)?;

        tracing::debug!(user = id, "updated profile summary");
        Ok(())
    }
}

/// Identifiers become file names: `[A-Za-z0-9_.-]`, not starting with `.`
fn validate_identifier(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::Auth("username must not be empty".to_string()));
    }
    if id.starts_with('.') {
        return Err(Error::Auth("username must not start with '.'".to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(Error::Auth(
            "username may only contain letters, digits, '_', '.' and '-'".to_string(),
        ));
    }
    Ok(())
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Auth(format!("failed to hash password: {e}")))
}

fn verify_password(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}
