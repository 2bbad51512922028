//! Login gate for the ledger.
//!
//! The session lives in local storage as a flag plus the username of the last
//! full login. Credential checks go through [`CredentialVerifier`], so no
//! secret is compiled into the binary.

use std::{fs, path::PathBuf};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Months, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    write_atomic, LedgerError, LocalStore, Result, AUTH_STATE_KEY, PASSWORD_CHANGED_KEY,
    PASSWORD_WARNING_DISMISSED_KEY, USERNAME_KEY,
};

/// Checks and stores the login credential pair.
pub trait CredentialVerifier {
    /// Whether a credential pair has been set up.
    fn is_set_up(&self) -> bool;

    /// `Ok(false)` on a mismatch, `Err` when nothing can be checked.
    fn verify(&self, username: &str, password: &str) -> Result<bool>;

    fn set_credentials(&mut self, username: &str, password: &str) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCredentials {
    username: String,
    password_hash: String,
}

/// Username plus an Argon2 PHC hash in a JSON file.
#[derive(Debug, Clone)]
pub struct Argon2CredentialStore {
    path: PathBuf,
}

impl Argon2CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<StoredCredentials> {
        if !self.path.exists() {
            return Err(LedgerError::CredentialsNotSet);
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| LedgerError::ApplicationError {
            message: format!("Password hashing failed: {}", e),
        })
}

impl CredentialVerifier for Argon2CredentialStore {
    fn is_set_up(&self) -> bool {
        self.path.exists()
    }

    fn verify(&self, username: &str, password: &str) -> Result<bool> {
        let stored = self.load()?;
        if stored.username != username {
            return Ok(false);
        }
        let parsed = PasswordHash::new(&stored.password_hash).map_err(|e| {
            error!("Stored password hash is invalid: {}", e);
            LedgerError::ApplicationError {
                message: "Invalid password hash format".to_string(),
            }
        })?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    fn set_credentials(&mut self, username: &str, password: &str) -> Result<()> {
        let stored = StoredCredentials {
            username: username.to_string(),
            password_hash: hash_password(password)?,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&self.path, &serde_json::to_string_pretty(&stored)?)?;
        info!("Credentials saved to {}", self.path.display());
        Ok(())
    }
}

/// What the login screen should ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginPrompt {
    Full,
    PasswordOnly { username: String },
}

/// Explicit session context passed to whatever needs the login state.
pub struct SessionGuard<V: CredentialVerifier> {
    store: LocalStore,
    verifier: V,
}

impl<V: CredentialVerifier> SessionGuard<V> {
    pub fn new(store: LocalStore, verifier: V) -> Self {
        Self { store, verifier }
    }

    pub fn username(&self) -> Option<String> {
        self.store.get_json(USERNAME_KEY)
    }

    pub fn prompt(&self) -> LoginPrompt {
        match self.username() {
            Some(username) => LoginPrompt::PasswordOnly { username },
            None => LoginPrompt::Full,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.get_json::<bool>(AUTH_STATE_KEY).unwrap_or(false)
    }

    pub fn require_authenticated(&self) -> Result<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(LedgerError::NotAuthenticated)
        }
    }

    pub fn credentials_set_up(&self) -> bool {
        self.verifier.is_set_up()
    }

    /// First-time credential setup; refuses to overwrite existing credentials.
    pub fn setup_credentials(&mut self, username: &str, password: &str) -> Result<()> {
        if self.verifier.is_set_up() {
            return Err(LedgerError::ApplicationError {
                message: "Credentials already exist, change the password instead".to_string(),
            });
        }
        validate_new_credentials(username, password)?;
        self.verifier.set_credentials(username.trim(), password)
    }

    /// Full username + password login.
    pub fn login(&self, username: &str, password: &str, now: DateTime<Utc>) -> Result<()> {
        let username = username.trim();
        if !self.verifier.verify(username, password)? {
            warn!("Failed login attempt for {}", username);
            return Err(LedgerError::InvalidCredentials);
        }
        self.store.set_json(AUTH_STATE_KEY, &true)?;
        self.store.set_json(USERNAME_KEY, username)?;
        self.record_password_time(now)?;
        info!("{} logged in", username);
        Ok(())
    }

    /// Password-only login for the remembered username.
    pub fn unlock(&self, password: &str) -> Result<()> {
        let username = self.username().ok_or(LedgerError::NotAuthenticated)?;
        if !self.verifier.verify(&username, password)? {
            warn!("Wrong password for {}", username);
            return Err(LedgerError::InvalidCredentials);
        }
        self.store.set_json(AUTH_STATE_KEY, &true)?;
        info!("{} unlocked the session", username);
        Ok(())
    }

    /// Clears the session and the username; the next login is a full one.
    pub fn logout(&self) -> Result<()> {
        self.store.remove(AUTH_STATE_KEY)?;
        self.store.remove(USERNAME_KEY)?;
        info!("Logged out");
        Ok(())
    }

    /// Forgets the remembered username without touching the session flag.
    pub fn forget_user(&self) -> Result<()> {
        self.store.remove(USERNAME_KEY)
    }

    pub fn change_password(&mut self, current: &str, new: &str, now: DateTime<Utc>) -> Result<()> {
        let username = self.username().ok_or(LedgerError::NotAuthenticated)?;
        if !self.verifier.verify(&username, current)? {
            return Err(LedgerError::InvalidCredentials);
        }
        validate_new_credentials(&username, new)?;
        self.verifier.set_credentials(&username, new)?;
        self.record_password_time(now)?;
        info!("Password changed for {}", username);
        Ok(())
    }

    fn record_password_time(&self, now: DateTime<Utc>) -> Result<()> {
        self.store.set_json(PASSWORD_CHANGED_KEY, &now)?;
        self.store.remove(PASSWORD_WARNING_DISMISSED_KEY)
    }

    /// More than one calendar month since the recorded time, and not dismissed.
    pub fn password_rotation_due(&self, now: DateTime<Utc>) -> bool {
        let Some(changed_at) = self.store.get_json::<DateTime<Utc>>(PASSWORD_CHANGED_KEY) else {
            return false;
        };
        let dismissed = self
            .store
            .get_json::<DateTime<Utc>>(PASSWORD_WARNING_DISMISSED_KEY)
            .is_some_and(|at| at >= changed_at);
        let due = changed_at
            .checked_add_months(Months::new(1))
            .is_some_and(|deadline| now > deadline);
        debug!("Password rotation due={} dismissed={}", due, dismissed);
        due && !dismissed
    }

    pub fn dismiss_rotation_warning(&self, now: DateTime<Utc>) -> Result<()> {
        self.store.set_json(PASSWORD_WARNING_DISMISSED_KEY, &now)
    }
}

fn validate_new_credentials(username: &str, password: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(LedgerError::ApplicationError {
            message: "Username must not be empty".to_string(),
        });
    }
    if password.chars().count() < 4 {
        return Err(LedgerError::ApplicationError {
            message: "Password must be at least 4 characters".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    /// Plain-text verifier, good enough for tests.
    #[derive(Default)]
    struct FixedPair(Option<(String, String)>);

    impl CredentialVerifier for FixedPair {
        fn is_set_up(&self) -> bool {
            self.0.is_some()
        }

        fn verify(&self, username: &str, password: &str) -> Result<bool> {
            let (u, p) = self.0.as_ref().ok_or(LedgerError::CredentialsNotSet)?;
            Ok(u == username && p == password)
        }

        fn set_credentials(&mut self, username: &str, password: &str) -> Result<()> {
            self.0 = Some((username.into(), password.into()));
            Ok(())
        }
    }

    fn guard(dir: &std::path::Path) -> SessionGuard<FixedPair> {
        let mut guard = SessionGuard::new(LocalStore::open(dir).unwrap(), FixedPair::default());
        guard.setup_credentials("shopkeeper", "s3cret").unwrap();
        guard
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn full_login_then_password_only() {
        let dir = tempfile::tempdir().unwrap();
        let g = guard(dir.path());

        assert_eq!(g.prompt(), LoginPrompt::Full);
        assert!(matches!(
            g.login("shopkeeper", "wrong", at(2026, 1, 1)),
            Err(LedgerError::InvalidCredentials)
        ));
        assert!(!g.is_authenticated());

        g.login("shopkeeper", "s3cret", at(2026, 1, 1)).unwrap();
        assert!(g.is_authenticated());
        assert_eq!(
            g.prompt(),
            LoginPrompt::PasswordOnly {
                username: "shopkeeper".into()
            }
        );

        // closing the app without logout keeps the username
        g.store.remove(AUTH_STATE_KEY).unwrap();
        assert!(g.require_authenticated().is_err());
        assert!(g.unlock("nope").is_err());
        g.unlock("s3cret").unwrap();
        assert!(g.is_authenticated());
    }

    #[test]
    fn logout_forces_full_login() {
        let dir = tempfile::tempdir().unwrap();
        let g = guard(dir.path());
        g.login("shopkeeper", "s3cret", at(2026, 1, 1)).unwrap();

        g.logout().unwrap();
        assert!(!g.is_authenticated());
        assert_eq!(g.prompt(), LoginPrompt::Full);
        assert!(matches!(g.unlock("s3cret"), Err(LedgerError::NotAuthenticated)));
    }

    #[test]
    fn rotation_reminder_after_a_month_and_dismissable_once() {
        let dir = tempfile::tempdir().unwrap();
        let g = guard(dir.path());
        assert!(!g.password_rotation_due(at(2026, 6, 1)));

        g.login("shopkeeper", "s3cret", at(2026, 1, 31)).unwrap();
        assert!(!g.password_rotation_due(at(2026, 2, 27)));
        assert!(g.password_rotation_due(at(2026, 3, 2)));

        g.dismiss_rotation_warning(at(2026, 3, 2)).unwrap();
        assert!(!g.password_rotation_due(at(2026, 3, 3)));
    }

    #[test]
    fn change_password_resets_the_clock() {
        let dir = tempfile::tempdir().unwrap();
        let mut g = guard(dir.path());
        g.login("shopkeeper", "s3cret", at(2026, 1, 1)).unwrap();
        assert!(g.password_rotation_due(at(2026, 3, 1)));

        assert!(g.change_password("bad", "n3wpass", at(2026, 3, 1)).is_err());
        g.change_password("s3cret", "n3wpass", at(2026, 3, 1)).unwrap();
        assert!(!g.password_rotation_due(at(2026, 3, 15)));

        g.logout().unwrap();
        assert!(g.login("shopkeeper", "s3cret", at(2026, 3, 16)).is_err());
        g.login("shopkeeper", "n3wpass", at(2026, 3, 16)).unwrap();
    }

    #[test]
    fn setup_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut g = guard(dir.path());
        assert!(g.setup_credentials("other", "pass1").is_err());
    }

    #[test]
    fn argon2_store_verifies_hashed_password() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Argon2CredentialStore::new(dir.path().join("credentials.json"));
        assert!(!store.is_set_up());
        assert!(matches!(store.verify("a", "b"), Err(LedgerError::CredentialsNotSet)));

        store.set_credentials("shopkeeper", "s3cret").unwrap();
        let raw = fs::read_to_string(dir.path().join("credentials.json")).unwrap();
        assert!(!raw.contains("s3cret"));

        assert!(store.verify("shopkeeper", "s3cret").unwrap());
        assert!(!store.verify("shopkeeper", "S3cret").unwrap());
        assert!(!store.verify("someone", "s3cret").unwrap());
    }

    #[test]
    fn password_change_rewrites_credentials_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Argon2CredentialStore::new(dir.path().join("credentials.json"));
        store.set_credentials("shopkeeper", "first1").unwrap();
        store.set_credentials("shopkeeper", "second2").unwrap();

        assert!(store.verify("shopkeeper", "second2").unwrap());
        assert!(!store.verify("shopkeeper", "first1").unwrap());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
