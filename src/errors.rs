//! Error types for the debtbook application.
//!
//! This module defines the error categories the ledger, the backup flow and
//! the login gate can report. Cloud failures are split by cause so the CLI
//! can tell the user whether to configure, sign in again or simply retry.

use std::{io, path::PathBuf};

use thiserror::Error;

/// The main error type for the debtbook application.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Errors related to file I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors related to serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network failure while talking to the cloud provider.
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    /// Cloud credentials are absent, no cloud call is attempted.
    #[error("Google Drive is not configured")]
    NotConfigured,

    /// A cloud operation was attempted without a signed-in session.
    #[error("Sign in to Google Drive first")]
    AuthRequired,

    /// The provider rejected the session token; the session was dropped.
    #[error("Google Drive session expired, sign in again")]
    AuthExpired,

    /// No remote backup document matched on restore.
    #[error("No backup file found")]
    BackupNotFound,

    /// The provider answered with a non-success status (quota, permission, ...).
    #[error("Google Drive returned {status}: {message}")]
    Provider { status: u16, message: String },

    /// Record was not found when performing an operation.
    #[error("Record not found: {id}")]
    RecordNotFound { id: String },

    /// Record input failed validation.
    #[error("Invalid record: {message}")]
    InvalidRecord { message: String },

    /// Username or password did not match.
    #[error("Wrong username or password")]
    InvalidCredentials,

    /// Ledger commands need an open session.
    #[error("Not logged in, run `debtbook login` first")]
    NotAuthenticated,

    /// No credential pair has been set up yet.
    #[error("No credentials set, run `debtbook passwd` first")]
    CredentialsNotSet,

    /// Errors related to configuration.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Directory creation or access failed.
    #[error("Failed to create or access directory: {path}")]
    DirectoryError { path: PathBuf },

    /// Generic application error with a custom message.
    #[error("{message}")]
    ApplicationError { message: String },
}

impl LedgerError {
    /// True for the failures that come from the cloud side of the app.
    pub fn is_cloud_error(&self) -> bool {
        matches!(
            self,
            LedgerError::NotConfigured
                | LedgerError::AuthRequired
                | LedgerError::AuthExpired
                | LedgerError::BackupNotFound
                | LedgerError::Provider { .. }
                | LedgerError::Http(_)
        )
    }
}
