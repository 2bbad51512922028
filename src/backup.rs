//! Local and cloud snapshots of the ledger.
//!
//! The local snapshot is rewritten after every ledger mutation and must never
//! fail its caller. Cloud snapshots go through a [`CloudProvider`] and are
//! gated by a small state machine: cloud calls are only made while linked.

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    CloudProvider, CloudSession, Config, DebtRecord, GoogleDrive, LedgerError, LocalStore,
    RemoteFile, Result, BACKUP_COUNT_KEY, BACKUP_KEY, DRIVE_SESSION_KEY,
};

/// Envelope format version written by this app.
pub const BACKUP_VERSION: &str = "1.0";
/// Source tag of local snapshots.
pub const LOCAL_SOURCE: &str = "local_backup";
/// Source tag of cloud snapshots.
pub const CLOUD_SOURCE: &str = "google_drive_backup";

/// Point-in-time copy of the ledger kept in local storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub data: Vec<DebtRecord>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Document uploaded to the cloud drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudBackup {
    pub data: Vec<DebtRecord>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub backup_count: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// `<prefix>-backup-<YYYY-MM-DD>.json`
pub fn backup_file_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}-backup-{}.json", prefix, date.format("%Y-%m-%d"))
}

/// Reads a downloaded backup: an envelope with `data`, or a bare array.
pub fn parse_backup_body(body: &str) -> Result<Vec<DebtRecord>> {
    let value: Value = serde_json::from_str(body)?;
    match value {
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(data) => Ok(serde_json::from_value(data)?),
            None => Err(LedgerError::ApplicationError {
                message: "backup file has no data field".to_string(),
            }),
        },
        array @ Value::Array(_) => Ok(serde_json::from_value(array)?),
        _ => Err(LedgerError::ApplicationError {
            message: "backup file is neither an envelope nor a record list".to_string(),
        }),
    }
}

/// Best-effort local snapshot writer.
#[derive(Debug, Clone)]
pub struct LocalBackup {
    store: LocalStore,
}

impl LocalBackup {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Writes a snapshot and bumps the counter. Returns whether it succeeded;
    /// failures are only logged.
    pub fn write(&self, records: &[DebtRecord]) -> bool {
        let snapshot = BackupSnapshot {
            data: records.to_vec(),
            timestamp: Utc::now(),
            version: BACKUP_VERSION.to_string(),
            source: Some(LOCAL_SOURCE.to_string()),
        };
        if let Err(e) = self.store.set_json(BACKUP_KEY, &snapshot) {
            error!("Local backup failed: {}", e);
            return false;
        }
        let count = self.count() + 1;
        if let Err(e) = self.store.set_raw(BACKUP_COUNT_KEY, &count.to_string()) {
            warn!("Failed to update backup counter: {}", e);
        }
        debug!("Local backup #{} saved ({} records)", count, records.len());
        true
    }

    /// The last snapshot, `None` when absent or corrupt.
    pub fn snapshot(&self) -> Option<BackupSnapshot> {
        self.store.get_json(BACKUP_KEY)
    }

    /// Records of the last snapshot, empty when absent or corrupt.
    pub fn read(&self) -> Vec<DebtRecord> {
        self.snapshot().map(|s| s.data).unwrap_or_default()
    }

    pub fn count(&self) -> u64 {
        self.store
            .get_raw(BACKUP_COUNT_KEY)
            .and_then(|raw| raw.trim().trim_matches('"').parse().ok())
            .unwrap_or(0)
    }
}

/// Lifecycle of the backup manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    Uninitialized,
    ReadyOffline,
    ReadyCloudLinked,
}

/// Summary shown by `drive status`.
#[derive(Debug, Clone, Serialize)]
pub struct BackupStatus {
    pub state: String,
    pub cloud_configured: bool,
    pub local_backup_count: u64,
    pub last_local_backup: Option<DateTime<Utc>>,
}

/// Owns the local snapshot and the cloud session.
pub struct BackupManager<P: CloudProvider> {
    provider: P,
    store: LocalStore,
    local: LocalBackup,
    configured: bool,
    file_prefix: String,
    state: BackupState,
    session: Option<CloudSession>,
}

impl BackupManager<GoogleDrive> {
    pub fn from_config(config: &Config, store: LocalStore) -> Result<Self> {
        Ok(BackupManager::new(
            GoogleDrive::new(&config.google_drive)?,
            store,
            config.google_drive.is_configured(),
            config.backup_file_prefix.clone(),
        ))
    }
}

impl<P: CloudProvider> BackupManager<P> {
    pub fn new(provider: P, store: LocalStore, configured: bool, file_prefix: String) -> Self {
        Self {
            provider,
            local: LocalBackup::new(store.clone()),
            store,
            configured,
            file_prefix,
            state: BackupState::Uninitialized,
            session: None,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn state(&self) -> BackupState {
        self.state
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn is_cloud_linked(&self) -> bool {
        self.state == BackupState::ReadyCloudLinked
    }

    /// Leaves `Uninitialized`, signing in silently when a session was stored.
    pub async fn initialize(&mut self) -> BackupState {
        if self.state != BackupState::Uninitialized {
            return self.state;
        }

        if !self.configured {
            warn!("Google Drive disabled, no client id configured");
            self.state = BackupState::ReadyOffline;
            return self.state;
        }

        let stored: Option<CloudSession> = self.store.get_json(DRIVE_SESSION_KEY);
        match self.provider.silent_sign_in(stored.as_ref()).await {
            Ok(Some(session)) => {
                info!("Drive session restored");
                self.link(session);
            }
            Ok(None) => {
                debug!("No usable Drive session, staying offline");
                self.state = BackupState::ReadyOffline;
            }
            Err(e) => {
                warn!("Google Drive initialization failed, using local backup: {}", e);
                self.state = BackupState::ReadyOffline;
            }
        }
        self.state
    }

    /// Silent sign-in first, then the interactive consent flow.
    pub async fn sign_in(&mut self) -> Result<()> {
        if !self.configured {
            return Err(LedgerError::NotConfigured);
        }
        if self.initialize().await == BackupState::ReadyCloudLinked {
            return Ok(());
        }

        let stored: Option<CloudSession> = self.store.get_json(DRIVE_SESSION_KEY);
        match self.provider.silent_sign_in(stored.as_ref()).await {
            Ok(Some(session)) => {
                info!("Silent sign-in successful");
                self.link(session);
                return Ok(());
            }
            Ok(None) => debug!("Silent sign-in not possible, asking for consent"),
            Err(e) => debug!("Silent sign-in failed, asking for consent: {}", e),
        }

        let session = self.provider.interactive_sign_in().await.map_err(|e| {
            error!("Google sign in failed: {}", e);
            e
        })?;
        info!("Interactive sign-in successful");
        self.link(session);
        Ok(())
    }

    pub async fn sign_out(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.provider.sign_out(&session).await {
                warn!("Token revocation failed: {}", e);
            }
        }
        self.store.remove(DRIVE_SESSION_KEY)?;
        self.state = BackupState::ReadyOffline;
        info!("Signed out of Google Drive");
        Ok(())
    }

    fn link(&mut self, session: CloudSession) {
        if let Err(e) = self.store.set_json(DRIVE_SESSION_KEY, &session) {
            warn!("Failed to persist Drive session: {}", e);
        }
        self.session = Some(session);
        self.state = BackupState::ReadyCloudLinked;
    }

    fn drop_session(&mut self) {
        self.session = None;
        self.state = BackupState::ReadyOffline;
        if let Err(e) = self.store.remove(DRIVE_SESSION_KEY) {
            warn!("Failed to forget expired Drive session: {}", e);
        }
    }

    fn linked_session(&self) -> Result<CloudSession> {
        if !self.configured {
            return Err(LedgerError::NotConfigured);
        }
        match (&self.state, &self.session) {
            (BackupState::ReadyCloudLinked, Some(session)) => Ok(session.clone()),
            _ => Err(LedgerError::AuthRequired),
        }
    }

    /// The linked session, refreshed first when its access token has expired.
    async fn usable_session(&mut self) -> Result<CloudSession> {
        let session = self.linked_session()?;
        if session.expires_at.is_none() || session.is_fresh(Utc::now()) {
            return Ok(session);
        }

        debug!("Drive access token expired, refreshing");
        match self.provider.silent_sign_in(Some(&session)).await {
            Ok(Some(refreshed)) => {
                info!("Drive session refreshed");
                self.link(refreshed.clone());
                Ok(refreshed)
            }
            Ok(None) => {
                warn!("Drive session could not be refreshed, going offline");
                self.drop_session();
                Err(LedgerError::AuthExpired)
            }
            Err(e) => {
                error!("Drive token refresh failed: {}", e);
                Err(self.on_cloud_error(e))
            }
        }
    }

    fn on_cloud_error(&mut self, e: LedgerError) -> LedgerError {
        if matches!(e, LedgerError::AuthExpired) {
            warn!("Drive rejected the session, going offline");
            self.drop_session();
        }
        e
    }

    /// Writes the local snapshot. Never fails.
    pub fn backup_local(&self, records: &[DebtRecord]) -> bool {
        self.local.write(records)
    }

    /// Records of the local snapshot, empty when absent or corrupt.
    pub fn restore_local(&self) -> Vec<DebtRecord> {
        self.local.read()
    }

    pub async fn backup_cloud(&mut self, records: &[DebtRecord]) -> Result<RemoteFile> {
        let session = self.usable_session().await?;

        self.local.write(records);

        let envelope = CloudBackup {
            data: records.to_vec(),
            timestamp: Utc::now(),
            version: BACKUP_VERSION.to_string(),
            backup_count: self.local.count().to_string(),
            source: Some(CLOUD_SOURCE.to_string()),
        };
        let name = backup_file_name(&self.file_prefix, envelope.timestamp.date_naive());
        let body = serde_json::to_string_pretty(&envelope)?;

        match self.provider.upload(&session, &name, &body).await {
            Ok(file) => {
                info!("Google Drive backup successful: {}", file.name);
                Ok(file)
            }
            Err(e) => {
                error!("Google Drive backup failed: {}", e);
                Err(self.on_cloud_error(e))
            }
        }
    }

    pub async fn restore_cloud(&mut self) -> Result<Vec<DebtRecord>> {
        let session = self.usable_session().await?;
        let pattern = format!("{}-backup", self.file_prefix);

        let mut files = match self.provider.list(&session, &pattern).await {
            Ok(files) => files,
            Err(e) => {
                error!("Listing Drive backups failed: {}", e);
                return Err(self.on_cloud_error(e));
            }
        };
        files.retain(|f| f.name.contains(&pattern));
        files.sort_by(|a, b| b.created_time.cmp(&a.created_time));

        let newest = files.into_iter().next().ok_or(LedgerError::BackupNotFound)?;
        info!("Found backup file: {}", newest.name);

        let body = match self.provider.download(&session, &newest.id).await {
            Ok(body) => body,
            Err(e) => {
                error!("Downloading {} failed: {}", newest.name, e);
                return Err(self.on_cloud_error(e));
            }
        };

        let records = parse_backup_body(&body)?;
        info!("Google Drive restore successful ({} records)", records.len());
        Ok(records)
    }

    pub fn status(&self) -> BackupStatus {
        BackupStatus {
            state: format!("{:?}", self.state),
            cloud_configured: self.configured,
            local_backup_count: self.local.count(),
            last_local_backup: self.local.snapshot().map(|s| s.timestamp),
        }
    }
}
