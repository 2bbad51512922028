//! In-memory [`CloudProvider`] used by the backup tests.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use crate::{CloudProvider, CloudSession, LedgerError, RemoteFile, Result};

#[derive(Default)]
pub struct FakeDrive {
    /// Every provider call, sign-in included.
    pub calls: AtomicU64,
    pub interactive_calls: AtomicU64,
    pub uploads: AtomicU64,
    pub refreshes: AtomicU64,
    files: Mutex<Vec<(RemoteFile, String)>>,
    fail_next: Mutex<Option<u16>>,
}

impl FakeDrive {
    pub fn session() -> CloudSession {
        CloudSession {
            access_token: "fake-access".into(),
            refresh_token: Some("fake-refresh".into()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    /// A session whose access token is already past its expiry.
    pub fn expired_session(refresh_token: Option<&str>) -> CloudSession {
        CloudSession {
            access_token: "fake-stale".into(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
        }
    }

    pub fn put_file(&self, name: &str, body: &str) -> RemoteFile {
        let mut files = self.files.lock().unwrap();
        let index = files.len() as i64;
        let file = RemoteFile {
            id: format!("file-{}", index),
            name: name.to_string(),
            created_time: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(index)),
        };
        files.push((file.clone(), body.to_string()));
        file
    }

    pub fn uploaded_bodies(&self) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| body.clone())
            .collect()
    }

    /// Makes the next data call fail with `status`.
    pub fn fail_next_with(&self, status: u16) {
        *self.fail_next.lock().unwrap() = Some(status);
    }

    /// Counts a data call; expired tokens are rejected like a 401.
    fn record_call(&self, session: &CloudSession) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !session.is_fresh(Utc::now()) {
            return Err(LedgerError::AuthExpired);
        }
        match self.fail_next.lock().unwrap().take() {
            Some(401) => Err(LedgerError::AuthExpired),
            Some(status) => Err(LedgerError::Provider {
                status,
                message: "rejected by fake".into(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CloudProvider for FakeDrive {
    async fn silent_sign_in(
        &self,
        stored: Option<&CloudSession>,
    ) -> Result<Option<CloudSession>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match stored {
            Some(session) if !session.is_fresh(Utc::now()) => match &session.refresh_token {
                Some(refresh_token) => {
                    self.refreshes.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(CloudSession {
                        access_token: "fake-refreshed".into(),
                        refresh_token: Some(refresh_token.clone()),
                        expires_at: Some(Utc::now() + Duration::hours(1)),
                    }))
                }
                None => Ok(None),
            },
            stored => Ok(stored.cloned()),
        }
    }

    async fn interactive_sign_in(&self) -> Result<CloudSession> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.interactive_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::session())
    }

    async fn sign_out(&self, _session: &CloudSession) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload(&self, session: &CloudSession, name: &str, content: &str) -> Result<RemoteFile> {
        self.record_call(session)?;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(self.put_file(name, content))
    }

    async fn list(&self, session: &CloudSession, name_contains: &str) -> Result<Vec<RemoteFile>> {
        self.record_call(session)?;
        let mut files: Vec<RemoteFile> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| f.name.contains(name_contains))
            .map(|(f, _)| f.clone())
            .collect();
        files.reverse();
        Ok(files)
    }

    async fn download(&self, session: &CloudSession, file_id: &str) -> Result<String> {
        self.record_call(session)?;
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|(f, _)| f.id == file_id)
            .map(|(_, body)| body.clone())
            .ok_or(LedgerError::Provider {
                status: 404,
                message: "no such file".into(),
            })
    }
}
