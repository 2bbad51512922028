//! Cloud storage seam and its Google Drive implementation.
//!
//! Backups live in the app-private `appDataFolder`. Authorization uses the
//! OAuth device flow, which works from a terminal: the user opens a URL on any
//! device and types the short code shown here.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{DriveSettings, LedgerError, Result};

const DEVICE_CODE_URL: &str = "https://oauth2.googleapis.com/device/code";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.appdata";
const DEVICE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const APP_FOLDER: &str = "appDataFolder";
const MULTIPART_BOUNDARY: &str = "-------314159265358979323846";

/// Upper bound for one request, so a hung upload cannot hold the backup lock.
const REQUEST_TIMEOUT_SECS: u64 = 60;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Signed-in cloud session, persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CloudSession {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| at - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now)
    }
}

/// A document stored with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
}

/// Operations the backup manager needs from a cloud drive.
///
/// Implementations map an unauthorized response to
/// [`LedgerError::AuthExpired`] and any other rejection to
/// [`LedgerError::Provider`].
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Re-establishes a session without prompting the user.
    async fn silent_sign_in(&self, stored: Option<&CloudSession>)
        -> Result<Option<CloudSession>>;

    /// Runs the interactive consent flow.
    async fn interactive_sign_in(&self) -> Result<CloudSession>;

    async fn sign_out(&self, session: &CloudSession) -> Result<()>;

    async fn upload(&self, session: &CloudSession, name: &str, content: &str)
        -> Result<RemoteFile>;

    /// Files whose name contains `name_contains`, newest first.
    async fn list(&self, session: &CloudSession, name_contains: &str) -> Result<Vec<RemoteFile>>;

    async fn download(&self, session: &CloudSession, file_id: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_url: String,
    expires_in: u64,
    #[serde(default = "default_poll_interval")]
    interval: u64,
}

fn default_poll_interval() -> u64 {
    5
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

/// Google Drive REST client.
pub struct GoogleDrive {
    client: reqwest::Client,
    client_id: String,
    client_secret: Option<String>,
}

impl GoogleDrive {
    pub fn new(settings: &DriveSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            client_id: settings.effective_client_id().unwrap_or_default(),
            client_secret: settings.client_secret.clone(),
        })
    }

    fn session_from(token: TokenResponse, previous_refresh: Option<&str>) -> CloudSession {
        CloudSession {
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        }
    }

    fn token_form<'a>(&'a self, extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut form = vec![("client_id", self.client_id.as_str())];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        form.extend_from_slice(extra);
        form
    }

    async fn refresh(&self, refresh_token: &str) -> Result<CloudSession> {
        let form = self.token_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ]);
        let resp = check_status(self.client.post(TOKEN_URL).form(&form).send().await?).await?;
        let token: TokenResponse = resp.json().await?;
        Ok(Self::session_from(token, Some(refresh_token)))
    }
}

/// Maps a non-success response to the error taxonomy.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(LedgerError::AuthExpired);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(LedgerError::Provider {
        status: status.as_u16(),
        message,
    })
}

fn multipart_body(name: &str, content: &str) -> Result<String> {
    let metadata = serde_json::json!({
        "name": name,
        "parents": [APP_FOLDER],
        "description": "Debt ledger backup",
        "mimeType": "application/json",
    });
    Ok(format!(
        "\r\n--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: application/json\r\n\r\n{content}\r\n--{b}--",
        b = MULTIPART_BOUNDARY,
        meta = serde_json::to_string(&metadata)?,
        content = content,
    ))
}

fn name_query(name_contains: &str) -> String {
    format!(
        "name contains '{}' and '{}' in parents and trashed = false",
        name_contains.replace('\\', "\\\\").replace('\'', "\\'"),
        APP_FOLDER
    )
}

#[async_trait]
impl CloudProvider for GoogleDrive {
    async fn silent_sign_in(
        &self,
        stored: Option<&CloudSession>,
    ) -> Result<Option<CloudSession>> {
        let Some(session) = stored else {
            debug!("No stored Drive session");
            return Ok(None);
        };
        if session.is_fresh(Utc::now()) {
            return Ok(Some(session.clone()));
        }
        match &session.refresh_token {
            Some(refresh_token) => match self.refresh(refresh_token).await {
                Ok(refreshed) => {
                    info!("Drive session refreshed");
                    Ok(Some(refreshed))
                }
                Err(LedgerError::Provider { status, message }) => {
                    warn!("Drive token refresh rejected ({}): {}", status, message);
                    Ok(None)
                }
                Err(LedgerError::AuthExpired) => Ok(None),
                Err(e) => Err(e),
            },
            None => Ok(None),
        }
    }

    async fn interactive_sign_in(&self) -> Result<CloudSession> {
        let form = self.token_form(&[("scope", DRIVE_SCOPE)]);
        let resp =
            check_status(self.client.post(DEVICE_CODE_URL).form(&form).send().await?).await?;
        let device: DeviceCodeResponse = resp.json().await?;

        println!(
            "Open {} and enter the code {}",
            console::style(&device.verification_url).underlined(),
            console::style(&device.user_code).bold().cyan()
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(device.expires_in);
        let mut interval = device.interval.max(1);
        loop {
            tokio::time::sleep(Duration::from_secs(interval)).await;
            if tokio::time::Instant::now() > deadline {
                return Err(LedgerError::ApplicationError {
                    message: "Sign-in code expired before it was confirmed".to_string(),
                });
            }

            let form = self.token_form(&[
                ("device_code", device.device_code.as_str()),
                ("grant_type", DEVICE_GRANT),
            ]);
            let resp = self.client.post(TOKEN_URL).form(&form).send().await?;
            if resp.status().is_success() {
                let token: TokenResponse = resp.json().await?;
                info!("Drive consent granted");
                return Ok(Self::session_from(token, None));
            }

            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let oauth: Option<OAuthErrorResponse> = serde_json::from_str(&body).ok();
            match oauth.as_ref().map(|e| e.error.as_str()) {
                Some("authorization_pending") => debug!("Waiting for Drive consent"),
                Some("slow_down") => interval += 5,
                Some("access_denied") => {
                    return Err(LedgerError::ApplicationError {
                        message: "Access to Google Drive was denied".to_string(),
                    })
                }
                _ => {
                    let message = oauth
                        .and_then(|e| e.error_description.or(Some(e.error)))
                        .unwrap_or(body);
                    return Err(LedgerError::Provider { status, message });
                }
            }
        }
    }

    async fn sign_out(&self, session: &CloudSession) -> Result<()> {
        let token = session
            .refresh_token
            .as_deref()
            .unwrap_or(&session.access_token);
        check_status(
            self.client
                .post(REVOKE_URL)
                .form(&[("token", token)])
                .send()
                .await?,
        )
        .await?;
        info!("Drive token revoked");
        Ok(())
    }

    async fn upload(
        &self,
        session: &CloudSession,
        name: &str,
        content: &str,
    ) -> Result<RemoteFile> {
        info!("Uploading {} ({} bytes) to Drive", name, content.len());
        let resp = self
            .client
            .post(UPLOAD_URL)
            .bearer_auth(&session.access_token)
            .query(&[("uploadType", "multipart"), ("fields", "id,name,createdTime")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary=\"{}\"", MULTIPART_BOUNDARY),
            )
            .body(multipart_body(name, content)?)
            .send()
            .await?;
        let file: RemoteFile = check_status(resp).await?.json().await?;
        info!("Uploaded Drive file {}", file.id);
        Ok(file)
    }

    async fn list(&self, session: &CloudSession, name_contains: &str) -> Result<Vec<RemoteFile>> {
        let query = name_query(name_contains);
        debug!("Listing Drive files: {}", query);
        let resp = self
            .client
            .get(FILES_URL)
            .bearer_auth(&session.access_token)
            .query(&[
                ("spaces", APP_FOLDER),
                ("q", query.as_str()),
                ("orderBy", "createdTime desc"),
                ("pageSize", "10"),
                ("fields", "files(id,name,createdTime)"),
            ])
            .send()
            .await?;
        let list: FileList = check_status(resp).await?.json().await?;
        debug!("Drive returned {} files", list.files.len());
        Ok(list.files)
    }

    async fn download(&self, session: &CloudSession, file_id: &str) -> Result<String> {
        let resp = self
            .client
            .get(format!("{}/{}", FILES_URL, file_id))
            .bearer_auth(&session.access_token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        Ok(check_status(resp).await?.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_freshness_respects_margin() {
        let now = Utc::now();
        let mut session = CloudSession {
            access_token: "t".into(),
            refresh_token: None,
            expires_at: Some(now + chrono::Duration::seconds(30)),
        };
        assert!(!session.is_fresh(now));
        session.expires_at = Some(now + chrono::Duration::minutes(30));
        assert!(session.is_fresh(now));
        session.expires_at = None;
        assert!(!session.is_fresh(now));
    }

    #[test]
    fn multipart_body_carries_metadata_and_content() {
        let body = multipart_body("qarz-daftari-backup-2026-10-18.json", "{\"data\":[]}").unwrap();
        assert!(body.contains("\"parents\":[\"appDataFolder\"]"));
        assert!(body.contains("{\"data\":[]}"));
        assert!(body.ends_with(&format!("--{}--", MULTIPART_BOUNDARY)));
    }

    #[test]
    fn name_query_escapes_quotes() {
        let q = name_query("o'shop-backup");
        assert!(q.starts_with("name contains 'o\\'shop-backup'"));
    }

    #[test]
    fn remote_file_reads_drive_fields() {
        let json = r#"{"id":"abc","name":"qarz-daftari-backup-2026-10-18.json","createdTime":"2026-10-18T09:00:00.000Z"}"#;
        let file: RemoteFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.id, "abc");
        assert!(file.created_time.is_some());
    }

    #[test]
    fn client_builds_from_settings() {
        let settings = DriveSettings {
            client_id: Some("1234567890-test.apps.googleusercontent.com".into()),
            client_secret: None,
        };
        let drive = GoogleDrive::new(&settings).unwrap();
        if std::env::var(crate::CLIENT_ID_ENV).is_err() {
            assert_eq!(drive.client_id, "1234567890-test.apps.googleusercontent.com");
        }
    }
}
