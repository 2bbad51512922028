use std::{
    fs,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{write_atomic, LedgerError, Result};

/// Placeholder value shipped in sample configs; never counts as configured.
const PLACEHOLDER_CLIENT_ID: &str = "your_google_client_id_here";

/// Environment override for the Drive OAuth client id.
pub const CLIENT_ID_ENV: &str = "DEBTBOOK_GOOGLE_CLIENT_ID";

/// Shop identity printed on receipts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShopInfo {
    pub name: String,
    pub address: String,
    pub phone: String,
}

impl Default for ShopInfo {
    fn default() -> Self {
        Self {
            name: "Mening Do'konim".to_string(),
            address: "Toshkent shahar".to_string(),
            phone: "+998 90 123 45 67".to_string(),
        }
    }
}

/// OAuth client used for Google Drive backups.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DriveSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl DriveSettings {
    /// Client id after applying the environment override.
    pub fn effective_client_id(&self) -> Option<String> {
        std::env::var(CLIENT_ID_ENV)
            .ok()
            .or_else(|| self.client_id.clone())
    }

    /// A real client id is longer than 10 chars and not the placeholder.
    pub fn is_configured(&self) -> bool {
        self.effective_client_id()
            .is_some_and(|id| id != PLACEHOLDER_CLIENT_ID && id.len() > 10)
    }
}

/// Application configuration settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Directory holding the local key-value files
    pub data_dir: PathBuf,

    /// Directory receipts are exported to
    pub receipts_dir: PathBuf,

    /// chrono format used for `dateCreated`
    pub date_format: String,

    /// Cloud backup files are named `<prefix>-backup-<date>.json`
    pub backup_file_prefix: String,

    /// How often the scheduler uploads a cloud backup (in minutes)
    pub cloud_backup_interval_minutes: u64,

    /// Whether `autobackup` should run the periodic cloud upload
    pub auto_backup: bool,

    pub shop: ShopInfo,

    pub google_drive: DriveSettings,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".debtbook"));

        Self {
            receipts_dir: data_dir.join("receipts"),
            data_dir,
            date_format: "%d.%m.%Y".to_string(),
            backup_file_prefix: "qarz-daftari".to_string(),
            cloud_backup_interval_minutes: 10,
            auto_backup: true,
            shop: ShopInfo::default(),
            google_drive: DriveSettings::default(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("uz", "debtbook", "debtbook")
}

impl Config {
    /// Default location of the config file for this platform.
    pub fn default_path() -> PathBuf {
        project_dirs()
            .map(|dirs| dirs.config_dir().join("config.json"))
            .unwrap_or_else(|| PathBuf::from("debtbook.json"))
    }

    /// Loads the config at `path`, writing the defaults there when it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, writing defaults", path.display());
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        debug!("Loading config from {}", path.display());
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| LedgerError::ConfigError {
            message: format!("{} is not valid: {}", path.display(), e),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|_| LedgerError::DirectoryError {
                    path: parent.to_path_buf(),
                })?;
            }
        }
        write_atomic(path, &serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Applies a `key=value` assignment from the command line.
    pub fn set(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = assignment
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .ok_or_else(|| LedgerError::ConfigError {
                message: format!("expected key=value, got '{}'", assignment),
            })?;

        let invalid = |e: std::num::ParseIntError| LedgerError::ConfigError {
            message: format!("{}: {}", key, e),
        };

        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "receipts_dir" => self.receipts_dir = PathBuf::from(value),
            "date_format" => self.date_format = value.to_string(),
            "backup_file_prefix" => self.backup_file_prefix = value.to_string(),
            "cloud_backup_interval_minutes" => {
                let minutes: u64 = value.parse().map_err(invalid)?;
                if minutes == 0 {
                    return Err(LedgerError::ConfigError {
                        message: "cloud_backup_interval_minutes must be positive".to_string(),
                    });
                }
                self.cloud_backup_interval_minutes = minutes;
            }
            "auto_backup" => {
                self.auto_backup = value.parse().map_err(|_| LedgerError::ConfigError {
                    message: format!("auto_backup expects true or false, got '{}'", value),
                })?
            }
            "shop.name" => self.shop.name = value.to_string(),
            "shop.address" => self.shop.address = value.to_string(),
            "shop.phone" => self.shop.phone = value.to_string(),
            "google_drive.client_id" => {
                self.google_drive.client_id = Some(value.to_string()).filter(|v| !v.is_empty())
            }
            "google_drive.client_secret" => {
                self.google_drive.client_secret =
                    Some(value.to_string()).filter(|v| !v.is_empty())
            }
            other => {
                warn!("Rejected unknown config key {}", other);
                return Err(LedgerError::ConfigError {
                    message: format!("unknown key '{}'", other),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_client_id_is_not_configured() {
        let settings = DriveSettings {
            client_id: Some(PLACEHOLDER_CLIENT_ID.to_string()),
            client_secret: None,
        };
        if std::env::var(CLIENT_ID_ENV).is_err() {
            assert!(!settings.is_configured());
        }
    }

    #[test]
    fn short_client_id_is_not_configured() {
        let settings = DriveSettings {
            client_id: Some("abc".to_string()),
            client_secret: None,
        };
        if std::env::var(CLIENT_ID_ENV).is_err() {
            assert!(!settings.is_configured());
        }
    }

    #[test]
    fn set_updates_nested_keys() {
        let mut config = Config::default();
        config.set("shop.name = Baraka").unwrap();
        config.set("cloud_backup_interval_minutes=3").unwrap();
        assert_eq!(config.shop.name, "Baraka");
        assert_eq!(config.cloud_backup_interval_minutes, 3);
        assert!(config.set("cloud_backup_interval_minutes=0").is_err());
        assert!(config.set("nonsense=1").is_err());
        assert!(config.set("no-equals-sign").is_err());
    }

    #[test]
    fn load_writes_defaults_then_reads_them_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let created = Config::load(&path).unwrap();
        assert!(path.exists());
        let loaded = Config::load(&path).unwrap();
        assert_eq!(created.date_format, loaded.date_format);
        assert_eq!(loaded.backup_file_prefix, "qarz-daftari");
    }
}
