// src/backup_scheduler.rs - Periodic cloud backup
use std::sync::{Arc, Weak};

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use crate::{BackupManager, CloudProvider, Config, LedgerError, RecordStore, Result};

#[derive(Debug, Clone, Default)]
pub struct BackupSchedulerStatus {
    /// Whether the scheduler is running
    pub is_running: bool,
    /// The time the last cloud backup was uploaded
    pub last_backup_time: Option<chrono::DateTime<Utc>>,
    /// Name of the last uploaded file
    pub last_backup_name: Option<String>,
    /// Error of the last failed attempt
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum BackupCommand {
    /// Upload a backup immediately
    CreateBackupNow,
    /// Stop the backup scheduler
    Stop,
}

pub struct BackupScheduler<P: CloudProvider + 'static> {
    /// Time between two scheduled uploads
    interval: Duration,

    /// Whether periodic uploads are enabled at all
    enabled: bool,

    /// Channel to send commands to the scheduler task
    command_tx: mpsc::Sender<BackupCommand>,

    /// Handle to the scheduler task
    scheduler_task: Option<JoinHandle<()>>,

    /// Current status, shared with the task
    status: Arc<Mutex<BackupSchedulerStatus>>,

    /// Weak reference to the ledger
    ledger: Option<Weak<Mutex<RecordStore>>>,

    manager: Arc<Mutex<BackupManager<P>>>,
}

impl<P: CloudProvider + 'static> BackupScheduler<P> {
    pub fn new(interval: Duration, enabled: bool, manager: Arc<Mutex<BackupManager<P>>>) -> Self {
        info!("Initializing backup scheduler, interval {:?}", interval);
        let (command_tx, _) = mpsc::channel(10);

        Self {
            interval,
            enabled,
            command_tx,
            scheduler_task: None,
            status: Arc::new(Mutex::new(BackupSchedulerStatus::default())),
            ledger: None,
            manager,
        }
    }

    pub fn from_config(config: &Config, manager: Arc<Mutex<BackupManager<P>>>) -> Self {
        Self::new(
            Duration::from_secs(config.cloud_backup_interval_minutes.max(1) * 60),
            config.auto_backup,
            manager,
        )
    }

    /// Set the weak reference to the ledger
    pub fn set_ledger(&mut self, ledger: Arc<Mutex<RecordStore>>) {
        self.ledger = Some(Arc::downgrade(&ledger));
        debug!("Ledger reference set in BackupScheduler.");
    }

    /// Start the backup scheduler
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting backup scheduler...");
        if !self.enabled {
            info!("Automatic cloud backup is disabled");
            return Ok(());
        }
        if self.scheduler_task.is_some() {
            debug!("Backup scheduler already running");
            return Ok(());
        }

        let ledger = match &self.ledger {
            Some(weak) => match weak.upgrade() {
                Some(strong) => strong,
                None => {
                    error!("Failed to retrieve ledger - reference is no longer valid.");
                    return Err(LedgerError::ApplicationError {
                        message: "Ledger reference is no longer valid.".to_string(),
                    });
                }
            },
            None => {
                error!("No ledger reference found in BackupScheduler.");
                return Err(LedgerError::ApplicationError {
                    message: "BackupScheduler does not have a ledger reference.".to_string(),
                });
            }
        };

        let (command_tx, mut command_rx) = mpsc::channel(10);
        self.command_tx = command_tx;

        let period = self.interval;
        let manager = Arc::clone(&self.manager);
        let status = Arc::clone(&self.status);

        let task = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.tick().await; // Initial tick

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        run_backup(&ledger, &manager, &status, "Scheduled").await;
                    }
                    Some(cmd) = command_rx.recv() => match cmd {
                        BackupCommand::CreateBackupNow => {
                            run_backup(&ledger, &manager, &status, "Manual").await;
                        },
                        BackupCommand::Stop => {
                            info!("Backup scheduler stopping...");
                            break;
                        }
                    }
                }
            }
        });

        self.scheduler_task = Some(task);
        self.status.lock().await.is_running = true;

        Ok(())
    }

    /// Stop the backup scheduler if it's running
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.scheduler_task.take() {
            if let Err(e) = self.command_tx.send(BackupCommand::Stop).await {
                error!("Failed to send stop command to backup scheduler: {}", e);
            }

            if let Err(e) = task.await {
                let error_mgs = format!("Failed to stop backup scheduler: {}", e);
                error!("{}", error_mgs);
                return Err(LedgerError::ApplicationError { message: error_mgs });
            }

            self.status.lock().await.is_running = false;
            info!("Backup scheduler stopped");
        } else {
            debug!("Backup scheduler is not running");
        }

        Ok(())
    }

    /// Upload a backup immediately, regardless of the schedule
    pub async fn create_backup_now(&self) -> Result<()> {
        if self.scheduler_task.is_none() {
            return Err(LedgerError::ApplicationError {
                message: "Backup scheduler is not running".to_string(),
            });
        }

        self.command_tx
            .send(BackupCommand::CreateBackupNow)
            .await
            .map_err(|e| LedgerError::ApplicationError {
                message: format!("Failed to send backup command: {}", e),
            })?;

        Ok(())
    }

    /// Get the current status of the backup scheduler
    pub async fn get_status(&self) -> BackupSchedulerStatus {
        self.status.lock().await.clone()
    }
}

async fn run_backup<P: CloudProvider>(
    ledger: &Arc<Mutex<RecordStore>>,
    manager: &Arc<Mutex<BackupManager<P>>>,
    status: &Arc<Mutex<BackupSchedulerStatus>>,
    trigger: &str,
) {
    // Other commands write the ledger from their own process; upload what is on disk.
    // The copy keeps the ledger unlocked during the upload.
    let records = ledger.lock().await.reload().to_vec();
    if records.is_empty() {
        debug!("{} backup skipped, ledger is empty", trigger);
        return;
    }

    let result = manager.lock().await.backup_cloud(&records).await;
    let mut status = status.lock().await;
    match result {
        Ok(file) => {
            info!("{} backup completed: {}", trigger, file.name);
            status.last_backup_time = Some(Utc::now());
            status.last_backup_name = Some(file.name);
            status.last_error = None;
        }
        Err(e) => {
            if matches!(e, LedgerError::AuthRequired | LedgerError::AuthExpired) {
                warn!("{} backup skipped: {}", trigger, e);
            } else {
                error!("{} backup failed: {}", trigger, e);
            }
            status.last_error = Some(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{fake_drive::FakeDrive, LocalStore, NewDebt};

    async fn setup(
        dir: &std::path::Path,
        period: Duration,
    ) -> (
        BackupScheduler<FakeDrive>,
        Arc<Mutex<RecordStore>>,
        Arc<Mutex<BackupManager<FakeDrive>>>,
    ) {
        let store = LocalStore::open(dir).unwrap();
        let mut manager = BackupManager::new(FakeDrive::default(), store.clone(), true, "t".into());
        manager.sign_in().await.unwrap();
        let manager = Arc::new(Mutex::new(manager));

        let mut ledger = RecordStore::load(store, "%d.%m.%Y");
        ledger
            .add(NewDebt {
                name: "Ali".into(),
                phone: "901234567".into(),
                amount: 100,
            })
            .unwrap();
        let ledger = Arc::new(Mutex::new(ledger));

        let mut scheduler = BackupScheduler::new(period, true, Arc::clone(&manager));
        scheduler.set_ledger(Arc::clone(&ledger));
        (scheduler, ledger, manager)
    }

    #[tokio::test]
    async fn start_requires_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let manager = Arc::new(Mutex::new(BackupManager::new(
            FakeDrive::default(),
            store,
            true,
            "t".into(),
        )));
        let mut scheduler = BackupScheduler::new(Duration::from_secs(60), true, manager);
        assert!(scheduler.start().await.is_err());
        assert!(scheduler.create_backup_now().await.is_err());
    }

    #[tokio::test]
    async fn manual_trigger_uploads_and_stop_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, _ledger, manager) = setup(dir.path(), Duration::from_secs(3600)).await;

        scheduler.start().await.unwrap();
        assert!(scheduler.get_status().await.is_running);

        scheduler.create_backup_now().await.unwrap();
        for _ in 0..50 {
            if scheduler.get_status().await.last_backup_name.is_some() {
                break;
            }
            time::sleep(Duration::from_millis(20)).await;
        }

        let status = scheduler.get_status().await;
        assert!(status.last_backup_name.unwrap().starts_with("t-backup-"));
        assert_eq!(manager.lock().await.provider().uploads.load(Ordering::SeqCst), 1);

        scheduler.stop().await.unwrap();
        assert!(!scheduler.get_status().await.is_running);
    }

    #[tokio::test]
    async fn interval_uploads_periodically() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, _ledger, manager) = setup(dir.path(), Duration::from_millis(30)).await;

        scheduler.start().await.unwrap();
        time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await.unwrap();

        assert!(manager.lock().await.provider().uploads.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn upload_picks_up_records_written_by_another_process() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, _ledger, manager) = setup(dir.path(), Duration::from_secs(3600)).await;

        // A separate command adds a debt after autobackup loaded the ledger
        let store = LocalStore::open(dir.path()).unwrap();
        let mut other = RecordStore::load(store.clone(), "%d.%m.%Y");
        other
            .add(NewDebt {
                name: "Vali".into(),
                phone: "901234568".into(),
                amount: 200,
            })
            .unwrap();
        assert_eq!(crate::LocalBackup::new(store.clone()).read().len(), 2);

        scheduler.start().await.unwrap();
        scheduler.create_backup_now().await.unwrap();
        for _ in 0..50 {
            if scheduler.get_status().await.last_backup_name.is_some() {
                break;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        scheduler.stop().await.unwrap();

        let bodies = manager.lock().await.provider().uploaded_bodies();
        let uploaded = crate::parse_backup_body(&bodies[0]).unwrap();
        assert_eq!(uploaded.len(), 2);
        // The local snapshot is not rolled back to the stale collection
        assert_eq!(crate::LocalBackup::new(store).read().len(), 2);
    }

    #[tokio::test]
    async fn disabled_scheduler_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let (_, ledger, manager) = setup(dir.path(), Duration::from_millis(10)).await;
        let mut scheduler = BackupScheduler::new(Duration::from_millis(10), false, manager);
        scheduler.set_ledger(ledger);

        scheduler.start().await.unwrap();
        assert!(!scheduler.get_status().await.is_running);
        scheduler.stop().await.unwrap();
    }
}
