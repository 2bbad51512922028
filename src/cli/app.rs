//! CLI module for the debtbook application
//!
//! This module turns parsed commands into calls on the ledger, the backup
//! manager and the session guard, and prints the results.
use std::{
    io::{stdin, stdout, Write},
    path::PathBuf,
    sync::Arc,
};

use chrono::{Local, Utc};
use console::{style, Term};
use log::{debug, info};
use tokio::sync::Mutex;

use crate::{
    format_amount, format_name, Argon2CredentialStore, BackupManager, BackupScheduler, Commands,
    Config, DebtPatch, DebtRecord, DriveAction, GoogleDrive, LedgerError, LocalStore, LoginPrompt,
    NewDebt, Receipt, RecordStore, RestoreSource, Result, SessionGuard, Statistics, MONTH_LABELS,
};

/// File in the data directory holding the username and password hash.
const CREDENTIALS_FILE: &str = "credentials.json";

/// CLI Application handler - processes CLI commands
pub struct App {
    /// Application configuration
    config: Config,

    /// Where `config --set/--reset` writes to
    config_path: PathBuf,

    ledger: Arc<Mutex<RecordStore>>,

    backup: Arc<Mutex<BackupManager<GoogleDrive>>>,

    session: SessionGuard<Argon2CredentialStore>,

    /// Whether to display verbose output
    verbose: bool,
}

impl App {
    /// Opens the local store under `config.data_dir` and wires the components.
    pub fn new(config: Config, config_path: PathBuf, verbose: bool) -> Result<Self> {
        let store = LocalStore::open(&config.data_dir)?;
        let ledger = RecordStore::load(store.clone(), config.date_format.clone());
        let backup = BackupManager::from_config(&config, store.clone())?;
        let credentials = Argon2CredentialStore::new(config.data_dir.join(CREDENTIALS_FILE));
        let session = SessionGuard::new(store, credentials);

        Ok(Self {
            config,
            config_path,
            ledger: Arc::new(Mutex::new(ledger)),
            backup: Arc::new(Mutex::new(backup)),
            session,
            verbose,
        })
    }

    /// Run the CLI application with the given command
    pub async fn run(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Login {
                username,
                password,
                change_user,
            } => self.handle_login(username, password, change_user),

            Commands::Logout => {
                self.session.logout()?;
                println!("Logged out.");
                Ok(())
            }

            Commands::Passwd => self.handle_passwd(),

            Commands::Config { show, set, reset } => self.handle_config(show, set, reset),

            command => {
                self.session.require_authenticated()?;
                self.warn_password_rotation()?;
                self.run_authenticated(command).await
            }
        }
    }

    async fn run_authenticated(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Add {
                name,
                phone,
                amount,
                receipt,
            } => self.handle_add(name, phone, amount, receipt).await,

            Commands::Edit {
                id,
                name,
                phone,
                amount,
                paid,
            } => {
                let patch = DebtPatch {
                    name: name.map(|n| format_name(&n)),
                    phone,
                    amount,
                    paid,
                };
                self.handle_edit(id, patch).await
            }

            Commands::Delete { id, force } => self.handle_delete(id, force).await,

            Commands::Toggle { id } => {
                let record = self.ledger.lock().await.toggle_paid(&id)?;
                println!(
                    "{} is now {}",
                    style(&record.name).bold(),
                    paid_label(record.paid)
                );
                Ok(())
            }

            Commands::List {
                all,
                limit,
                paid,
                unpaid,
                json,
            } => self.handle_list(all, limit, paid, unpaid, json).await,

            Commands::Search { query, fuzzy, json } => {
                let results = {
                    let ledger = self.ledger.lock().await;
                    if fuzzy {
                        ledger.fuzzy_search(&query)
                    } else {
                        ledger.search(&query)
                    }
                };
                if results.is_empty() {
                    println!("No records found matching query: \"{}\"", query);
                    return Ok(());
                }
                self.display_records(&results, json)?;
                println!("\nFound {} matching records.", results.len());
                Ok(())
            }

            Commands::Stats { days, years, json } => self.handle_stats(days, years, json).await,

            Commands::Receipt { id, output, note } => {
                let record = {
                    let ledger = self.ledger.lock().await;
                    ledger
                        .get(&id)
                        .cloned()
                        .ok_or(LedgerError::RecordNotFound { id })?
                };
                self.export_receipt(&record, output, note)
            }

            Commands::Backup { cloud } => self.handle_backup(cloud).await,

            Commands::Restore { from, force } => self.handle_restore(from, force).await,

            Commands::Drive { action } => self.handle_drive(action).await,

            Commands::Autobackup => self.handle_autobackup().await,

            Commands::Login { .. } | Commands::Logout | Commands::Passwd | Commands::Config { .. } => {
                Ok(())
            }
        }
    }

    fn handle_login(
        &self,
        username: Option<String>,
        password: Option<String>,
        change_user: bool,
    ) -> Result<()> {
        if !self.session.credentials_set_up() {
            return Err(LedgerError::CredentialsNotSet);
        }
        if change_user {
            self.session.forget_user()?;
        }

        match self.session.prompt() {
            LoginPrompt::PasswordOnly { username: remembered }
                if username.as_deref().map_or(true, |u| u.trim() == remembered) =>
            {
                println!("Welcome back, {}", style(&remembered).bold());
                let password = match password {
                    Some(p) => p,
                    None => read_password("Password: ")?,
                };
                self.session.unlock(&password)?;
            }
            _ => {
                let username = match username {
                    Some(u) => u,
                    None => read_line("Username: ")?,
                };
                let password = match password {
                    Some(p) => p,
                    None => read_password("Password: ")?,
                };
                self.session.login(&username, &password, Utc::now())?;
            }
        }

        println!("{}", style("Logged in.").green());
        Ok(())
    }

    fn handle_passwd(&mut self) -> Result<()> {
        if !self.session.credentials_set_up() {
            println!("No credentials yet, choose a username and password.");
            let username = read_line("Username: ")?;
            let password = read_new_password()?;
            self.session.setup_credentials(&username, &password)?;
            println!(
                "{} Log in with `debtbook login`.",
                style("Credentials saved.").green()
            );
            return Ok(());
        }

        self.session.require_authenticated()?;
        let current = read_password("Current password: ")?;
        let new = read_new_password()?;
        self.session.change_password(&current, &new, Utc::now())?;
        println!("{}", style("Password changed.").green());
        Ok(())
    }

    /// Shows the monthly password reminder once, then records the dismissal.
    fn warn_password_rotation(&self) -> Result<()> {
        let now = Utc::now();
        if self.session.password_rotation_due(now) {
            eprintln!(
                "{}",
                style("Your password is more than a month old. Change it with `debtbook passwd`.")
                    .yellow()
            );
            self.session.dismiss_rotation_warning(now)?;
        }
        Ok(())
    }

    async fn handle_add(&self, name: String, phone: String, amount: u64, receipt: bool) -> Result<()> {
        let name = format_name(&name);
        let record = {
            let mut ledger = self.ledger.lock().await;
            let existed = ledger.find_by_name_case_insensitive(&name).is_some();
            let record = ledger.add(NewDebt {
                name,
                phone,
                amount,
            })?;
            if existed {
                println!(
                    "Existing customer {} topped up by {} so'm",
                    style(&record.name).bold(),
                    format_amount(amount)
                );
            } else {
                println!("Debt recorded with ID: {}", record.id);
            }
            record
        };
        println!(
            "{} | {} | {} so'm",
            record.name,
            record.phone,
            style(format_amount(record.amount)).bold()
        );

        if receipt {
            self.export_receipt(&record, None, None)?;
        }
        Ok(())
    }

    async fn handle_edit(&self, id: String, patch: DebtPatch) -> Result<()> {
        if patch.is_empty() {
            return Err(LedgerError::ApplicationError {
                message: "Nothing to change, pass --name, --phone, --amount or --paid".to_string(),
            });
        }
        let record = self.ledger.lock().await.update(&id, patch)?;
        println!("Record {} updated successfully", record.id);
        self.display_records(std::slice::from_ref(&record), false)
    }

    async fn handle_delete(&self, id: String, force: bool) -> Result<()> {
        let record = match self.ledger.lock().await.get(&id) {
            Some(record) => record.clone(),
            None => return Err(LedgerError::RecordNotFound { id }),
        };

        if !force {
            println!("You are about to delete the following record:");
            println!("ID:       {}", record.id);
            println!("Customer: {}", record.name);
            println!("Phone:    {}", record.phone);
            println!("Amount:   {} so'm", format_amount(record.amount));
            println!("Date:     {}", record.date_created);

            println!("\nThis action cannot be undone!");
            if !confirm("Are you sure you want to delete this record? [y/N]: ")? {
                println!("Deletion cancelled.");
                return Ok(());
            }
        }

        self.ledger.lock().await.remove(&id)?;
        println!(
            "Record '{}' ({}) has been permanently deleted.",
            record.name, record.id
        );
        Ok(())
    }

    async fn handle_list(
        &self,
        all: bool,
        limit: usize,
        paid: bool,
        unpaid: bool,
        json: bool,
    ) -> Result<()> {
        let (mut records, paid_count, total) = {
            let ledger = self.ledger.lock().await;
            let paid_count = ledger.records().iter().filter(|r| r.paid).count();
            (ledger.sorted_by_amount(), paid_count, ledger.len())
        };

        if paid || unpaid {
            records.retain(|r| r.paid == paid);
        }
        if !all {
            records.truncate(limit);
        }

        if records.is_empty() {
            println!("No records found matching the criteria.");
            return Ok(());
        }
        self.display_records(&records, json)?;

        if !json {
            println!(
                "\nShowing {} of {} records ({} paid, {} unpaid)",
                records.len(),
                total,
                style(paid_count).green(),
                style(total - paid_count).red()
            );
        }
        Ok(())
    }

    async fn handle_stats(&self, days: usize, years: usize, json: bool) -> Result<()> {
        let stats = {
            let ledger = self.ledger.lock().await;
            Statistics::compute(
                ledger.records(),
                Local::now().date_naive(),
                ledger.date_format(),
                days,
                years,
            )
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }

        let t = &stats.totals;
        println!("{}", style("Totals").bold());
        println!("  Records:  {}", t.count);
        println!("  Total:    {} so'm", format_amount(t.total));
        println!(
            "  Paid:     {} so'm ({}%, {} records)",
            style(format_amount(t.paid)).green(),
            stats.paid_percent,
            stats.paid_count
        );
        println!(
            "  Unpaid:   {} so'm ({}%, {} records)",
            style(format_amount(t.unpaid)).red(),
            stats.unpaid_percent,
            stats.unpaid_count
        );

        println!("\n{}", style("This period").bold());
        println!("  Today:       {} so'm", format_amount(stats.periods.today));
        println!("  This month:  {} so'm", format_amount(stats.periods.this_month));
        println!("  This year:   {} so'm", format_amount(stats.periods.this_year));

        let daily: Vec<(String, u64)> = stats
            .daily
            .iter()
            .map(|d| (d.date.clone(), d.amount))
            .collect();
        print_chart(&format!("Last {} days", days), &daily);

        let monthly: Vec<(String, u64)> = MONTH_LABELS
            .iter()
            .zip(stats.monthly.iter())
            .map(|(label, amount)| (label.to_string(), *amount))
            .collect();
        print_chart("By month", &monthly);

        let yearly: Vec<(String, u64)> = stats
            .yearly
            .iter()
            .map(|y| (y.year.to_string(), y.amount))
            .collect();
        print_chart(&format!("Last {} years", years), &yearly);
        Ok(())
    }

    fn export_receipt(
        &self,
        record: &DebtRecord,
        output: Option<PathBuf>,
        note: Option<String>,
    ) -> Result<()> {
        let dir = output.unwrap_or_else(|| self.config.receipts_dir.clone());
        let receipt = Receipt::new(&self.config.shop, record, Local::now()).with_note(note);
        let path = receipt.export(&dir)?;

        if self.verbose {
            println!("{}", receipt.render());
        }
        println!("Receipt saved to {}", style(path.display()).cyan());
        Ok(())
    }

    async fn handle_backup(&self, cloud: bool) -> Result<()> {
        let records = self.ledger.lock().await.records().to_vec();
        let mut backup = self.backup.lock().await;

        if cloud {
            // backup_cloud writes the local snapshot itself
            backup.initialize().await;
            let file = backup.backup_cloud(&records).await?;
            println!(
                "Local backup written and {} uploaded to Google Drive.",
                style(&file.name).cyan()
            );
        } else if backup.backup_local(&records) {
            println!("Local backup written ({} records).", records.len());
        } else {
            eprintln!("{}", style("Local backup could not be written.").yellow());
        }
        Ok(())
    }

    async fn handle_restore(&self, from: RestoreSource, force: bool) -> Result<()> {
        let records = {
            let mut backup = self.backup.lock().await;
            match from {
                RestoreSource::Local => {
                    let records = backup.restore_local();
                    if records.is_empty() {
                        return Err(LedgerError::BackupNotFound);
                    }
                    records
                }
                RestoreSource::Cloud => {
                    backup.initialize().await;
                    backup.restore_cloud().await?
                }
            }
        };

        let current = self.ledger.lock().await.len();
        if !force {
            println!(
                "The backup holds {} records and will replace the {} records in the ledger.",
                records.len(),
                current
            );
            if !confirm("Continue with the restore? [y/N]: ")? {
                println!("Restore cancelled.");
                return Ok(());
            }
        }

        let restored = records.len();
        self.ledger.lock().await.replace_all(records)?;
        info!("Restored {} records from {:?} backup", restored, from);
        println!("{}", style(format!("Restored {} records.", restored)).green());
        Ok(())
    }

    async fn handle_drive(&self, action: DriveAction) -> Result<()> {
        let mut backup = self.backup.lock().await;
        match action {
            DriveAction::SignIn => {
                backup.sign_in().await?;
                println!("{}", style("Google Drive linked.").green());
            }
            DriveAction::SignOut => {
                backup.sign_out().await?;
                println!("Signed out of Google Drive.");
            }
            DriveAction::Status { json } => {
                backup.initialize().await;
                let status = backup.status();
                if json {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                } else {
                    println!("State:               {}", status.state);
                    println!(
                        "Google Drive:        {}",
                        if status.cloud_configured {
                            style("configured").green()
                        } else {
                            style("not configured").yellow()
                        }
                    );
                    println!("Local backups:       {}", status.local_backup_count);
                    match status.last_local_backup {
                        Some(at) => println!(
                            "Last local backup:   {}",
                            at.with_timezone(&Local).format("%d.%m.%Y %H:%M:%S")
                        ),
                        None => println!("Last local backup:   never"),
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_autobackup(&self) -> Result<()> {
        {
            let mut backup = self.backup.lock().await;
            if !backup.is_configured() {
                return Err(LedgerError::NotConfigured);
            }
            backup.initialize().await;
            if !backup.is_cloud_linked() {
                return Err(LedgerError::AuthRequired);
            }
        }

        let mut scheduler = BackupScheduler::from_config(&self.config, Arc::clone(&self.backup));
        scheduler.set_ledger(Arc::clone(&self.ledger));
        scheduler.start().await?;

        if !scheduler.get_status().await.is_running {
            println!("Automatic backup is disabled, enable it with `config --set auto_backup=true`.");
            return Ok(());
        }
        println!(
            "Uploading a backup every {} minutes. Press Ctrl-C to stop.",
            self.config.cloud_backup_interval_minutes.max(1)
        );
        scheduler.create_backup_now().await?;

        tokio::signal::ctrl_c().await?;
        scheduler.stop().await?;

        let status = scheduler.get_status().await;
        if let Some(name) = status.last_backup_name {
            println!("Last upload: {}", name);
        }
        if let Some(e) = status.last_error {
            eprintln!("{} {}", style("Last error:").red(), e);
        }
        Ok(())
    }

    fn handle_config(&mut self, show: bool, set: Option<String>, reset: bool) -> Result<()> {
        let show = show || (set.is_none() && !reset);

        if reset {
            if !confirm("Reset the configuration to defaults? [y/N]: ")? {
                println!("Reset cancelled.");
                return Ok(());
            }
            self.config = Config::default();
            self.config.save(&self.config_path)?;
            println!("Configuration reset.");
        }

        if let Some(assignment) = set {
            self.config.set(&assignment)?;
            self.config.save(&self.config_path)?;
            println!("Updated {}", style(assignment).cyan());
        }

        if show {
            println!("# {}", self.config_path.display());
            println!("{}", serde_json::to_string_pretty(&self.config)?);
        }
        Ok(())
    }

    /// Display records as a table or as JSON
    fn display_records(&self, records: &[DebtRecord], json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(records)?);
            return Ok(());
        }

        let term_width = terminal_size::terminal_size()
            .map(|(w, _)| w.0 as usize)
            .unwrap_or(80);

        for (i, record) in records.iter().enumerate() {
            if i > 0 {
                println!("{}", "-".repeat(term_width.min(50)));
            }
            println!("ID: {} | Date: {}", record.id, record.date_created);
            println!(
                "{}  {}",
                style(&record.name).bold(),
                style(&record.phone).dim()
            );
            println!(
                "{} so'm  {}",
                format_amount(record.amount),
                paid_label(record.paid)
            );
        }
        Ok(())
    }
}

fn paid_label(paid: bool) -> console::StyledObject<&'static str> {
    if paid {
        style("PAID").green()
    } else {
        style("UNPAID").red()
    }
}

/// Horizontal bar chart scaled to the terminal width.
fn print_chart(title: &str, rows: &[(String, u64)]) {
    println!("\n{}", style(title).bold());
    let max = rows.iter().map(|(_, amount)| *amount).max().unwrap_or(0);
    if max == 0 {
        println!("  no debts in this period");
        return;
    }

    let label_width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    let term_width = terminal_size::terminal_size()
        .map(|(w, _)| w.0 as usize)
        .unwrap_or(80);
    let bar_space = term_width.saturating_sub(label_width + 20).clamp(10, 60);

    for (label, amount) in rows {
        let len = ((*amount as f64 / max as f64) * bar_space as f64).round() as usize;
        println!(
            "  {:<w$} {} {}",
            label,
            style("#".repeat(len)).cyan(),
            format_amount(*amount),
            w = label_width
        );
    }
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    stdout().flush().map_err(LedgerError::Io)?;

    let mut input = String::new();
    stdin().read_line(&mut input).map_err(LedgerError::Io)?;
    Ok(input.trim().to_string())
}

fn confirm(prompt: &str) -> Result<bool> {
    let input = read_line(prompt)?.to_lowercase();
    Ok(input == "y" || input == "yes")
}

fn read_password(prompt: &str) -> Result<String> {
    let term = Term::stderr();
    term.write_str(prompt)?;
    let password = term.read_secure_line()?;
    debug!("Password read from terminal");
    Ok(password)
}

fn read_new_password() -> Result<String> {
    let first = read_password("New password: ")?;
    let second = read_password("Repeat new password: ")?;
    if first != second {
        return Err(LedgerError::ApplicationError {
            message: "Passwords do not match".to_string(),
        });
    }
    Ok(first)
}
