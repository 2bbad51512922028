//! Shared types for the debtbook application.
//!
//! This module contains the crate-wide `Result` alias and the subcommand
//! definitions the command line is parsed into.
use std::path::PathBuf;

use clap::{Subcommand, ValueEnum};

use crate::LedgerError;

/// A specialized Result type for debtbook operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Where `restore` reads the records from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RestoreSource {
    /// The snapshot kept next to the ledger
    Local,
    /// The newest backup file in Google Drive
    Cloud,
}

/// Google Drive account operations
#[derive(Debug, Subcommand)]
pub enum DriveAction {
    /// Link a Google account (silent first, then the device code flow)
    SignIn,
    /// Revoke the token and forget the session
    SignOut,
    /// Show the backup state
    Status {
        /// Format output as JSON
        #[clap(short, long)]
        json: bool,
    },
}

/// Available subcommands for the debtbook application
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Log in (password only when the username is remembered)
    Login {
        /// Username, asked for when omitted and not remembered
        #[clap(short, long)]
        username: Option<String>,

        /// Password, read from the terminal when omitted
        #[clap(short, long, env = "DEBTBOOK_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Forget the remembered user and ask for both fields
        #[clap(long)]
        change_user: bool,
    },

    /// Log out and forget the remembered username
    Logout,

    /// Set up credentials the first time, or change the password
    Passwd,

    /// Record a debt; an existing customer with the same name is topped up
    Add {
        /// Customer name
        #[clap(short, long)]
        name: String,

        /// Phone number, 9 local digits or a full +998 number
        #[clap(short, long)]
        phone: String,

        /// Debt amount in so'm
        #[clap(short, long)]
        amount: u64,

        /// Export a receipt for the saved record
        #[clap(short, long)]
        receipt: bool,
    },

    /// Edit an existing record
    Edit {
        /// ID of the record to edit
        id: String,

        /// New customer name
        #[clap(short, long)]
        name: Option<String>,

        /// New phone number
        #[clap(short, long)]
        phone: Option<String>,

        /// New amount
        #[clap(short, long)]
        amount: Option<u64>,

        /// Set the paid flag
        #[clap(long)]
        paid: Option<bool>,
    },

    /// Delete a record by ID
    Delete {
        /// ID of the record to delete
        id: String,

        /// Skip confirmation prompt
        #[clap(short, long)]
        force: bool,
    },

    /// Flip the paid flag of a record
    Toggle {
        /// ID of the record
        id: String,
    },

    /// List debtors, largest amount first
    List {
        /// Show every record instead of the top entries
        #[clap(short = 'A', long)]
        all: bool,

        /// Number of records shown without --all
        #[clap(short = 'n', long, default_value_t = 5)]
        limit: usize,

        /// Only paid records
        #[clap(long, conflicts_with = "unpaid")]
        paid: bool,

        /// Only unpaid records
        #[clap(long)]
        unpaid: bool,

        /// Format output as JSON
        #[clap(short, long)]
        json: bool,
    },

    /// Search by name prefix or phone digits
    Search {
        /// Name prefix or phone digits
        query: String,

        /// Use fuzzy name matching instead of prefixes
        #[clap(short, long)]
        fuzzy: bool,

        /// Format output as JSON
        #[clap(short, long)]
        json: bool,
    },

    /// Totals and charts over the ledger
    Stats {
        /// Days in the daily chart
        #[clap(
            short,
            long,
            default_value_t = crate::DEFAULT_DAY_WINDOW,
            value_parser = clap::builder::RangedU64ValueParser::<usize>::new()
                .range(1..=crate::MAX_DAY_WINDOW as u64)
        )]
        days: usize,

        /// Years in the yearly chart
        #[clap(
            short,
            long,
            default_value_t = crate::DEFAULT_YEAR_WINDOW,
            value_parser = clap::builder::RangedU64ValueParser::<usize>::new()
                .range(1..=crate::MAX_YEAR_WINDOW as u64)
        )]
        years: usize,

        /// Format output as JSON
        #[clap(short, long)]
        json: bool,
    },

    /// Export a receipt for a record
    Receipt {
        /// ID of the record
        id: String,

        /// Directory to write into (default uses config setting)
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Extra line printed on the receipt
        #[clap(short, long)]
        note: Option<String>,
    },

    /// Write the local snapshot, and upload it with --cloud
    Backup {
        /// Also upload to Google Drive
        #[clap(short, long)]
        cloud: bool,
    },

    /// Replace the ledger with a backup
    Restore {
        /// Backup to restore from
        #[clap(short, long, value_enum, default_value_t = RestoreSource::Local)]
        from: RestoreSource,

        /// Skip confirmation prompt
        #[clap(long)]
        force: bool,
    },

    /// Google Drive account
    Drive {
        #[clap(subcommand)]
        action: DriveAction,
    },

    /// Run the periodic cloud backup until interrupted
    Autobackup,

    /// Configuration management
    Config {
        /// Show current configuration
        #[clap(short = 'S', long)]
        show: bool,

        /// Update a configuration setting (key=value)
        #[clap(short, long)]
        set: Option<String>,

        /// Reset configuration to defaults
        #[clap(short, long)]
        reset: bool,
    },
}
