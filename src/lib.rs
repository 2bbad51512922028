//! Shop debt ledger library
//!
//! This library keeps a list of customer debts on disk, mirrors it into a
//! local snapshot and Google Drive, derives statistics from it and guards
//! access behind a username/password login.

mod backup;
mod backup_scheduler;
mod cli;
mod config;
mod drive;
mod errors;
mod helper;
mod local_store;
mod receipt;
mod record;
mod session;
mod stats;
mod storage;
mod types;

#[cfg(test)]
mod fake_drive;

// Re-export key components
pub use backup::*;
pub use backup_scheduler::*;
pub use cli::*;
pub use config::*;
pub use drive::*;
pub use errors::*;
pub use helper::*;
pub use local_store::*;
pub use receipt::*;
pub use record::*;
pub use session::*;
pub use stats::*;
pub use storage::*;
pub use types::*;
