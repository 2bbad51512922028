use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use log::{debug, info};

use crate::{format_amount, DebtRecord, LedgerError, Result, ShopInfo};

const RECEIPT_WIDTH: usize = 40;

/// Plain-text debt receipt for one record.
#[derive(Debug, Clone)]
pub struct Receipt<'a> {
    shop: &'a ShopInfo,
    record: &'a DebtRecord,
    printed_at: DateTime<Local>,
    note: Option<String>,
}

impl<'a> Receipt<'a> {
    pub fn new(shop: &'a ShopInfo, record: &'a DebtRecord, printed_at: DateTime<Local>) -> Self {
        Self {
            shop,
            record,
            printed_at,
            note: None,
        }
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note.filter(|n| !n.trim().is_empty());
        self
    }

    /// Receipt number, the print time in epoch milliseconds.
    pub fn number(&self) -> i64 {
        self.printed_at.timestamp_millis()
    }

    pub fn render(&self) -> String {
        let dashed = "- ".repeat(RECEIPT_WIDTH / 2);
        let solid = "-".repeat(RECEIPT_WIDTH);
        let status = if self.record.paid { "PAID" } else { "UNPAID" };

        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{:^w$}", self.shop.name, w = RECEIPT_WIDTH);
        let _ = writeln!(out, "{:^w$}", self.shop.address, w = RECEIPT_WIDTH);
        let _ = writeln!(out, "{:^w$}", format!("Tel: {}", self.shop.phone), w = RECEIPT_WIDTH);
        let _ = writeln!(out, "{}", dashed.trim_end());
        let _ = writeln!(out, "{:^w$}", "DEBT RECEIPT", w = RECEIPT_WIDTH);
        let _ = writeln!(out, "Printed:     {}", self.printed_at.format("%d.%m.%Y %H:%M:%S"));
        let _ = writeln!(out, "Receipt No.: {}", self.number());
        let _ = writeln!(out, "{}", solid);
        let _ = writeln!(out, "Customer:    {}", self.record.name);
        let _ = writeln!(out, "Phone:       {}", self.record.phone);
        let _ = writeln!(out, "Amount:      {} so'm", format_amount(self.record.amount));
        let _ = writeln!(out, "Debt date:   {}", self.record.date_created);
        let _ = writeln!(out, "Status:      {}", status);
        if let Some(note) = &self.note {
            let _ = writeln!(out, "Note:        {}", note);
        }
        let _ = writeln!(out, "{}", solid);
        let _ = writeln!(out, "{:^w$}", "Thank you!", w = RECEIPT_WIDTH);
        let _ = writeln!(out, "{:^w$}", "Please come again!", w = RECEIPT_WIDTH);
        out
    }

    /// `chek-<customer>-<millis>.txt`
    pub fn file_name(&self) -> String {
        let customer: String = self
            .record
            .name
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        format!("chek-{}-{}.txt", customer.trim_matches('-'), self.number())
    }

    /// Writes the receipt into `dir` and returns the file path.
    pub fn export(&self, dir: &Path) -> Result<PathBuf> {
        if !dir.exists() {
            debug!("Creating receipts directory {}", dir.display());
            fs::create_dir_all(dir).map_err(|_| LedgerError::DirectoryError {
                path: dir.to_path_buf(),
            })?;
        }
        let path = dir.join(self.file_name());
        fs::write(&path, self.render())?;
        info!("Receipt for {} saved to {}", self.record.id, path.display());
        Ok(path)
    }
}
