//! Core data structures for the debtbook application.
//!
//! A [`DebtRecord`] is one customer's outstanding balance. Records written by
//! older versions of the app used Uzbek field names, those are accepted as
//! aliases so old backups still restore.
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{normalize_phone, LedgerError, Result};

/// One customer's outstanding balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtRecord {
    /// Unique identifier, assigned at creation
    pub id: String,
    /// Customer display name
    #[serde(alias = "ism")]
    pub name: String,
    /// Normalized phone number (`+998XXXXXXXXX`)
    #[serde(alias = "tel", default)]
    pub phone: String,
    /// Amount owed in so'm
    #[serde(alias = "qarz", default, deserialize_with = "lenient_amount")]
    pub amount: u64,
    /// Creation date, formatted with the configured date format
    #[serde(alias = "sana", default)]
    pub date_created: String,
    /// Whether the debt has been paid back
    #[serde(alias = "tolandi", default)]
    pub paid: bool,
}

/// Form input for a new debt entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDebt {
    pub name: String,
    pub phone: String,
    pub amount: u64,
}

/// Fields replaced by an edit. `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebtPatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub amount: Option<u64>,
    pub paid: Option<bool>,
}

impl DebtPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.amount.is_none() && self.paid.is_none()
    }
}

impl NewDebt {
    /// Trims the name, normalizes the phone and rejects non-positive amounts.
    pub fn validated(self) -> Result<NewDebt> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::InvalidRecord {
                message: "customer name must not be empty".to_string(),
            });
        }
        if self.amount == 0 {
            return Err(LedgerError::InvalidRecord {
                message: "amount must be a positive number".to_string(),
            });
        }
        Ok(NewDebt {
            name,
            phone: normalize_phone(&self.phone)?,
            amount: self.amount,
        })
    }
}

impl DebtRecord {
    /// Creates an unpaid record with a fresh id from already validated input.
    pub fn new(input: NewDebt, date_created: String) -> Self {
        DebtRecord {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            phone: input.phone,
            amount: input.amount,
            date_created,
            paid: false,
        }
    }

    /// Case-insensitive name comparison used for merging entries.
    pub fn has_name(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.trim().to_lowercase()
    }
}

/// Reads `amount` leniently: numbers, numeric strings, anything else is zero.
fn lenient_amount<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f > 0.0)
                    .map(|f| f as u64)
            })
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}
