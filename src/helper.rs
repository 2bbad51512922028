use std::fmt::Write;

use chrono::NaiveDate;
use log::{trace, warn};

use crate::{LedgerError, Result};

/// Country code prepended to local 9-digit numbers.
const COUNTRY_CODE: &str = "998";

/// Date format used when the configured one cannot render a date.
pub const DEFAULT_DATE_FORMAT: &str = "%d.%m.%Y";

/// Formats accepted when reading dates written by other locales.
const FALLBACK_DATE_FORMATS: [&str; 4] = ["%d.%m.%Y", "%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];

/// Keeps only ASCII digits.
pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalizes a phone number to `+998XXXXXXXXX`.
///
/// Accepts the 9 local digits in any grouping ("90 123 45 67") or a full
/// number that already carries the country code.
pub fn normalize_phone(input: &str) -> Result<String> {
    let digits = digits_only(input);
    let normalized = match digits.len() {
        9 => format!("+{}{}", COUNTRY_CODE, digits),
        12 if digits.starts_with(COUNTRY_CODE) => format!("+{}", digits),
        _ => {
            return Err(LedgerError::InvalidRecord {
                message: format!("phone number '{}' must have 9 local digits", input),
            })
        }
    };
    trace!("Normalized phone {} -> {}", input, normalized);
    Ok(normalized)
}

/// Capitalizes the first letter of every word and lowercases the rest.
pub fn format_name(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Groups thousands with spaces: `1250000` -> `1 250 000`.
pub fn format_amount(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    grouped
}

/// Renders `date` with `format`, falling back to the default on a bad format string.
pub fn format_date(date: NaiveDate, format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", date.format(format)).is_err() {
        warn!("Invalid date format '{}', using {}", format, DEFAULT_DATE_FORMAT);
        out.clear();
        // The default format is always valid.
        let _ = write!(out, "{}", date.format(DEFAULT_DATE_FORMAT));
    }
    out
}

/// Parses a stored `dateCreated` string, trying `format` first.
pub fn parse_date(value: &str, format: &str) -> Option<NaiveDate> {
    let value = value.trim();
    std::iter::once(format)
        .chain(FALLBACK_DATE_FORMATS)
        .find_map(|f| NaiveDate::parse_from_str(value, f).ok())
}
