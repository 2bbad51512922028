use chrono::Local;
use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};
use log::{debug, error, info, trace, warn};

use crate::{
    digits_only, format_date, normalize_phone, DebtPatch, DebtRecord, LedgerError, LocalBackup,
    LocalStore, NewDebt, Result, LEDGER_KEY,
};

/// Manages the ledger: an ordered collection of debt records mirrored to
/// local storage.
pub struct RecordStore {
    /// Durable key-value storage
    store: LocalStore,

    /// Snapshot written after every mutation
    backup: LocalBackup,

    /// Records in insertion order
    records: Vec<DebtRecord>,

    /// Format of `date_created` for new records
    date_format: String,
}

impl RecordStore {
    /// Loads the ledger from local storage.
    ///
    /// An absent or corrupt ledger key yields an empty collection.
    pub fn load(store: LocalStore, date_format: impl Into<String>) -> Self {
        let records: Vec<DebtRecord> = store.get_json(LEDGER_KEY).unwrap_or_else(|| {
            debug!("No ledger stored yet, starting empty");
            Vec::new()
        });
        info!("Loaded {} records", records.len());

        Self {
            backup: LocalBackup::new(store.clone()),
            store,
            records,
            date_format: date_format.into(),
        }
    }

    /// Re-reads the ledger key, picking up writes made by other processes.
    pub fn reload(&mut self) -> &[DebtRecord] {
        match self.store.get_json::<Vec<DebtRecord>>(LEDGER_KEY) {
            Some(records) => {
                debug!("Reloaded {} records", records.len());
                self.records = records;
            }
            None => {
                debug!("Ledger key absent on reload, keeping {} records", self.records.len());
            }
        }
        &self.records
    }

    pub fn records(&self) -> &[DebtRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn date_format(&self) -> &str {
        &self.date_format
    }

    pub fn get(&self, id: &str) -> Option<&DebtRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn find_by_name_case_insensitive(&self, name: &str) -> Option<&DebtRecord> {
        self.records.iter().find(|r| r.has_name(name))
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| {
                warn!("Record {} not found", id);
                LedgerError::RecordNotFound { id: id.to_string() }
            })
    }

    fn today(&self) -> String {
        format_date(Local::now().date_naive(), &self.date_format)
    }

    /// Writes the collection and then the local snapshot.
    fn persist(&self) -> Result<()> {
        self.store.set_json(LEDGER_KEY, &self.records).map_err(|e| {
            error!("Failed to save ledger: {}", e);
            e
        })?;
        self.backup.write(&self.records);
        trace!("Ledger persisted with {} records", self.records.len());
        Ok(())
    }

    /// Adds a debt, merging it into an existing record with the same name.
    ///
    /// Returns the created or updated record.
    pub fn add(&mut self, input: NewDebt) -> Result<DebtRecord> {
        let input = input.validated()?;

        let result = match self.records.iter().position(|r| r.has_name(&input.name)) {
            Some(index) => {
                let existing = &mut self.records[index];
                existing.amount = existing.amount.saturating_add(input.amount);
                existing.phone = input.phone;
                info!(
                    "Added {} to existing record {} ({})",
                    input.amount, existing.id, existing.name
                );
                existing.clone()
            }
            None => {
                let record = DebtRecord::new(input, self.today());
                info!("Created record {} for {}", record.id, record.name);
                self.records.push(record.clone());
                record
            }
        };

        self.persist()?;
        Ok(result)
    }

    /// Replaces the fields given in `patch`. `id` and `date_created` never change.
    pub fn update(&mut self, id: &str, patch: DebtPatch) -> Result<DebtRecord> {
        let index = self.position(id)?;

        let name = match patch.name {
            Some(name) if name.trim().is_empty() => {
                return Err(LedgerError::InvalidRecord {
                    message: "customer name must not be empty".to_string(),
                })
            }
            Some(name) => Some(name.trim().to_string()),
            None => None,
        };
        let phone = patch.phone.as_deref().map(normalize_phone).transpose()?;
        if patch.amount == Some(0) {
            return Err(LedgerError::InvalidRecord {
                message: "amount must be a positive number".to_string(),
            });
        }

        let record = &mut self.records[index];
        if let Some(name) = name {
            record.name = name;
        }
        if let Some(phone) = phone {
            record.phone = phone;
        }
        if let Some(amount) = patch.amount {
            record.amount = amount;
        }
        if let Some(paid) = patch.paid {
            record.paid = paid;
        }
        let updated = record.clone();

        self.persist()?;
        info!("Record {} updated", id);
        Ok(updated)
    }

    pub fn remove(&mut self, id: &str) -> Result<DebtRecord> {
        let index = self.position(id)?;
        let removed = self.records.remove(index);
        self.persist()?;
        info!("Record {} ({}) deleted", removed.id, removed.name);
        Ok(removed)
    }

    pub fn toggle_paid(&mut self, id: &str) -> Result<DebtRecord> {
        let index = self.position(id)?;
        let record = &mut self.records[index];
        record.paid = !record.paid;
        let toggled = record.clone();
        self.persist()?;
        debug!("Record {} paid = {}", id, toggled.paid);
        Ok(toggled)
    }

    /// Replaces the whole collection, used when restoring a backup.
    pub fn replace_all(&mut self, records: Vec<DebtRecord>) -> Result<()> {
        info!(
            "Replacing {} records with {} restored records",
            self.records.len(),
            records.len()
        );
        self.records = records;
        self.persist()
    }

    /// Records ordered by amount, largest first.
    pub fn sorted_by_amount(&self) -> Vec<DebtRecord> {
        let mut sorted = self.records.clone();
        sorted.sort_by(|a, b| b.amount.cmp(&a.amount));
        sorted
    }

    /// Name prefix (case-insensitive) or phone-digit prefix search.
    pub fn search(&self, term: &str) -> Vec<DebtRecord> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Vec::new();
        }
        let term_digits = digits_only(&term);

        let matches: Vec<DebtRecord> = self
            .records
            .iter()
            .filter(|r| {
                let name_match = r.name.to_lowercase().starts_with(&term);
                let phone_match =
                    !term_digits.is_empty() && digits_only(&r.phone).starts_with(&term_digits);
                name_match || phone_match
            })
            .cloned()
            .collect();

        debug!("Search '{}' matched {} records", term, matches.len());
        matches
    }

    /// Fuzzy name search sorted by relevance.
    pub fn fuzzy_search(&self, term: &str) -> Vec<DebtRecord> {
        let term = term.trim();
        if term.is_empty() {
            return Vec::new();
        }
        let matcher = SkimMatcherV2::default();

        let mut scored: Vec<(i64, &DebtRecord)> = self
            .records
            .iter()
            .filter_map(|r| matcher.fuzzy_match(&r.name, term).map(|score| (score, r)))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        scored.into_iter().map(|(_, r)| r.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackupSnapshot;

    fn open(dir: &std::path::Path) -> RecordStore {
        RecordStore::load(LocalStore::open(dir).unwrap(), "%d.%m.%Y")
    }

    fn debt(name: &str, phone: &str, amount: u64) -> NewDebt {
        NewDebt {
            name: name.into(),
            phone: phone.into(),
            amount,
        }
    }

    fn snapshot_records(dir: &std::path::Path) -> Vec<DebtRecord> {
        let store = LocalStore::open(dir).unwrap();
        store
            .get_json::<BackupSnapshot>(crate::BACKUP_KEY)
            .map(|s| s.data)
            .unwrap_or_default()
    }

    #[test]
    fn add_merges_case_insensitive_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = open(dir.path());

        let first = ledger.add(debt("Ali", "+998901234567", 50000)).unwrap();
        let merged = ledger.add(debt("ali", "+998901234568", 30000)).unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(merged.id, first.id);
        assert_eq!(merged.name, "Ali");
        assert_eq!(merged.amount, 80000);
        assert_eq!(merged.phone, "+998901234568");
    }

    #[test]
    fn snapshot_matches_collection_after_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = open(dir.path());

        let a = ledger.add(debt("Ali", "901234567", 100)).unwrap();
        assert_eq!(snapshot_records(dir.path()), ledger.records());

        let b = ledger.add(debt("Vali", "901234568", 200)).unwrap();
        assert_eq!(snapshot_records(dir.path()), ledger.records());

        ledger
            .update(&b.id, DebtPatch { amount: Some(250), ..Default::default() })
            .unwrap();
        assert_eq!(snapshot_records(dir.path()), ledger.records());

        ledger.toggle_paid(&a.id).unwrap();
        assert_eq!(snapshot_records(dir.path()), ledger.records());

        ledger.remove(&a.id).unwrap();
        assert_eq!(snapshot_records(dir.path()), ledger.records());

        ledger.remove(&b.id).unwrap();
        assert!(snapshot_records(dir.path()).is_empty());
    }

    #[test]
    fn ledger_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let mut ledger = open(dir.path());
            ledger.add(debt("Ali", "901234567", 100)).unwrap().id
        };
        let ledger = open(dir.path());
        assert_eq!(ledger.get(&id).map(|r| r.amount), Some(100));
    }

    #[test]
    fn missing_ids_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = open(dir.path());
        assert!(matches!(ledger.remove("nope"), Err(LedgerError::RecordNotFound { .. })));
        assert!(matches!(ledger.toggle_paid("nope"), Err(LedgerError::RecordNotFound { .. })));
        assert!(matches!(
            ledger.update("nope", DebtPatch::default()),
            Err(LedgerError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn update_keeps_id_and_date() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = open(dir.path());
        let original = ledger.add(debt("Ali", "901234567", 100)).unwrap();

        let updated = ledger
            .update(
                &original.id,
                DebtPatch {
                    name: Some("Ali Valiyev".into()),
                    phone: Some("93 111 22 33".into()),
                    paid: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.id, original.id);
        assert_eq!(updated.date_created, original.date_created);
        assert_eq!(updated.phone, "+998931112233");
        assert!(updated.paid);
        assert_eq!(updated.amount, 100);

        assert!(ledger
            .update(&original.id, DebtPatch { amount: Some(0), ..Default::default() })
            .is_err());
    }

    #[test]
    fn search_by_name_prefix_or_phone_digits() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = open(dir.path());
        ledger.add(debt("Ali", "901234567", 1)).unwrap();
        ledger.add(debt("Alisher", "931112233", 1)).unwrap();
        ledger.add(debt("Vali", "991234567", 1)).unwrap();

        assert_eq!(ledger.search("al").len(), 2);
        assert_eq!(ledger.search("99893").len(), 1);
        assert_eq!(ledger.search("  ").len(), 0);
        assert_eq!(ledger.search("li").len(), 0);
    }

    #[test]
    fn sorted_by_amount_is_descending() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = open(dir.path());
        ledger.add(debt("A", "901234567", 10)).unwrap();
        ledger.add(debt("B", "901234567", 30)).unwrap();
        ledger.add(debt("C", "901234567", 20)).unwrap();

        let amounts: Vec<u64> = ledger.sorted_by_amount().iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![30, 20, 10]);
        assert_eq!(ledger.records()[0].name, "A");
    }

    #[test]
    fn fuzzy_search_finds_scattered_letters() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = open(dir.path());
        ledger.add(debt("Alisher Navoiy", "901234567", 1)).unwrap();
        ledger.add(debt("Bobur", "901234568", 1)).unwrap();

        let found = ledger.fuzzy_search("alnav");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Alisher Navoiy");
    }
}
