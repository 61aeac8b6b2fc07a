//! Vocabulary index - the distinct values of each categorical column, used
//! as the matching dictionary for intent extraction.

use crate::catalog::Snapshot;
use crate::error::{EngineError, Result};
use crate::normalize::normalize;
use crate::record::Field;
use crate::store::TabularStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

/// Values shorter than this (after normalization) are not offered for
/// matching; one- and two-letter codes match almost any question.
pub const MIN_VALUE_CHARS: usize = 3;

/// Fields whose values intent extraction matches against.
pub const INDEXED_FIELDS: [Field; 6] = [
    Field::Province,
    Field::Canton,
    Field::WeaponType,
    Field::Motivation,
    Field::Ethnicity,
    Field::Profession,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VocabularyEntry {
    /// Value as stored in the dataset.
    pub value: String,
    /// Normalized form used for substring matching.
    pub normalized: String,
}

/// Field -> known values. Entries are ordered longest normalized form first
/// (ties alphabetical), so a longer name wins over a shorter name it
/// contains.
#[derive(Debug, Clone, Default)]
pub struct VocabularyIndex {
    fields: HashMap<Field, Vec<VocabularyEntry>>,
}

impl VocabularyIndex {
    /// Pull distinct values for the matched fields from the store.
    pub fn build(store: &dyn TabularStore) -> Result<Self> {
        let mut index = Self::default();
        for field in INDEXED_FIELDS {
            let values = store.distinct_values(field)?;
            index.insert(field, values);
        }
        Ok(index)
    }

    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (Field, Vec<S>)>,
        S: Into<String>,
    {
        let mut index = Self::default();
        for (field, raw) in values {
            index.insert(field, raw.into_iter().map(Into::into).collect());
        }
        index
    }

    fn insert(&mut self, field: Field, values: Vec<String>) {
        let mut seen = HashSet::new();
        let mut entries: Vec<VocabularyEntry> = values
            .into_iter()
            .filter_map(|value| {
                let normalized = normalize(&value);
                if normalized.chars().count() < MIN_VALUE_CHARS || !seen.insert(normalized.clone()) {
                    return None;
                }
                Some(VocabularyEntry { value: value.trim().to_string(), normalized })
            })
            .collect();
        entries.sort_by(|a, b| {
            b.normalized
                .len()
                .cmp(&a.normalized.len())
                .then_with(|| a.normalized.cmp(&b.normalized))
        });
        self.fields.insert(field, entries);
    }

    pub fn entries(&self, field: Field) -> &[VocabularyEntry] {
        self.fields.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, field: Field) -> usize {
        self.entries(field).len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.values().all(Vec::is_empty)
    }
}

/// Vocabulary memoized per dataset snapshot. A snapshot with a different
/// version id forces a rebuild.
#[derive(Default)]
pub struct VocabularyCache {
    slot: Mutex<Option<(Uuid, Arc<VocabularyIndex>)>>,
}

impl VocabularyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&self, snapshot: &Snapshot) -> Result<Arc<VocabularyIndex>> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| EngineError::Store("Vocabulary cache lock poisoned".to_string()))?;

        if let Some((version, index)) = slot.as_ref() {
            if *version == snapshot.version() {
                return Ok(Arc::clone(index));
            }
        }

        let index = Arc::new(VocabularyIndex::build(snapshot.store())?);
        info!(
            "Built vocabulary for snapshot {}: {} provinces, {} cantons, {} motivations",
            snapshot.version(),
            index.len(Field::Province),
            index.len(Field::Canton),
            index.len(Field::Motivation)
        );
        *slot = Some((snapshot.version(), Arc::clone(&index)));
        Ok(index)
    }

    pub fn invalidate(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }

    /// Version the cached index was built for, if any.
    pub fn cached_version(&self) -> Option<Uuid> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|(version, _)| *version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::store::memory::MemoryStore;
    use chrono::NaiveDate;

    fn record(province: &str) -> Record {
        let mut record = Record::new(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        record.province = Some(province.to_string());
        record
    }

    #[test]
    fn test_entries_are_normalized_and_deduplicated() {
        let index = VocabularyIndex::from_values(vec![(
            Field::Province,
            vec!["Bolívar", "BOLIVAR", "Santa Elena", "El"],
        )]);
        let entries = index.entries(Field::Province);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].normalized, "santa elena");
        assert_eq!(entries[1].value, "Bolívar");
        assert_eq!(entries[1].normalized, "bolivar");
    }

    #[test]
    fn test_build_indexes_only_matched_fields() {
        let mut row = record("Guayas");
        row.place = Some("Vía Pública".to_string());
        row.weapon = Some("Pistola".to_string());
        row.death_type = Some("Sicariato".to_string());
        row.motivation = Some("Robo".to_string());
        let index = VocabularyIndex::build(&MemoryStore::new(vec![row])).unwrap();

        assert_eq!(index.entries(Field::Province)[0].value, "Guayas");
        assert_eq!(index.entries(Field::Motivation)[0].value, "Robo");
        assert!(index.entries(Field::Place).is_empty());
        assert!(index.entries(Field::Weapon).is_empty());
        assert!(index.entries(Field::DeathType).is_empty());
    }

    #[test]
    fn test_unknown_field_is_empty() {
        let index = VocabularyIndex::default();
        assert!(index.entries(Field::Canton).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_cache_rebuilds_on_new_snapshot() {
        let cache = VocabularyCache::new();
        let first = Snapshot::new(Arc::new(MemoryStore::new(vec![record("Guayas")])), "first");
        let second = Snapshot::new(Arc::new(MemoryStore::new(vec![record("Azuay")])), "second");

        let index = cache.get_or_build(&first).unwrap();
        assert_eq!(index.entries(Field::Province)[0].value, "Guayas");
        let again = cache.get_or_build(&first).unwrap();
        assert!(Arc::ptr_eq(&index, &again));

        let rebuilt = cache.get_or_build(&second).unwrap();
        assert_eq!(rebuilt.entries(Field::Province)[0].value, "Azuay");
        assert_eq!(cache.cached_version(), Some(second.version()));

        cache.invalidate();
        assert_eq!(cache.cached_version(), None);
    }
}
