//! In-memory store: records held in a `Vec`, predicates evaluated row by row.

use super::{column_names, rank_groups, DatasetOverview, GroupCount, TabularStore};
use crate::error::{EngineError, Result};
use crate::filter::Predicate;
use crate::ingestion;
use crate::record::{Field, Record};
use itertools::Itertools;
use rand::seq::{IteratorRandom, SliceRandom};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::info;

pub struct MemoryStore {
    records: Vec<Record>,
}

impl MemoryStore {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Load a cleaned CSV export.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::StoreUnavailable(format!(
                "Dataset file not found: {}",
                path.display()
            )));
        }
        let records = ingestion::read_clean_csv(path)?;
        info!("Loaded {} records from {}", records.len(), path.display());
        Ok(Self::new(records))
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    fn matching<'a>(&'a self, predicate: &'a Predicate) -> impl Iterator<Item = &'a Record> + 'a {
        self.records.iter().filter(move |r| predicate.matches(r))
    }
}

impl TabularStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn distinct_values(&self, field: Field) -> Result<Vec<String>> {
        let values: BTreeSet<&str> = self.records.iter().filter_map(|r| r.text(field)).collect();
        Ok(values.into_iter().map(str::to_string).collect())
    }

    fn count(&self, predicate: &Predicate) -> Result<usize> {
        Ok(self.matching(predicate).count())
    }

    fn sample(&self, predicate: &Predicate, limit: usize) -> Result<Vec<Record>> {
        let mut rng = rand::thread_rng();
        let mut picked: Vec<Record> = self
            .matching(predicate)
            .choose_multiple(&mut rng, limit)
            .into_iter()
            .cloned()
            .collect();
        // choose_multiple keeps source order for short inputs
        picked.shuffle(&mut rng);
        Ok(picked)
    }

    fn group_count(&self, predicate: &Predicate, field: Field, limit: usize) -> Result<Vec<GroupCount>> {
        let counts: HashMap<&str, usize> = self
            .matching(predicate)
            .filter_map(|r| r.text(field))
            .counts();
        let groups = counts
            .into_iter()
            .map(|(value, total)| GroupCount { value: value.to_string(), total })
            .collect();
        Ok(rank_groups(groups, limit))
    }

    fn overview(&self) -> Result<DatasetOverview> {
        let years = self.records.iter().map(Record::year).minmax().into_option();
        let provinces = self
            .records
            .iter()
            .filter_map(|r| r.province.as_deref())
            .unique()
            .count();
        Ok(DatasetOverview {
            total_records: self.records.len(),
            first_year: years.map(|(min, _)| min),
            last_year: years.map(|(_, max)| max),
            provinces,
            columns: column_names(),
        })
    }
}
