//! Tabular store boundary.
//!
//! The engine only needs four operations from a dataset: distinct values per
//! field, filtered count, filtered random sample and filtered group-by count.
//! Implementations decide whether a [`Predicate`] is evaluated in memory or
//! pushed down to a database.

pub mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::filter::Predicate;
use crate::record::{Field, Record};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// One group-by row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    pub value: String,
    pub total: usize,
}

/// Shape of the whole dataset, used as narration context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetOverview {
    pub total_records: usize,
    pub first_year: Option<i32>,
    pub last_year: Option<i32>,
    pub provinces: usize,
    pub columns: Vec<String>,
}

pub trait TabularStore: Send + Sync {
    /// Backend name (e.g., "memory", "sqlite")
    fn name(&self) -> &'static str;

    /// Distinct non-null values of a categorical field.
    fn distinct_values(&self, field: Field) -> Result<Vec<String>>;

    fn count(&self, predicate: &Predicate) -> Result<usize>;

    /// Up to `limit` matching records in random order.
    fn sample(&self, predicate: &Predicate, limit: usize) -> Result<Vec<Record>>;

    /// Counts per non-null value of `field` among matching records, sorted by
    /// count descending (ties by value), at most `limit` rows.
    fn group_count(&self, predicate: &Predicate, field: Field, limit: usize) -> Result<Vec<GroupCount>>;

    fn overview(&self) -> Result<DatasetOverview>;
}

/// Sort and truncate group rows the way every store reports them.
pub(crate) fn rank_groups(mut groups: Vec<GroupCount>, limit: usize) -> Vec<GroupCount> {
    groups.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.value.cmp(&b.value)));
    groups.truncate(limit);
    groups
}

pub(crate) fn column_names() -> Vec<String> {
    Field::ALL.iter().map(|f| f.column().to_string()).collect()
}
