//! Retrieval - runs a compiled predicate against a store in the shape the
//! response mode needs.

use crate::error::Result;
use crate::filter::Predicate;
use crate::intent::ResponseMode;
use crate::record::{Field, Record};
use crate::store::{DatasetOverview, GroupCount, TabularStore};
use tracing::info;

pub const DEFAULT_SUMMARY_TOP_N: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalResult {
    /// Nothing matched, whatever the mode.
    Empty,
    Count { total: usize },
    Sample { total: usize, records: Vec<Record> },
    Summary {
        total: usize,
        field: Field,
        groups: Vec<GroupCount>,
        overview: Option<DatasetOverview>,
    },
}

impl RetrievalResult {
    pub fn total(&self) -> usize {
        match self {
            RetrievalResult::Empty => 0,
            RetrievalResult::Count { total }
            | RetrievalResult::Sample { total, .. }
            | RetrievalResult::Summary { total, .. } => *total,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RetrievalResult::Empty)
    }
}

#[derive(Debug, Clone)]
pub struct Retriever {
    pub summary_top_n: usize,
}

impl Default for Retriever {
    fn default() -> Self {
        Self { summary_top_n: DEFAULT_SUMMARY_TOP_N }
    }
}

impl Retriever {
    pub fn new(summary_top_n: usize) -> Self {
        Self { summary_top_n: summary_top_n.max(1) }
    }

    pub fn retrieve(
        &self,
        store: &dyn TabularStore,
        predicate: &Predicate,
        mode: ResponseMode,
        sample_size: usize,
        group_by: Field,
    ) -> Result<RetrievalResult> {
        let total = store.count(predicate)?;
        info!("Retrieval on {} store: {} matching records for {}", store.name(), total, predicate);
        if total == 0 {
            return Ok(RetrievalResult::Empty);
        }

        let result = match mode {
            ResponseMode::Count => RetrievalResult::Count { total },
            ResponseMode::DetailSample => RetrievalResult::Sample {
                total,
                records: store.sample(predicate, sample_size)?,
            },
            ResponseMode::StatisticalSummary => RetrievalResult::Summary {
                total,
                field: group_by,
                groups: store.group_count(predicate, group_by, self.summary_top_n)?,
                overview: Some(store.overview()?),
            },
        };
        Ok(result)
    }
}
