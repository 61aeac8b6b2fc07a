//! Intent extraction - turns a free-text question into a [`QueryIntent`].
//!
//! This is a deliberately small rule engine: keyword containment and a few
//! regular expressions over the normalized question. Priorities and the
//! non-exclusive rules (sex, place) are observable behaviour that existing
//! answers depend on, so they are encoded here explicitly rather than
//! inferred.

use crate::normalize::{normalize, remove_first};
use crate::record::Field;
use crate::vocabulary::VocabularyIndex;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

lazy_static! {
    static ref FIRST_N: Regex = Regex::new(r"(\d+)\s+primer").unwrap();
    static ref N_RECORDS: Regex =
        Regex::new(r"(\d+)\s+(casos|registros|homicidios|femicidios|asesinatos)").unwrap();
    static ref GIVE_ME_N: Regex = Regex::new(r"(dame|muestrame|quiero)\s+(\d+)").unwrap();
    static ref YEAR: Regex = Regex::new(r"(\d{4})").unwrap();
    static ref AGE: Regex = Regex::new(r"de (\d{1,2}) anos|(\d{1,2}) anos").unwrap();
}

pub const DEFAULT_SAMPLE_SIZE: usize = 20;
pub const MAX_SAMPLE_SIZE: usize = 200;

/// Death-type keywords in priority order; only the first hit becomes a filter.
const DEATH_TYPES: [(&str, MatchKind); 4] = [
    ("sicariato", MatchKind::Contains),
    ("femicidio", MatchKind::Contains),
    ("asesinato", MatchKind::Exact),
    ("homicidio", MatchKind::Exact),
];

/// (question keyword, stored value fragment)
const PLACES: [(&str, &str); 2] = [("via publica", "via publica"), ("domicilio", "domicilio")];

/// (question keyword, stored sex value). "mujer" also covers "mujeres".
const SEXES: [(&str, &str); 2] = [("mujer", "mujer"), ("hombre", "hombre")];

/// Fields matched against every vocabulary value, combined with OR.
const OPEN_FIELDS: [Field; 4] = [
    Field::WeaponType,
    Field::Motivation,
    Field::Ethnicity,
    Field::Profession,
];

const COUNT_CUES: [&str; 2] = ["cuant", "total"];
const DETAIL_CUES: [&str; 7] = [
    "detalle", "caso", "ejemplo", "cuentame", "cuenteme", "dime", "registro",
];

/// Group-by cues for statistical summaries, first hit wins.
const DIMENSION_CUES: [(&str, Field); 7] = [
    ("motivacion", Field::Motivation),
    ("arma", Field::WeaponType),
    ("provincia", Field::Province),
    ("canton", Field::Canton),
    ("etnia", Field::Ethnicity),
    ("profesion", Field::Profession),
    ("lugar", Field::Place),
];

/// How the question is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseMode {
    /// Deterministic cardinality, no generation backend.
    Count,
    /// Random sample of matching records narrated by the backend.
    DetailSample,
    /// Top-N group-by counts narrated by the backend.
    StatisticalSummary,
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResponseMode::Count => "count",
            ResponseMode::DetailSample => "detail_sample",
            ResponseMode::StatisticalSummary => "statistical_summary",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    Exact,
    Contains,
}

/// One detected filter. Several values mean "any of them".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: Field,
    pub kind: MatchKind,
    pub values: Vec<String>,
}

impl FieldFilter {
    pub fn exact(field: Field, value: impl Into<String>) -> Self {
        Self { field, kind: MatchKind::Exact, values: vec![value.into()] }
    }

    pub fn contains(field: Field, values: Vec<String>) -> Self {
        Self { field, kind: MatchKind::Contains, values }
    }
}

/// Structured reading of one question. Built fresh per question and dropped
/// once the answer is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub filters: Vec<FieldFilter>,
    pub year: Option<i32>,
    pub age: Option<u32>,
    pub sample_size: usize,
    pub mode: ResponseMode,
    pub group_by: Field,
}

impl QueryIntent {
    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty() || self.year.is_some() || self.age.is_some()
    }

    /// All values detected for `field`, across every filter on it.
    pub fn values_for(&self, field: Field) -> Vec<&str> {
        self.filters
            .iter()
            .filter(|f| f.field == field)
            .flat_map(|f| f.values.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct IntentExtractor {
    pub default_sample_size: usize,
    pub max_sample_size: usize,
    pub default_group_by: Field,
}

impl Default for IntentExtractor {
    fn default() -> Self {
        Self {
            default_sample_size: DEFAULT_SAMPLE_SIZE,
            max_sample_size: MAX_SAMPLE_SIZE,
            default_group_by: Field::Motivation,
        }
    }
}

impl IntentExtractor {
    pub fn new(default_sample_size: usize, max_sample_size: usize) -> Self {
        Self {
            default_sample_size,
            max_sample_size,
            ..Self::default()
        }
    }

    pub fn extract(&self, question: &str, vocabulary: &VocabularyIndex) -> QueryIntent {
        let text = normalize(question);
        let mut filters = Vec::new();

        if let Some(filter) = detect_death_type(&text) {
            filters.push(filter);
        }
        for (keyword, value) in PLACES {
            if text.contains(keyword) {
                filters.push(FieldFilter::contains(Field::Place, vec![value.to_string()]));
            }
        }
        for (keyword, value) in SEXES {
            if text.contains(keyword) {
                filters.push(FieldFilter::exact(Field::Sex, value));
            }
        }
        filters.extend(detect_geography(&text, vocabulary));
        for field in OPEN_FIELDS {
            let matched: Vec<String> = vocabulary
                .entries(field)
                .iter()
                .filter(|entry| text.contains(entry.normalized.as_str()))
                .map(|entry| entry.value.clone())
                .collect();
            if !matched.is_empty() {
                filters.push(FieldFilter::contains(field, matched));
            }
        }

        let intent = QueryIntent {
            filters,
            year: detect_year(&text),
            age: detect_age(&text),
            sample_size: self.detect_sample_size(&text),
            mode: detect_mode(&text),
            group_by: detect_dimension(&text).unwrap_or(self.default_group_by),
        };

        debug!(
            "Intent: mode={} filters={} year={:?} age={:?} sample={} group_by={}",
            intent.mode,
            intent.filters.len(),
            intent.year,
            intent.age,
            intent.sample_size,
            intent.group_by
        );
        intent
    }

    fn detect_sample_size(&self, text: &str) -> usize {
        let requested = FIRST_N
            .captures(text)
            .and_then(|c| c.get(1))
            .or_else(|| N_RECORDS.captures(text).and_then(|c| c.get(1)))
            .or_else(|| GIVE_ME_N.captures(text).and_then(|c| c.get(2)))
            .and_then(|m| m.as_str().parse::<usize>().ok());

        match requested {
            Some(0) | None => self.default_sample_size,
            Some(n) => n.min(self.max_sample_size),
        }
    }
}

fn detect_death_type(text: &str) -> Option<FieldFilter> {
    DEATH_TYPES
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|(keyword, kind)| FieldFilter {
            field: Field::DeathType,
            kind: *kind,
            values: vec![keyword.to_string()],
        })
}

/// Province against the full text, canton against what is left once the
/// province mention is cut out. Canton names that repeat a province name
/// ("Bolívar", "Santa Elena") would otherwise match the province mention.
fn detect_geography(text: &str, vocabulary: &VocabularyIndex) -> Vec<FieldFilter> {
    let mut filters = Vec::new();
    let mut residual = text.to_string();

    if let Some(province) = vocabulary
        .entries(Field::Province)
        .iter()
        .find(|entry| text.contains(entry.normalized.as_str()))
    {
        filters.push(FieldFilter::exact(Field::Province, province.value.clone()));
        if let Some(rest) = remove_first(text, &province.normalized) {
            residual = rest;
        }
    }

    if let Some(canton) = vocabulary
        .entries(Field::Canton)
        .iter()
        .find(|entry| residual.contains(entry.normalized.as_str()))
    {
        filters.push(FieldFilter::exact(Field::Canton, canton.value.clone()));
    }

    filters
}

fn detect_year(text: &str) -> Option<i32> {
    YEAR.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn detect_age(text: &str) -> Option<u32> {
    AGE.captures(text)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .and_then(|m| m.as_str().parse().ok())
}

fn detect_mode(text: &str) -> ResponseMode {
    if COUNT_CUES.iter().any(|cue| text.contains(cue)) {
        ResponseMode::Count
    } else if DETAIL_CUES.iter().any(|cue| text.contains(cue)) {
        ResponseMode::DetailSample
    } else {
        ResponseMode::StatisticalSummary
    }
}

fn detect_dimension(text: &str) -> Option<Field> {
    DIMENSION_CUES
        .iter()
        .find(|(cue, _)| text.contains(cue))
        .map(|(_, field)| *field)
}
