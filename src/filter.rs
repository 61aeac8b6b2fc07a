//! Filter compilation.
//!
//! A [`Predicate`] is plain data: a conjunction of clauses, each clause a
//! disjunction of `(field, operator, operand)` conditions. Stores decide how
//! to run it - [`Predicate::matches`] evaluates it row by row, the SQLite
//! store renders it into a parameterized WHERE clause.

use crate::intent::{MatchKind, QueryIntent};
use crate::normalize::normalize;
use crate::record::{Field, Record};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Normalized equality (text) or numeric equality (age).
    Eq,
    /// Normalized substring containment.
    Like,
    /// Calendar year of the date column.
    YearEq,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Already normalized text.
    Text(String),
    Integer(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub field: Field,
    pub op: Operator,
    pub operand: Operand,
}

impl Condition {
    pub fn text(field: Field, op: Operator, value: &str) -> Self {
        Self { field, op, operand: Operand::Text(normalize(value)) }
    }

    pub fn integer(field: Field, op: Operator, value: i64) -> Self {
        Self { field, op, operand: Operand::Integer(value) }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match (self.op, &self.operand) {
            (Operator::YearEq, Operand::Integer(year)) => i64::from(record.year()) == *year,
            (Operator::Eq, Operand::Integer(value)) => match self.field {
                Field::Age => record.age.map(i64::from) == Some(*value),
                _ => false,
            },
            (Operator::Eq, Operand::Text(value)) => record
                .text(self.field)
                .map(|cell| normalize(cell) == *value)
                .unwrap_or(false),
            (Operator::Like, Operand::Text(value)) => record
                .text(self.field)
                .map(|cell| normalize(cell).contains(value.as_str()))
                .unwrap_or(false),
            _ => false,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Operator::Eq => "=",
            Operator::Like => "LIKE",
            Operator::YearEq => "YEAR =",
        };
        match &self.operand {
            Operand::Text(v) => write!(f, "{} {} '{}'", self.field, op, v),
            Operand::Integer(v) => write!(f, "{} {} {}", self.field, op, v),
        }
    }
}

/// Any-of group of conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    pub any_of: Vec<Condition>,
}

impl Clause {
    pub fn single(condition: Condition) -> Self {
        Self { any_of: vec![condition] }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.any_of.iter().any(|c| c.matches(record))
    }
}

/// All-of group of clauses. Empty means "every record".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub clauses: Vec<Clause>,
}

impl Predicate {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and(mut self, clause: Clause) -> Self {
        if !clause.any_of.is_empty() {
            self.clauses.push(clause);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|c| c.matches(record))
    }

    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.clauses.iter().flat_map(|c| c.any_of.iter())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("TRUE");
        }
        let rendered: Vec<String> = self
            .clauses
            .iter()
            .map(|clause| {
                let parts: Vec<String> = clause.any_of.iter().map(|c| c.to_string()).collect();
                if parts.len() == 1 {
                    parts.join("")
                } else {
                    format!("({})", parts.join(" OR "))
                }
            })
            .collect();
        f.write_str(&rendered.join(" AND "))
    }
}

/// Translate an intent into a predicate. Each detected filter becomes its own
/// clause, so repeated fields (both sexes, both places) stay conjunctive.
pub fn compile(intent: &QueryIntent) -> Predicate {
    let mut predicate = Predicate::all();

    if let Some(year) = intent.year {
        predicate = predicate.and(Clause::single(Condition::integer(
            Field::Date,
            Operator::YearEq,
            i64::from(year),
        )));
    }
    if let Some(age) = intent.age {
        predicate = predicate.and(Clause::single(Condition::integer(
            Field::Age,
            Operator::Eq,
            i64::from(age),
        )));
    }

    for filter in &intent.filters {
        let op = match filter.kind {
            MatchKind::Exact => Operator::Eq,
            MatchKind::Contains => Operator::Like,
        };
        let any_of = filter
            .values
            .iter()
            .map(|value| Condition::text(filter.field, op, value))
            .collect();
        predicate = predicate.and(Clause { any_of });
    }

    predicate
}
