//! Incident records and the fixed column vocabulary of the homicide dataset.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Columns the engine understands. Column names follow the cleaned export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Date,
    Province,
    Canton,
    Sex,
    Age,
    Ethnicity,
    MaritalStatus,
    Nationality,
    WeaponType,
    Weapon,
    DeathType,
    Motivation,
    Place,
    Profession,
}

impl Field {
    pub const ALL: [Field; 14] = [
        Field::Date,
        Field::Province,
        Field::Canton,
        Field::Sex,
        Field::Age,
        Field::Ethnicity,
        Field::MaritalStatus,
        Field::Nationality,
        Field::WeaponType,
        Field::Weapon,
        Field::DeathType,
        Field::Motivation,
        Field::Place,
        Field::Profession,
    ];

    /// Text columns whose distinct values form the matching vocabulary.
    pub const CATEGORICAL: [Field; 12] = [
        Field::Province,
        Field::Canton,
        Field::Sex,
        Field::Ethnicity,
        Field::MaritalStatus,
        Field::Nationality,
        Field::WeaponType,
        Field::Weapon,
        Field::DeathType,
        Field::Motivation,
        Field::Place,
        Field::Profession,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Field::Date => "fecha_infraccion",
            Field::Province => "provincia",
            Field::Canton => "canton",
            Field::Sex => "sexo",
            Field::Age => "edad",
            Field::Ethnicity => "etnia",
            Field::MaritalStatus => "estado_civil",
            Field::Nationality => "nacionalidad",
            Field::WeaponType => "tipo_arma",
            Field::Weapon => "arma",
            Field::DeathType => "tipo_muerte",
            Field::Motivation => "presunta_motivacion",
            Field::Place => "lugar",
            Field::Profession => "profesion_registro_civil",
        }
    }

    pub fn from_column(name: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.column() == name)
    }

    pub fn is_categorical(self) -> bool {
        !matches!(self, Field::Date | Field::Age)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// One incident row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "fecha_infraccion")]
    pub date: NaiveDate,
    #[serde(rename = "provincia")]
    pub province: Option<String>,
    pub canton: Option<String>,
    #[serde(rename = "sexo")]
    pub sex: Option<String>,
    #[serde(rename = "edad")]
    pub age: Option<u32>,
    #[serde(rename = "etnia")]
    pub ethnicity: Option<String>,
    #[serde(rename = "estado_civil")]
    pub marital_status: Option<String>,
    #[serde(rename = "nacionalidad")]
    pub nationality: Option<String>,
    #[serde(rename = "tipo_arma")]
    pub weapon_type: Option<String>,
    #[serde(rename = "arma")]
    pub weapon: Option<String>,
    #[serde(rename = "tipo_muerte")]
    pub death_type: Option<String>,
    #[serde(rename = "presunta_motivacion")]
    pub motivation: Option<String>,
    #[serde(rename = "lugar")]
    pub place: Option<String>,
    #[serde(rename = "profesion_registro_civil")]
    pub profession: Option<String>,
}

impl Record {
    /// A record dated `date` with every other attribute empty.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            province: None,
            canton: None,
            sex: None,
            age: None,
            ethnicity: None,
            marital_status: None,
            nationality: None,
            weapon_type: None,
            weapon: None,
            death_type: None,
            motivation: None,
            place: None,
            profession: None,
        }
    }

    /// Build a record from a column lookup. Returns `None` when the date is
    /// missing or cannot be parsed; blank cells become nulls.
    pub fn from_lookup<F>(lookup: F) -> Option<Record>
    where
        F: Fn(Field) -> Option<String>,
    {
        let date = lookup(Field::Date).as_deref().and_then(parse_date)?;
        let mut record = Record::new(date);
        for field in Field::CATEGORICAL {
            let value = lookup(field).and_then(clean_cell);
            record.set_text(field, value);
        }
        record.age = lookup(Field::Age).as_deref().and_then(parse_age);
        Some(record)
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    /// Text value of a categorical field.
    pub fn text(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::Province => &self.province,
            Field::Canton => &self.canton,
            Field::Sex => &self.sex,
            Field::Ethnicity => &self.ethnicity,
            Field::MaritalStatus => &self.marital_status,
            Field::Nationality => &self.nationality,
            Field::WeaponType => &self.weapon_type,
            Field::Weapon => &self.weapon,
            Field::DeathType => &self.death_type,
            Field::Motivation => &self.motivation,
            Field::Place => &self.place,
            Field::Profession => &self.profession,
            Field::Date | Field::Age => return None,
        };
        value.as_deref()
    }

    pub fn set_text(&mut self, field: Field, value: Option<String>) {
        let slot = match field {
            Field::Province => &mut self.province,
            Field::Canton => &mut self.canton,
            Field::Sex => &mut self.sex,
            Field::Ethnicity => &mut self.ethnicity,
            Field::MaritalStatus => &mut self.marital_status,
            Field::Nationality => &mut self.nationality,
            Field::WeaponType => &mut self.weapon_type,
            Field::Weapon => &mut self.weapon,
            Field::DeathType => &mut self.death_type,
            Field::Motivation => &mut self.motivation,
            Field::Place => &mut self.place,
            Field::Profession => &mut self.profession,
            Field::Date | Field::Age => return,
        };
        *slot = value;
    }

    /// Cell rendering used when the record is written back out (CSV, SQLite).
    pub fn cell(&self, field: Field) -> Option<String> {
        match field {
            Field::Date => Some(self.date.format("%Y-%m-%d").to_string()),
            Field::Age => self.age.map(|a| a.to_string()),
            _ => self.text(field).map(str::to_string),
        }
    }
}

fn clean_cell(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    // Exports stringified by spreadsheet tooling carry these for blanks.
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") || trimmed.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse the date formats seen in the source exports.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%d/%m/%Y %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts.date());
        }
    }
    // ISO prefix with an unrecognised time suffix
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

fn parse_age(raw: &str) -> Option<u32> {
    let value: f64 = raw.trim().parse().ok()?;
    if value.is_finite() && (0.0..=130.0).contains(&value) {
        Some(value.trunc() as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_field_column_round_trip() {
        for field in Field::ALL {
            assert_eq!(Field::from_column(field.column()), Some(field));
        }
        assert_eq!(Field::from_column("latitud"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 14).unwrap();
        assert_eq!(parse_date("2021-03-14"), Some(expected));
        assert_eq!(parse_date("14/03/2021"), Some(expected));
        assert_eq!(parse_date("2021-03-14 00:00:00"), Some(expected));
        assert_eq!(parse_date("2021-03-14T08:30:00"), Some(expected));
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn test_from_lookup_cleans_cells() {
        let row: HashMap<Field, &str> = [
            (Field::Date, "2019-07-01"),
            (Field::Province, " Guayas "),
            (Field::Sex, "nan"),
            (Field::Age, "34.0"),
        ]
        .into_iter()
        .collect();

        let record = Record::from_lookup(|f| row.get(&f).map(|v| v.to_string())).unwrap();
        assert_eq!(record.year(), 2019);
        assert_eq!(record.province.as_deref(), Some("Guayas"));
        assert_eq!(record.sex, None);
        assert_eq!(record.age, Some(34));
    }

    #[test]
    fn test_from_lookup_rejects_missing_date() {
        assert!(Record::from_lookup(|_| None).is_none());
    }
}
