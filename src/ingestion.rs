//! Dataset ingestion: clean raw exports, persist them, load them back.

use crate::config::AppConfig;
use crate::error::{EngineError, Result};
use crate::normalize::{normalize, title_case};
use crate::record::{parse_date, Field, Record};
use crate::store::SqliteStore;
use itertools::Itertools;
use polars::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Text columns whose values are title-cased and trimmed during cleaning.
pub const TITLE_CASE_FIELDS: [Field; 10] = [
    Field::Sex,
    Field::Province,
    Field::Canton,
    Field::WeaponType,
    Field::Weapon,
    Field::Motivation,
    Field::DeathType,
    Field::Ethnicity,
    Field::MaritalStatus,
    Field::Nationality,
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleaningReport {
    pub files: usize,
    pub raw_rows: usize,
    pub empty_rows: usize,
    pub invalid_dates: usize,
    pub before_min_year: usize,
    pub duplicates: usize,
    pub kept: usize,
    /// Raw columns that map to no known field.
    pub ignored_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub report: CleaningReport,
    pub csv_path: PathBuf,
    pub db_path: PathBuf,
    pub backup: Option<PathBuf>,
}

/// "Presunta Motivación;" -> "presunta_motivacion"
pub fn normalize_column_name(name: &str) -> String {
    normalize(&name.replace(';', ""))
        .split_whitespace()
        .join("_")
}

/// Read a raw CSV export and clean it into records.
pub fn clean_raw_csv(path: impl AsRef<Path>, min_year: i32) -> Result<(Vec<Record>, CleaningReport)> {
    clean_raw_csvs(&[path.as_ref()], min_year)
}

/// Clean several raw exports into one record set. Duplicates are removed
/// across files, so a row repeated in two exports is kept once.
pub fn clean_raw_csvs<P: AsRef<Path>>(paths: &[P], min_year: i32) -> Result<(Vec<Record>, CleaningReport)> {
    if paths.is_empty() {
        return Err(EngineError::Ingestion("No source files given".to_string()));
    }

    let mut report = CleaningReport::default();
    let mut records = Vec::new();
    for path in paths {
        records.extend(clean_file(path.as_ref(), min_year, &mut report)?);
    }

    let before = records.len();
    let records: Vec<Record> = records.into_iter().unique().collect();
    report.duplicates = before - records.len();
    report.kept = records.len();
    report.files = paths.len();

    if !report.ignored_columns.is_empty() {
        warn!("Ignored unknown columns: {}", report.ignored_columns.join(", "));
    }
    info!(
        "Cleaned {} file(s): {} raw rows, {} kept ({} empty, {} bad dates, {} before {}, {} duplicates)",
        report.files,
        report.raw_rows,
        report.kept,
        report.empty_rows,
        report.invalid_dates,
        report.before_min_year,
        min_year,
        report.duplicates
    );
    Ok((records, report))
}

fn clean_file(path: &Path, min_year: i32, report: &mut CleaningReport) -> Result<Vec<Record>> {
    if !path.exists() {
        return Err(EngineError::Ingestion(format!("Source file not found: {}", path.display())));
    }

    // Every column as text; typing happens per field below
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()?
        .collect()?;

    report.raw_rows += df.height();
    let mut columns: HashMap<Field, StringChunked> = HashMap::new();
    for series in df.get_columns() {
        let name = normalize_column_name(series.name());
        match Field::from_column(&name) {
            Some(field) if !columns.contains_key(&field) => {
                let text = series.cast(&DataType::String)?;
                columns.insert(field, text.str()?.clone());
            }
            _ => {
                if !report.ignored_columns.iter().any(|c| c == series.name()) {
                    report.ignored_columns.push(series.name().to_string());
                }
            }
        }
    }
    if !columns.contains_key(&Field::Date) {
        return Err(EngineError::Ingestion(format!(
            "Column {} missing from {}",
            Field::Date.column(),
            path.display()
        )));
    }

    let mut records = Vec::with_capacity(df.height());
    for idx in 0..df.height() {
        let cell = |field: Field| -> Option<String> {
            columns
                .get(&field)
                .and_then(|col| col.get(idx))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        if Field::ALL.iter().all(|f| cell(*f).is_none()) {
            report.empty_rows += 1;
            continue;
        }
        if cell(Field::Date).as_deref().and_then(parse_date).is_none() {
            report.invalid_dates += 1;
            continue;
        }
        let Some(mut record) = Record::from_lookup(cell) else {
            report.invalid_dates += 1;
            continue;
        };
        if record.year() < min_year {
            report.before_min_year += 1;
            continue;
        }
        for field in TITLE_CASE_FIELDS {
            let cleaned = record.text(field).map(title_case);
            record.set_text(field, cleaned);
        }
        records.push(record);
    }
    Ok(records)
}

/// Write records as the cleaned CSV export.
pub fn write_clean_csv(path: impl AsRef<Path>, records: &[Record]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(Field::ALL.iter().map(|f| f.column()))?;
    for record in records {
        writer.write_record(Field::ALL.iter().map(|f| record.cell(*f).unwrap_or_default()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Load a cleaned CSV export. Rows without a usable date are skipped.
pub fn read_clean_csv(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let positions: HashMap<Field, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| Field::from_column(&normalize_column_name(name)).map(|f| (f, idx)))
        .collect();
    if !positions.contains_key(&Field::Date) {
        return Err(EngineError::Ingestion(format!(
            "Column {} missing from {}",
            Field::Date.column(),
            path.display()
        )));
    }

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in reader.records() {
        let row = row?;
        let lookup = |field: Field| positions.get(&field).and_then(|idx| row.get(*idx)).map(str::to_string);
        match Record::from_lookup(lookup) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("Skipped {} rows without a valid date in {}", skipped, path.display());
    }
    Ok(records)
}

/// Clean `sources`, write the cleaned CSV and replace the SQLite snapshot.
pub fn refresh<P: AsRef<Path>>(sources: &[P], config: &AppConfig) -> Result<RefreshSummary> {
    let (records, report) = clean_raw_csvs(sources, config.min_year)?;
    if records.is_empty() {
        return Err(EngineError::Ingestion("No records left after cleaning".to_string()));
    }
    write_clean_csv(&config.csv_path, &records)?;
    let backup = SqliteStore::replace_snapshot(&config.db_path, &records, Some(&config.backup_dir))?;
    Ok(RefreshSummary {
        report,
        csv_path: config.csv_path.clone(),
        db_path: config.db_path.clone(),
        backup,
    })
}

/// Rebuild the SQLite snapshot from the cleaned CSV alone. Returns the number
/// of records written.
pub fn rebuild_snapshot_from_clean_csv(config: &AppConfig) -> Result<usize> {
    if !config.csv_path.exists() {
        return Err(EngineError::Ingestion(format!(
            "Cleaned CSV not found: {}",
            config.csv_path.display()
        )));
    }
    let records = read_clean_csv(&config.csv_path)?;
    if records.is_empty() {
        return Err(EngineError::Ingestion(format!(
            "No usable records in {}",
            config.csv_path.display()
        )));
    }
    SqliteStore::replace_snapshot(&config.db_path, &records, Some(&config.backup_dir))?;
    info!(
        "Rebuilt {} from {} ({} records)",
        config.db_path.display(),
        config.csv_path.display(),
        records.len()
    );
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Predicate;
    use crate::store::TabularStore;
    use std::io::Write;

    const RAW: &str = "\
Fecha Infraccion,Provincia,Cantón,Sexo,Edad,Presunta Motivación;,Lugar,Codigo Interno
2021-03-04,GUAYAS,guayaquil,HOMBRE,34,robo,Vía Pública,A1
2021-03-04,GUAYAS,guayaquil,HOMBRE,34,robo,Vía Pública,A1
2012-01-01,PICHINCHA,quito,MUJER,20,riña,Domicilio,A2
no es fecha,AZUAY,cuenca,MUJER,25,robo,Domicilio,A3
,,,,,,,
2019-11-30 10:00:00,los ríos,babahoyo,mujer,,violencia intrafamiliar,Domicilio,A4
";

    fn raw_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(RAW.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name(" Presunta Motivación; "), "presunta_motivacion");
        assert_eq!(normalize_column_name("Profesión Registro Civil"), "profesion_registro_civil");
    }

    #[test]
    fn test_clean_raw_csv() {
        let file = raw_file();
        let (records, report) = clean_raw_csv(file.path(), 2014).unwrap();

        assert_eq!(report.raw_rows, 6);
        assert_eq!(report.empty_rows, 1);
        assert_eq!(report.invalid_dates, 1);
        assert_eq!(report.before_min_year, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.kept, 2);
        assert_eq!(report.ignored_columns, vec!["Codigo Interno".to_string()]);

        assert_eq!(records[0].province.as_deref(), Some("Guayas"));
        assert_eq!(records[0].motivation.as_deref(), Some("Robo"));
        assert_eq!(records[0].age, Some(34));
        // Place is not title-cased
        assert_eq!(records[0].place.as_deref(), Some("Vía Pública"));
        assert_eq!(records[1].province.as_deref(), Some("Los Ríos"));
        assert_eq!(records[1].age, None);
    }

    #[test]
    fn test_clean_csv_round_trip_through_disk() {
        let file = raw_file();
        let (records, _) = clean_raw_csv(file.path(), 2014).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let clean = dir.path().join("limpio.csv");
        write_clean_csv(&clean, &records).unwrap();
        assert_eq!(read_clean_csv(&clean).unwrap(), records);
    }

    fn config_in(dir: &Path) -> AppConfig {
        let mut config = AppConfig::from_lookup(|_| None).unwrap();
        config.db_path = dir.join("homicidios.db");
        config.csv_path = dir.join("homicidios_completo_limpio.csv");
        config.backup_dir = dir.join("backups");
        config
    }

    #[test]
    fn test_refresh_writes_csv_and_snapshot() {
        let file = raw_file();
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let first = refresh(&[file.path()], &config).unwrap();
        assert!(first.backup.is_none());
        assert!(config.csv_path.exists());

        let second = refresh(&[file.path()], &config).unwrap();
        assert!(second.backup.unwrap().exists());
    }

    #[test]
    fn test_duplicates_are_removed_across_files() {
        let first = raw_file();
        let mut second = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        // Different column order, same Guayas row as the first export
        second
            .write_all(
                "Provincia,Fecha Infraccion,Cantón,Sexo,Edad,Presunta Motivación;,Lugar\n\
                 guayas,2021-03-04,GUAYAQUIL,hombre,34,ROBO,Vía Pública\n\
                 MANABI,2022-07-01,manta,MUJER,41,riña,Domicilio\n"
                    .as_bytes(),
            )
            .unwrap();

        let (records, report) = clean_raw_csvs(&[first.path(), second.path()], 2014).unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.raw_rows, 8);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.kept, 3);
        assert_eq!(records.iter().filter(|r| r.province.as_deref() == Some("Guayas")).count(), 1);
        assert!(records.iter().any(|r| r.province.as_deref() == Some("Manabi")));
    }

    #[test]
    fn test_refresh_requires_a_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let sources: [&Path; 0] = [];
        assert!(matches!(refresh(&sources, &config), Err(EngineError::Ingestion(_))));
        assert!(!config.db_path.exists());
    }

    #[test]
    fn test_rebuild_snapshot_from_clean_csv() {
        let file = raw_file();
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        assert!(matches!(rebuild_snapshot_from_clean_csv(&config), Err(EngineError::Ingestion(_))));

        let (records, _) = clean_raw_csv(file.path(), 2014).unwrap();
        write_clean_csv(&config.csv_path, &records).unwrap();

        assert_eq!(rebuild_snapshot_from_clean_csv(&config).unwrap(), 2);
        let store = SqliteStore::open(&config.db_path).unwrap();
        assert_eq!(store.count(&Predicate::all()).unwrap(), 2);
    }
}
