//! SQLite store: predicates pushed down as parameterized SQL.
//!
//! Text comparisons go through a `fold()` scalar function registered on the
//! connection, which applies the same normalization as the intent extractor,
//! so `fold(provincia) = ?` behaves like the in-memory equality.

use super::{column_names, rank_groups, DatasetOverview, GroupCount, TabularStore};
use crate::error::{EngineError, Result};
use crate::filter::{Condition, Operand, Operator, Predicate};
use crate::normalize::normalize;
use crate::record::{Field, Record};
use chrono::Local;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const TABLE: &str = "homicidios";

pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
    /// Columns physically present; absent ones read as NULL.
    columns: HashSet<String>,
}

impl SqliteStore {
    /// Open an existing snapshot read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(EngineError::StoreUnavailable(format!(
                "Database not found: {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| EngineError::StoreUnavailable(format!("Failed to open {}: {}", path.display(), e)))?;
        register_fold(&conn)?;

        let columns = table_columns(&conn)?;
        if columns.is_empty() {
            return Err(EngineError::StoreUnavailable(format!(
                "Table '{}' missing in {}",
                TABLE,
                path.display()
            )));
        }
        if !columns.contains(Field::Date.column()) {
            return Err(EngineError::Store(format!(
                "Table '{}' has no {} column",
                TABLE,
                Field::Date.column()
            )));
        }

        info!("Opened SQLite snapshot {} ({} columns)", path.display(), columns.len());
        Ok(Self { path, conn: Mutex::new(conn), columns })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `records` into a fresh database file at `path`.
    pub fn create(path: impl AsRef<Path>, records: &[Record]) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let mut conn = Connection::open(path)?;

        let column_defs: Vec<String> = Field::ALL
            .iter()
            .map(|f| match f {
                Field::Date => format!("{} TEXT NOT NULL", f.column()),
                Field::Age => format!("{} INTEGER", f.column()),
                _ => format!("{} TEXT", f.column()),
            })
            .collect();
        conn.execute(
            &format!("CREATE TABLE {} ({})", TABLE, column_defs.join(", ")),
            [],
        )?;

        let columns = column_names().join(", ");
        let placeholders = (1..=Field::ALL.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!("INSERT INTO {} ({}) VALUES ({})", TABLE, columns, placeholders);

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&insert)?;
            for record in records {
                let values: Vec<Value> = Field::ALL
                    .iter()
                    .map(|f| match (f, record.cell(*f)) {
                        (Field::Age, _) => record.age.map(|a| Value::Integer(i64::from(a))).unwrap_or(Value::Null),
                        (_, Some(text)) => Value::Text(text),
                        (_, None) => Value::Null,
                    })
                    .collect();
                stmt.execute(params_from_iter(values.iter()))?;
            }
        }
        tx.commit()?;

        conn.execute(
            &format!("CREATE INDEX idx_{}_fecha ON {}({})", TABLE, TABLE, Field::Date.column()),
            [],
        )?;
        Ok(())
    }

    /// Replace the snapshot at `path` with `records`.
    ///
    /// The new database is written next to the target and renamed over it in
    /// one step, so `path` always holds a complete snapshot. An existing
    /// snapshot is linked (or copied) into `backup_dir` with a timestamp
    /// suffix first. Returns the backup path, if one was made.
    pub fn replace_snapshot(
        path: impl AsRef<Path>,
        records: &[Record],
        backup_dir: Option<&Path>,
    ) -> Result<Option<PathBuf>> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("db.tmp");
        if let Err(e) = Self::create(&staging, records) {
            let _ = std::fs::remove_file(&staging);
            return Err(e);
        }
        let backup = Self::install_staged(&staging, path, backup_dir)?;
        info!("Wrote {} records to {}", records.len(), path.display());
        Ok(backup)
    }

    /// Back up `path`, then rename `staging` over it. On failure `path` is
    /// left untouched and the staging file and backup are removed.
    fn install_staged(staging: &Path, path: &Path, backup_dir: Option<&Path>) -> Result<Option<PathBuf>> {
        let backup = match (path.exists(), backup_dir) {
            (true, Some(dir)) => match Self::backup(path, dir) {
                Ok(target) => Some(target),
                Err(e) => {
                    let _ = std::fs::remove_file(staging);
                    return Err(e);
                }
            },
            _ => None,
        };

        if let Err(e) = std::fs::rename(staging, path) {
            let _ = std::fs::remove_file(staging);
            if let Some(target) = &backup {
                let _ = std::fs::remove_file(target);
            }
            return Err(EngineError::Store(format!(
                "Failed to install snapshot at {}: {}",
                path.display(),
                e
            )));
        }
        Ok(backup)
    }

    fn backup(path: &Path, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(TABLE);
        let target = dir.join(format!("{}_{}.db", stem, Local::now().format("%Y%m%d_%H%M%S")));
        if std::fs::hard_link(path, &target).is_err() {
            // Backup dir on another filesystem
            std::fs::copy(path, &target)?;
        }
        info!("Backed up previous snapshot to {}", target.display());
        Ok(target)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Store("SQLite connection lock poisoned".to_string()))
    }

    fn column_expr(&self, field: Field) -> &'static str {
        if self.columns.contains(field.column()) {
            field.column()
        } else {
            "NULL"
        }
    }

    fn select_list(&self) -> String {
        Field::ALL
            .iter()
            .map(|f| format!("{} AS {}", self.column_expr(*f), f.column()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Render the predicate as SQL conditions plus bound parameters. Rows
    /// whose date SQLite cannot read are excluded from every query, so counts
    /// and samples see the same rows.
    fn render(&self, predicate: &Predicate) -> (Vec<String>, Vec<Value>) {
        let mut sql = vec![valid_date_sql()];
        let mut params = Vec::new();
        for clause in &predicate.clauses {
            let parts: Vec<String> = clause
                .any_of
                .iter()
                .map(|condition| self.render_condition(condition, &mut params))
                .collect();
            sql.push(format!("({})", parts.join(" OR ")));
        }
        (sql, params)
    }

    fn render_condition(&self, condition: &Condition, params: &mut Vec<Value>) -> String {
        let column = self.column_expr(condition.field);
        match (condition.op, &condition.operand) {
            (Operator::YearEq, Operand::Integer(year)) => {
                params.push(Value::Integer(*year));
                format!("CAST(substr({}, 1, 4) AS INTEGER) = ?", column)
            }
            (Operator::Eq, Operand::Integer(value)) => {
                params.push(Value::Integer(*value));
                format!("CAST({} AS INTEGER) = ?", column)
            }
            (Operator::Eq, Operand::Text(value)) => {
                params.push(Value::Text(value.clone()));
                format!("fold({}) = ?", column)
            }
            (Operator::Like, Operand::Text(value)) => {
                params.push(Value::Text(value.clone()));
                format!("instr(fold({}), ?) > 0", column)
            }
            _ => "0".to_string(),
        }
    }

    fn where_sql(conditions: &[String]) -> String {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

impl TabularStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn distinct_values(&self, field: Field) -> Result<Vec<String>> {
        let column = self.column_expr(field);
        if column == "NULL" {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT CAST({col} AS TEXT) FROM {table} WHERE {col} IS NOT NULL ORDER BY 1",
            col = column,
            table = TABLE
        ))?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(values.into_iter().filter(|v| !v.trim().is_empty()).collect())
    }

    fn count(&self, predicate: &Predicate) -> Result<usize> {
        let (conditions, params) = self.render(predicate);
        let sql = format!("SELECT COUNT(*) FROM {} {}", TABLE, Self::where_sql(&conditions));
        debug!("SQLite count: {} {:?}", sql, params);
        let conn = self.lock()?;
        let total: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(total.max(0) as usize)
    }

    fn sample(&self, predicate: &Predicate, limit: usize) -> Result<Vec<Record>> {
        let (conditions, mut params) = self.render(predicate);
        let sql = format!(
            "SELECT {} FROM {} {} ORDER BY RANDOM() LIMIT ?",
            self.select_list(),
            TABLE,
            Self::where_sql(&conditions)
        );
        params.push(Value::Integer(limit as i64));
        debug!("SQLite sample: {}", sql);

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let total = rows.len();
        let records: Vec<Record> = rows.into_iter().flatten().collect();
        if records.len() < total {
            warn!("Skipped {} rows with unparseable dates", total - records.len());
        }
        Ok(records)
    }

    fn group_count(&self, predicate: &Predicate, field: Field, limit: usize) -> Result<Vec<GroupCount>> {
        let column = self.column_expr(field);
        if column == "NULL" {
            return Ok(Vec::new());
        }
        let (mut conditions, mut params) = self.render(predicate);
        conditions.push(format!("{} IS NOT NULL", column));
        let sql = format!(
            "SELECT CAST({col} AS TEXT) AS value, COUNT(*) AS total FROM {table} {filter} \
             GROUP BY value ORDER BY total DESC, value ASC LIMIT ?",
            col = column,
            table = TABLE,
            filter = Self::where_sql(&conditions)
        );
        params.push(Value::Integer(limit as i64));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let groups = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let total: i64 = row.get(1)?;
                Ok(GroupCount { value: row.get(0)?, total: total.max(0) as usize })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rank_groups(groups, limit))
    }

    fn overview(&self) -> Result<DatasetOverview> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT COUNT(*), MIN(CAST(substr({date}, 1, 4) AS INTEGER)), \
             MAX(CAST(substr({date}, 1, 4) AS INTEGER)), COUNT(DISTINCT {province}) FROM {table} WHERE {valid}",
            date = Field::Date.column(),
            province = self.column_expr(Field::Province),
            table = TABLE,
            valid = valid_date_sql()
        );
        let (total, first, last, provinces): (i64, Option<i64>, Option<i64>, i64) =
            conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?;
        Ok(DatasetOverview {
            total_records: total.max(0) as usize,
            first_year: first.map(|y| y as i32),
            last_year: last.map(|y| y as i32),
            provinces: provinces.max(0) as usize,
            columns: column_names(),
        })
    }
}

fn valid_date_sql() -> String {
    format!("date({}) IS NOT NULL", Field::Date.column())
}

fn register_fold(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "fold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value = ctx.get::<Option<String>>(0).unwrap_or(None);
            Ok(value.map(|v| normalize(&v)))
        },
    )?;
    Ok(())
}

fn table_columns(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", TABLE))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(columns)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Option<Record>> {
    let mut cells = Vec::with_capacity(Field::ALL.len());
    for idx in 0..Field::ALL.len() {
        let cell = match row.get::<_, Value>(idx)? {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Text(s) => Some(s),
            Value::Blob(_) => None,
        };
        cells.push(cell);
    }
    Ok(Record::from_lookup(|field| {
        Field::ALL
            .iter()
            .position(|f| *f == field)
            .and_then(|idx| cells[idx].clone())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Clause;
    use chrono::NaiveDate;

    fn records() -> Vec<Record> {
        let rows = [
            (2020, "Bolívar", "Mujer", "Vía Pública"),
            (2020, "Bolívar", "Hombre", "Domicilio"),
            (2021, "Guayas", "Hombre", "Vía Pública"),
        ];
        rows.iter()
            .map(|(year, province, sex, place)| {
                let mut r = Record::new(NaiveDate::from_ymd_opt(*year, 5, 10).unwrap());
                r.province = Some(province.to_string());
                r.sex = Some(sex.to_string());
                r.place = Some(place.to_string());
                r.age = Some(40);
                r
            })
            .collect()
    }

    #[test]
    fn test_missing_database_is_unavailable() {
        let err = SqliteStore::open("/nonexistent/homicidios.db").err().unwrap();
        assert!(err.is_store_unavailable());
    }

    #[test]
    fn test_pushdown_uses_folded_comparisons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homicidios.db");
        SqliteStore::create(&path, &records()).unwrap();
        let store = SqliteStore::open(&path).unwrap();

        let in_bolivar = Predicate::all()
            .and(Clause::single(Condition::text(Field::Province, Operator::Eq, "BOLIVAR")));
        assert_eq!(store.count(&in_bolivar).unwrap(), 2);

        let public_way = Predicate::all()
            .and(Clause::single(Condition::text(Field::Place, Operator::Like, "via publica")))
            .and(Clause::single(Condition::integer(Field::Date, Operator::YearEq, 2021)));
        assert_eq!(store.count(&public_way).unwrap(), 1);

        let sample = store.sample(&in_bolivar, 10).unwrap();
        assert_eq!(sample.len(), 2);
        assert!(sample.iter().all(|r| r.age == Some(40)));

        let groups = store.group_count(&Predicate::all(), Field::Sex, 5).unwrap();
        assert_eq!(groups[0], GroupCount { value: "Hombre".to_string(), total: 2 });
    }

    #[test]
    fn test_replace_snapshot_backs_up_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homicidios.db");
        let backups = dir.path().join("backups");

        assert!(SqliteStore::replace_snapshot(&path, &records(), Some(&backups)).unwrap().is_none());
        let backup = SqliteStore::replace_snapshot(&path, &records()[..1], Some(&backups))
            .unwrap()
            .unwrap();

        assert!(backup.exists());
        assert!(!path.with_extension("db.tmp").exists());
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.count(&Predicate::all()).unwrap(), 1);
        assert_eq!(SqliteStore::open(&backup).unwrap().count(&Predicate::all()).unwrap(), 3);
    }

    #[test]
    fn test_snapshot_stays_readable_during_swap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homicidios.db");
        let backups = dir.path().join("backups");
        SqliteStore::replace_snapshot(&path, &records(), Some(&backups)).unwrap();
        let reader = SqliteStore::open(&path).unwrap();

        let staging = path.with_extension("db.tmp");
        SqliteStore::create(&staging, &records()[..1]).unwrap();
        assert_eq!(SqliteStore::open(&path).unwrap().count(&Predicate::all()).unwrap(), 3);

        let backup = SqliteStore::install_staged(&staging, &path, Some(&backups)).unwrap();
        assert!(backup.unwrap().exists());
        assert_eq!(SqliteStore::open(&path).unwrap().count(&Predicate::all()).unwrap(), 1);
        // Open connections keep the snapshot they started with
        assert_eq!(reader.count(&Predicate::all()).unwrap(), 3);
    }

    #[test]
    fn test_failed_swap_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homicidios.db");
        let backups = dir.path().join("backups");
        SqliteStore::replace_snapshot(&path, &records(), None).unwrap();

        let missing = dir.path().join("gone.db.tmp");
        let err = SqliteStore::install_staged(&missing, &path, Some(&backups));
        assert!(matches!(err, Err(EngineError::Store(_))));

        assert_eq!(SqliteStore::open(&path).unwrap().count(&Predicate::all()).unwrap(), 3);
        assert_eq!(std::fs::read_dir(&backups).unwrap().count(), 0);
    }

    #[test]
    fn test_unreadable_dates_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homicidios.db");
        SqliteStore::create(&path, &records()).unwrap();
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "INSERT INTO homicidios (fecha_infraccion, provincia) VALUES ('sin fecha', 'Bolívar')",
                [],
            )
            .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let total = store.count(&Predicate::all()).unwrap();
        assert_eq!(total, 3);
        assert_eq!(store.sample(&Predicate::all(), 10).unwrap().len(), total);
        assert_eq!(store.overview().unwrap().first_year, Some(2020));
    }

    #[test]
    fn test_sample_varies_between_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homicidios.db");
        let many: Vec<Record> = (0..30)
            .map(|age| {
                let mut r = Record::new(NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
                r.age = Some(age);
                r
            })
            .collect();
        SqliteStore::create(&path, &many).unwrap();
        let store = SqliteStore::open(&path).unwrap();

        let draws: HashSet<Vec<Option<u32>>> = (0..20)
            .map(|_| {
                let sample = store.sample(&Predicate::all(), 5).unwrap();
                assert_eq!(sample.len(), 5);
                sample.iter().map(|r| r.age).collect()
            })
            .collect();
        assert!(draws.len() > 1);
    }
}
