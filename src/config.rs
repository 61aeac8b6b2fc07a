//! Environment-driven configuration.

use crate::error::{EngineError, Result};
use crate::intent::{DEFAULT_SAMPLE_SIZE, MAX_SAMPLE_SIZE};
use crate::llm::{GeminiClient, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL, DEFAULT_TIMEOUT_SECS};
use crate::retrieval::DEFAULT_SUMMARY_TOP_N;
use clap::ValueEnum;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MIN_YEAR: i32 = 2014;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

impl FromStr for StoreKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(StoreKind::Sqlite),
            "memory" | "csv" => Ok(StoreKind::Memory),
            other => Err(EngineError::Config(format!(
                "Unknown store kind '{}' (expected sqlite or memory)",
                other
            ))),
        }
    }
}

/// Knobs of the question pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySettings {
    pub default_sample_size: usize,
    pub max_sample_size: usize,
    pub summary_top_n: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_sample_size: DEFAULT_SAMPLE_SIZE,
            max_sample_size: MAX_SAMPLE_SIZE,
            summary_top_n: DEFAULT_SUMMARY_TOP_N,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl GeminiSettings {
    pub fn client(&self) -> GeminiClient {
        GeminiClient::new(self.api_key.clone())
            .with_model(self.model.clone())
            .with_base_url(self.base_url.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub csv_path: PathBuf,
    pub backup_dir: PathBuf,
    pub store: StoreKind,
    pub min_year: i32,
    pub query: QuerySettings,
    pub gemini: GeminiSettings,
}

impl AppConfig {
    /// Read settings from the process environment. Call `dotenv` first if a
    /// `.env` file should be honoured.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let max_sample_size = parse_or(&var, "HOMICIDIOS_MAX_SAMPLE", MAX_SAMPLE_SIZE)?;
        let default_sample_size = parse_or(&var, "HOMICIDIOS_DEFAULT_SAMPLE", DEFAULT_SAMPLE_SIZE)?;
        if default_sample_size == 0 || default_sample_size > max_sample_size {
            return Err(EngineError::Config(format!(
                "HOMICIDIOS_DEFAULT_SAMPLE must be between 1 and {}",
                max_sample_size
            )));
        }

        Ok(Self {
            db_path: PathBuf::from(var("HOMICIDIOS_DB_PATH").unwrap_or_else(|| "homicidios.db".to_string())),
            csv_path: PathBuf::from(
                var("HOMICIDIOS_CSV_PATH").unwrap_or_else(|| "homicidios_completo_limpio.csv".to_string()),
            ),
            backup_dir: PathBuf::from(var("HOMICIDIOS_BACKUP_DIR").unwrap_or_else(|| "backups".to_string())),
            store: var("HOMICIDIOS_STORE")
                .map(|v| v.parse::<StoreKind>())
                .transpose()?
                .unwrap_or(StoreKind::Sqlite),
            min_year: parse_or(&var, "HOMICIDIOS_MIN_YEAR", DEFAULT_MIN_YEAR)?,
            query: QuerySettings {
                default_sample_size,
                max_sample_size,
                summary_top_n: parse_or(&var, "HOMICIDIOS_SUMMARY_TOP_N", DEFAULT_SUMMARY_TOP_N)?,
            },
            gemini: GeminiSettings {
                api_key: var("GOOGLE_API_KEY"),
                model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                base_url: var("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
                timeout_secs: parse_or(&var, "GEMINI_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?,
            },
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| EngineError::Config(format!("Invalid {}='{}': {}", key, raw, e))),
        None => Ok(default),
    }
}
