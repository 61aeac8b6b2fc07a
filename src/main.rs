use anyhow::Result;
use clap::{Parser, Subcommand};
use homicide_query::catalog::{open_store, DatasetCatalog};
use homicide_query::config::{AppConfig, StoreKind};
use homicide_query::engine::QueryEngine;
use homicide_query::ingestion;
use homicide_query::vocabulary::INDEXED_FIELDS;
use homicide_query::session::{Session, GREETING};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "homicidios")]
#[command(about = "Preguntas en lenguaje natural sobre el dataset de homicidios")]
struct Cli {
    /// SQLite snapshot (or set HOMICIDIOS_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Cleaned CSV export (or set HOMICIDIOS_CSV_PATH)
    #[arg(long, global = true)]
    csv: Option<PathBuf>,

    /// Which store answers questions (or set HOMICIDIOS_STORE)
    #[arg(long, value_enum, global = true)]
    store: Option<StoreKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        question: String,
    },
    /// Interactive session reading questions from stdin
    Chat,
    /// Clean raw exports and replace the persisted dataset
    Refresh {
        /// Raw CSV export; repeat to merge several
        #[arg(short, long, required = true)]
        source: Vec<PathBuf>,
    },
    /// Rebuild the SQLite snapshot from the cleaned CSV
    Rebuild,
    /// Show vocabulary sizes per field
    Vocab,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(csv) = cli.csv {
        config.csv_path = csv;
    }
    if let Some(store) = cli.store {
        config.store = store;
    }

    match cli.command {
        Commands::Refresh { source } => {
            let summary = ingestion::refresh(&source, &config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Rebuild => {
            let written = ingestion::rebuild_snapshot_from_clean_csv(&config)?;
            println!("{} registros escritos en {}", written, config.db_path.display());
            Ok(())
        }
        Commands::Ask { question } => {
            let engine = build_engine(&config)?;
            let mut session = Session::new();
            let answer = engine.answer(&mut session, &question).await?;
            println!("{}", answer);
            Ok(())
        }
        Commands::Chat => {
            let engine = build_engine(&config)?;
            chat(&engine).await
        }
        Commands::Vocab => {
            let engine = build_engine(&config)?;
            let vocabulary = engine.vocabulary()?;
            for field in INDEXED_FIELDS {
                println!("{:<28} {}", field.column(), vocabulary.len(field));
            }
            Ok(())
        }
    }
}

fn build_engine(config: &AppConfig) -> Result<QueryEngine> {
    let snapshot = open_store(config)?;
    info!("Using {} store at {}", snapshot.store().name(), snapshot.source());
    if config.gemini.api_key.is_none() {
        info!("GOOGLE_API_KEY not set; only count questions will be answered");
    }
    let catalog = Arc::new(DatasetCatalog::with_snapshot(snapshot));
    let backend = Arc::new(config.gemini.client());
    Ok(QueryEngine::new(catalog, backend, &config.query))
}

async fn chat(engine: &QueryEngine) -> Result<()> {
    let mut session = Session::new();
    println!("{}", GREETING);

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        match question {
            ":salir" | ":quit" => break,
            ":historial" => {
                println!("{}", session.transcript());
                continue;
            }
            _ => {}
        }

        match engine.answer(&mut session, question).await {
            Ok(answer) => println!("{}\n", answer),
            Err(e) => {
                error!("Failed to answer: {}", e);
                println!("⚠️ {}\n", e);
            }
        }
    }
    Ok(())
}
