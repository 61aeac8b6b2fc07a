use homicide_query::catalog::{open_store, DatasetCatalog};
use homicide_query::config::{AppConfig, StoreKind};
use homicide_query::engine::QueryEngine;
use homicide_query::ingestion;
use homicide_query::llm::GeminiClient;
use homicide_query::session::Session;
use std::io::Write;
use std::sync::Arc;

const RAW: &str = "\
fecha_infraccion,provincia,canton,sexo,edad,tipo_muerte,presunta_motivacion,lugar
2023-01-10,PICHINCHA,QUITO,MUJER,31,FEMICIDIO,VIOLENCIA INTRAFAMILIAR,Domicilio
2023-02-11,PICHINCHA,QUITO,HOMBRE,45,SICARIATO,CONFLICTO TERRITORIAL,Via Publica
2023-02-11,GUAYAS,GUAYAQUIL,HOMBRE,19,SICARIATO,CONFLICTO TERRITORIAL,Via Publica
2010-02-11,GUAYAS,GUAYAQUIL,HOMBRE,19,SICARIATO,ROBO,Via Publica
";

fn config_in(dir: &std::path::Path, store: StoreKind) -> AppConfig {
    let mut config = AppConfig::from_lookup(|_| None).unwrap();
    config.db_path = dir.join("homicidios.db");
    config.csv_path = dir.join("homicidios_completo_limpio.csv");
    config.backup_dir = dir.join("backups");
    config.store = store;
    config
}

async fn count(config: &AppConfig, question: &str) -> String {
    let catalog = Arc::new(DatasetCatalog::with_snapshot(open_store(config).unwrap()));
    // No API key: count answers never need the backend
    let engine = QueryEngine::new(catalog, Arc::new(GeminiClient::new(None)), &config.query);
    let mut session = Session::new();
    engine.answer(&mut session, question).await.unwrap()
}

#[tokio::test]
async fn test_refresh_then_answer_from_both_stores() {
    let dir = tempfile::tempdir().unwrap();
    let mut raw = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    raw.write_all(RAW.as_bytes()).unwrap();

    let sqlite = config_in(dir.path(), StoreKind::Sqlite);
    let summary = ingestion::refresh(&[raw.path()], &sqlite).unwrap();
    assert_eq!(summary.report.kept, 3);
    assert_eq!(summary.report.before_min_year, 1);

    let memory = config_in(dir.path(), StoreKind::Memory);
    for config in [&sqlite, &memory] {
        assert_eq!(
            count(config, "¿Cuántos sicariatos hubo en la vía pública?").await,
            "Según el dataset, hay **2** casos que coinciden con los criterios mencionados."
        );
        assert_eq!(
            count(config, "total de mujeres de 31 años en Pichincha").await,
            "Según el dataset, hay **1** casos que coinciden con los criterios mencionados."
        );
    }
}

#[tokio::test]
async fn test_missing_snapshot_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), StoreKind::Sqlite);
    assert!(open_store(&config).err().unwrap().is_store_unavailable());
}
