pub mod catalog;
pub mod composer;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod ingestion;
pub mod intent;
pub mod llm;
pub mod normalize;
pub mod record;
pub mod retrieval;
pub mod session;
pub mod store;
pub mod vocabulary;

pub use catalog::{DatasetCatalog, Snapshot};
pub use config::{AppConfig, QuerySettings, StoreKind};
pub use engine::QueryEngine;
pub use error::{EngineError, Result};
pub use intent::{IntentExtractor, QueryIntent, ResponseMode};
pub use llm::{BackendError, GeminiClient, GenerationBackend};
pub use record::{Field, Record};
pub use session::Session;
pub use store::{MemoryStore, SqliteStore, TabularStore};
