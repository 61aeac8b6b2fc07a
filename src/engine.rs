//! Question answering façade: normalize, extract, compile, retrieve, compose.

use crate::catalog::{DatasetCatalog, Snapshot};
use crate::composer::ResponseComposer;
use crate::config::QuerySettings;
use crate::error::Result;
use crate::filter::{compile, Predicate};
use crate::intent::{IntentExtractor, QueryIntent};
use crate::llm::GenerationBackend;
use crate::retrieval::{RetrievalResult, Retriever};
use crate::session::Session;
use crate::vocabulary::{VocabularyCache, VocabularyIndex};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub const EMPTY_QUESTION_MESSAGE: &str = "Escribe una pregunta sobre el dataset de homicidios.";

/// Intent and predicate for a question, without retrieval.
#[derive(Debug, Clone)]
pub struct Interpretation {
    pub intent: QueryIntent,
    pub predicate: Predicate,
}

pub struct QueryEngine {
    catalog: Arc<DatasetCatalog>,
    vocabulary: VocabularyCache,
    extractor: IntentExtractor,
    retriever: Retriever,
    composer: ResponseComposer,
}

impl QueryEngine {
    pub fn new(catalog: Arc<DatasetCatalog>, backend: Arc<dyn GenerationBackend>, settings: &QuerySettings) -> Self {
        Self {
            catalog,
            vocabulary: VocabularyCache::new(),
            extractor: IntentExtractor::new(settings.default_sample_size, settings.max_sample_size),
            retriever: Retriever::new(settings.summary_top_n),
            composer: ResponseComposer::new(backend),
        }
    }

    pub fn catalog(&self) -> &DatasetCatalog {
        &self.catalog
    }

    /// Answer one question and append the turn to the session history.
    ///
    /// Only store failures surface as errors; extraction ambiguity, empty
    /// results and backend failures are all rendered into the answer.
    pub async fn answer(&self, session: &mut Session, question: &str) -> Result<String> {
        if question.trim().is_empty() {
            session.record(question, EMPTY_QUESTION_MESSAGE, None);
            return Ok(EMPTY_QUESTION_MESSAGE.to_string());
        }

        let snapshot = self.catalog.current()?;
        let Interpretation { intent, predicate } = self.interpret_with(&snapshot, question)?;

        let result = self.retriever.retrieve(
            snapshot.store(),
            &predicate,
            intent.mode,
            intent.sample_size,
            intent.group_by,
        )?;
        let answer = self.composer.compose(question, &result).await;

        info!(
            "Session {}: answered in {} mode ({} matches)",
            session.id,
            intent.mode,
            result.total()
        );
        session.record(question, &answer, Some(intent.mode));
        Ok(answer)
    }

    /// Extract and compile without touching the backend.
    pub fn interpret(&self, question: &str) -> Result<Interpretation> {
        let snapshot = self.catalog.current()?;
        self.interpret_with(&snapshot, question)
    }

    /// Run retrieval for a question without narration.
    pub fn retrieve(&self, question: &str) -> Result<RetrievalResult> {
        let snapshot = self.catalog.current()?;
        let Interpretation { intent, predicate } = self.interpret_with(&snapshot, question)?;
        self.retriever
            .retrieve(snapshot.store(), &predicate, intent.mode, intent.sample_size, intent.group_by)
    }

    pub fn vocabulary(&self) -> Result<Arc<VocabularyIndex>> {
        let snapshot = self.catalog.current()?;
        self.vocabulary.get_or_build(&snapshot)
    }

    /// Install a new snapshot and drop the vocabulary built for the old one.
    pub fn replace_dataset(&self, snapshot: Snapshot) -> Result<Uuid> {
        let version = self.catalog.install(snapshot)?;
        self.vocabulary.invalidate();
        Ok(version)
    }

    fn interpret_with(&self, snapshot: &Snapshot, question: &str) -> Result<Interpretation> {
        let vocabulary = self.vocabulary.get_or_build(snapshot)?;
        let intent = self.extractor.extract(question, &vocabulary);
        let predicate = compile(&intent);
        Ok(Interpretation { intent, predicate })
    }
}
