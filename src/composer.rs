//! Response composition.
//!
//! Counts and empty results are answered locally from templates. Samples and
//! summaries are serialized into a grounding prompt and narrated by the
//! generation backend; a backend failure becomes a warning string instead of
//! an error.

use crate::llm::GenerationBackend;
use crate::record::Record;
use crate::retrieval::RetrievalResult;
use crate::store::{DatasetOverview, GroupCount};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

pub const EMPTY_RESULT_MESSAGE: &str = "No se encontraron registros que coincidan con la consulta.";

pub fn count_sentence(total: usize) -> String {
    format!(
        "Según el dataset, hay **{}** casos que coinciden con los criterios mencionados.",
        total
    )
}

pub fn backend_error_message(cause: &str) -> String {
    format!("⚠️ Error al generar la respuesta: {}", cause)
}

const PREAMBLE: &str = "Eres un asistente experto en análisis de homicidios.
Responde únicamente con base en los datos reales proporcionados, en español y sin inventar cifras.";

#[derive(Serialize)]
struct GroupRow<'a> {
    valor: &'a str,
    casos: usize,
}

pub struct ResponseComposer {
    backend: Arc<dyn GenerationBackend>,
}

impl ResponseComposer {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn compose(&self, question: &str, result: &RetrievalResult) -> String {
        let prompt = match build_prompt(question, result) {
            Ok(Some(prompt)) => prompt,
            Ok(None) => return local_answer(result),
            Err(e) => return backend_error_message(&format!("no se pudo serializar el contexto: {}", e)),
        };

        match self.backend.generate(&prompt).await {
            Ok(text) => {
                info!("Backend {} answered ({} chars)", self.backend.name(), text.len());
                text.trim().to_string()
            }
            Err(e) => {
                warn!("Backend {} failed: {}", self.backend.name(), e);
                backend_error_message(&e.to_string())
            }
        }
    }
}

/// Answer that needs no backend. Only meaningful for `Empty` and `Count`.
fn local_answer(result: &RetrievalResult) -> String {
    match result {
        RetrievalResult::Count { total } => count_sentence(*total),
        _ => EMPTY_RESULT_MESSAGE.to_string(),
    }
}

/// Grounding prompt for results that need narration, `None` otherwise.
/// Values are interpolated once, so braces in data or question stay literal.
pub fn build_prompt(question: &str, result: &RetrievalResult) -> serde_json::Result<Option<String>> {
    let question = question.trim();
    let prompt = match result {
        RetrievalResult::Empty | RetrievalResult::Count { .. } => return Ok(None),
        RetrievalResult::Sample { total, records } => format!(
            "{PREAMBLE}\n\nEn total hay {total} casos que coinciden con la consulta. \
             Estos son {shown} registros de muestra elegidos al azar:\n\n{data}\n\n\
             Pregunta del usuario: \"{question}\"",
            shown = records.len(),
            data = records_json(records)?,
        ),
        RetrievalResult::Summary { total, field, groups, overview } => format!(
            "{PREAMBLE}\n\nEn total hay {total} casos que coinciden con la consulta. \
             Distribución por {field} (los {shown} valores más frecuentes):\n\n{data}\n\n\
             Contexto del dataset completo:\n{overview}\n\n\
             Pregunta del usuario: \"{question}\"",
            field = field.column(),
            shown = groups.len(),
            data = groups_json(groups)?,
            overview = overview_text(overview.as_ref()),
        ),
    };
    Ok(Some(prompt))
}

fn records_json(records: &[Record]) -> serde_json::Result<String> {
    serde_json::to_string(records)
}

fn groups_json(groups: &[GroupCount]) -> serde_json::Result<String> {
    let rows: Vec<GroupRow<'_>> = groups
        .iter()
        .map(|g| GroupRow { valor: &g.value, casos: g.total })
        .collect();
    serde_json::to_string(&rows)
}

fn overview_text(overview: Option<&DatasetOverview>) -> String {
    let Some(overview) = overview else {
        return "no disponible".to_string();
    };
    let years = match (overview.first_year, overview.last_year) {
        (Some(first), Some(last)) => format!("{}-{}", first, last),
        _ => "sin fechas".to_string(),
    };
    format!(
        "{} registros, años {}, {} provincias. Columnas: {}",
        overview.total_records,
        years,
        overview.provinces,
        overview.columns.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::BackendError;
    use crate::record::Field;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<String, BackendError>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(reply: Result<String, BackendError>) -> Arc<Self> {
            Arc::new(Self { reply, prompts: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl GenerationBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn sample() -> RetrievalResult {
        let mut record = Record::new(NaiveDate::from_ymd_opt(2021, 8, 9).unwrap());
        record.province = Some("Guayas".to_string());
        RetrievalResult::Sample { total: 40, records: vec![record] }
    }

    #[tokio::test]
    async fn test_count_and_empty_are_local() {
        let backend = Scripted::new(Ok("no".to_string()));
        let composer = ResponseComposer::new(backend.clone());

        assert_eq!(
            composer.compose("cuantos", &RetrievalResult::Count { total: 12 }).await,
            "Según el dataset, hay **12** casos que coinciden con los criterios mencionados."
        );
        assert_eq!(composer.compose("x", &RetrievalResult::Empty).await, EMPTY_RESULT_MESSAGE);
        assert!(backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sample_prompt_carries_question_and_total() {
        let backend = Scripted::new(Ok("  Hubo un caso en Guayas.\n".to_string()));
        let composer = ResponseComposer::new(backend.clone());

        let answer = composer.compose("dime casos en Guayas {x}", &sample()).await;
        assert_eq!(answer, "Hubo un caso en Guayas.");

        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("En total hay 40 casos"));
        assert!(prompts[0].contains("\"provincia\":\"Guayas\""));
        assert!(prompts[0].contains("Pregunta del usuario: \"dime casos en Guayas {x}\""));
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_warning() {
        let backend = Scripted::new(Err(BackendError::Quota("limit".to_string())));
        let answer = ResponseComposer::new(backend).compose("dime", &sample()).await;
        assert_eq!(answer, "⚠️ Error al generar la respuesta: quota exceeded: limit");
    }

    #[test]
    fn test_summary_prompt_lists_groups() {
        let result = RetrievalResult::Summary {
            total: 9,
            field: Field::Motivation,
            groups: vec![GroupCount { value: "Robo".to_string(), total: 6 }],
            overview: None,
        };
        let prompt = build_prompt("por que", &result).unwrap().unwrap();
        assert!(prompt.contains("Distribución por presunta_motivacion"));
        assert!(prompt.contains("[{\"valor\":\"Robo\",\"casos\":6}]"));
        assert!(prompt.contains("no disponible"));
    }

    #[test]
    fn test_braces_in_data_and_question_stay_literal() {
        let mut record = Record::new(NaiveDate::from_ymd_opt(2022, 1, 3).unwrap());
        record.place = Some("calle {question}".to_string());
        let result = RetrievalResult::Sample { total: 1, records: vec![record] };

        let prompt = build_prompt("  PREGUNTA {data} ", &result).unwrap().unwrap();
        assert!(prompt.contains("calle {question}"));
        assert!(prompt.contains("Pregunta del usuario: \"PREGUNTA {data}\""));
        assert_eq!(prompt.matches("PREGUNTA").count(), 1);
    }
}
