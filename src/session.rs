//! Per-conversation state. History is append-only and never read back by
//! intent extraction; every question is interpreted on its own.

use crate::intent::ResponseMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const GREETING: &str =
    "Hola, soy tu asistente de análisis de homicidios. Pregúntame sobre provincias, años, motivaciones o tipos de muerte.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    /// `None` when the question never reached extraction (blank input).
    pub mode: Option<ResponseMode>,
    pub asked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    history: Vec<ConversationTurn>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub(crate) fn record(&mut self, question: &str, answer: &str, mode: Option<ResponseMode>) {
        self.history.push(ConversationTurn {
            question: question.to_string(),
            answer: answer.to_string(),
            mode,
            asked_at: Utc::now(),
        });
    }

    /// Plain-text rendering of the history, oldest first.
    pub fn transcript(&self) -> String {
        self.history
            .iter()
            .map(|turn| {
                format!(
                    "[{}] Usuario: {}\nAsistente: {}",
                    turn.asked_at.format("%H:%M:%S"),
                    turn.question,
                    turn.answer
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_append_only() {
        let mut session = Session::new();
        session.record("cuantos casos", "hay 3", Some(ResponseMode::Count));
        session.record("", "vacio", None);

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].question, "cuantos casos");
        assert_eq!(history[1].mode, None);

        let transcript = session.transcript();
        assert!(transcript.contains("Usuario: cuantos casos\nAsistente: hay 3"));
    }
}
