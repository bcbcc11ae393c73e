//! Core data types shared by the ingestion, retrieval and chat layers.

use serde::{Deserialize, Serialize};

/// A window of a document's extracted text, the unit stored in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `"{filename}_{index}"`, unique per ingested file.
    pub id: String,
    pub text: String,
    /// Filename of the uploaded document.
    pub source: String,
}

impl Chunk {
    pub fn new(source: &str, index: usize, text: impl Into<String>) -> Self {
        Self {
            id: format!("{}_{}", source, index),
            text: text.into(),
            source: source.to_string(),
        }
    }
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub id: String,
    pub text: String,
    pub source: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    /// Chunk ids the answer was grounded on (assistant turns only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizItem {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
}
