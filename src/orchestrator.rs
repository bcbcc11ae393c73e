//! Prompt construction and model calls for chat, flashcards and quizzes.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::generation::{parse_flashcards, parse_quiz, Parsed};
use crate::llm::{ChatMessage, ChatModel, LlmError};
use crate::models::{ChatTurn, Flashcard, QuizItem, Role};

const CHAT_SYSTEM_PROMPT: &str = "You are a helpful study assistant. \
You must answer questions based ONLY on the provided context. \
If the answer is not in the context, state clearly that you cannot find the information.";

const FLASHCARD_SYSTEM_PROMPT: &str = "You are a study aid generator. \
Output ONLY valid JSON. \
Do not include markdown formatting (like ```json), introductions, or explanations.";

const QUIZ_SYSTEM_PROMPT: &str = "You are a quiz generator. \
Output ONLY valid JSON. \
Do not include markdown formatting (like ```json), introductions, or explanations.";

pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Answer `query` from `context`, continuing the conversation in `history`.
    pub async fn chat(
        &self,
        context: &str,
        query: &str,
        history: &[ChatTurn],
    ) -> Result<String, LlmError> {
        let messages = chat_messages(context, query, history);
        debug!(messages = messages.len(), context_chars = context.len(), "sending chat");
        self.model.chat(&messages).await
    }

    pub async fn generate_flashcards(&self, context: &str) -> Result<Parsed<Flashcard>, LlmError> {
        let raw = self
            .model
            .generate(FLASHCARD_SYSTEM_PROMPT, &flashcard_prompt(context))
            .await?;
        let parsed = parse_flashcards(&raw);
        log_parse_outcome("flashcards", &parsed);
        Ok(parsed)
    }

    pub async fn generate_quiz(&self, context: &str) -> Result<Parsed<QuizItem>, LlmError> {
        let raw = self
            .model
            .generate(QUIZ_SYSTEM_PROMPT, &quiz_prompt(context))
            .await?;
        let parsed = parse_quiz(&raw);
        log_parse_outcome("quiz", &parsed);
        Ok(parsed)
    }
}

fn chat_messages(context: &str, query: &str, history: &[ChatTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::new(Role::System, CHAT_SYSTEM_PROMPT));
    messages.extend(
        history
            .iter()
            .map(|turn| ChatMessage::new(turn.role, turn.content.clone())),
    );
    messages.push(ChatMessage::new(
        Role::User,
        format!(
            "Context from notes:\n{}\n\nQuestion: {}\nAnswer:",
            context, query
        ),
    ));
    messages
}

fn flashcard_prompt(context: &str) -> String {
    format!(
        "Based on the following text, generate 3 study flashcards.\n\
         Format strictly as a JSON array of objects: \
         [{{\"front\": \"question\", \"back\": \"answer\"}}, ...]\n\n\
         Text: {}",
        context
    )
}

fn quiz_prompt(context: &str) -> String {
    format!(
        "Generate 3 multiple choice questions based on this text.\n\
         Format strictly as a JSON array:\n\
         [{{\"question\": \"...\", \"options\": [\"A\", \"B\", \"C\", \"D\"], \"correct_answer\": \"A\"}}, ...]\n\n\
         Text: {}",
        context
    )
}

fn log_parse_outcome<T>(kind: &str, parsed: &Parsed<T>) {
    match parsed {
        Parsed::Complete(items) => debug!(kind, items = items.len(), "parsed model output"),
        Parsed::Partial { items, rejected } => warn!(
            kind,
            items = items.len(),
            rejected,
            "dropped invalid items from model output"
        ),
        Parsed::Unparseable { reason } => warn!(kind, reason = %reason, "model output unparseable"),
    }
}
