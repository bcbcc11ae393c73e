//! Parsing of model-generated flashcards and quizzes.
//!
//! The model is asked for a bare JSON array but routinely wraps it in a
//! Markdown fence or surrounds it with prose. The parser tries each balanced
//! `[ ... ]` in turn (ignoring brackets inside string literals) until one
//! yields a valid element, and validates every element on its own so one bad
//! item does not discard the rest.

use serde_json::Value;

use crate::models::{Flashcard, QuizItem};

/// Outcome of parsing untrusted model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    /// Every element was valid.
    Complete(Vec<T>),
    /// Some elements were dropped; `items` is non-empty.
    Partial { items: Vec<T>, rejected: usize },
    /// No array, invalid JSON, or no valid element.
    Unparseable { reason: String },
}

impl<T> Parsed<T> {
    pub fn into_items(self) -> Option<Vec<T>> {
        match self {
            Parsed::Complete(items) | Parsed::Partial { items, .. } => Some(items),
            Parsed::Unparseable { .. } => None,
        }
    }

    pub fn is_unparseable(&self) -> bool {
        matches!(self, Parsed::Unparseable { .. })
    }
}

pub const PLACEHOLDER_FRONT: &str = "Could not generate flashcards";
pub const PLACEHOLDER_BACK: &str =
    "The model's response could not be read as flashcards. Please try again.";

/// Remove Markdown code fence lines (```` ``` ```` / ```` ```json ````).
fn strip_code_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The first balanced JSON array in `raw`, if any.
pub fn extract_json_array(raw: &str) -> Option<&str> {
    balanced_array_at(raw, raw.find('[')?)
}

/// The balanced array opening at byte `start`, which must be a `[`.
fn balanced_array_at(raw: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Validate one candidate array, or say why it is not the payload.
fn parse_candidate<T>(array: &str, element: &impl Fn(&Value) -> Option<T>) -> Parsed<T> {
    let values: Vec<Value> = match serde_json::from_str(array) {
        Ok(values) => values,
        Err(e) => {
            return Parsed::Unparseable {
                reason: format!("invalid JSON: {}", e),
            }
        }
    };

    let total = values.len();
    let items: Vec<T> = values.iter().filter_map(element).collect();
    if items.is_empty() {
        return Parsed::Unparseable {
            reason: format!("none of {} elements were valid", total),
        };
    }
    if items.len() == total {
        Parsed::Complete(items)
    } else {
        Parsed::Partial {
            rejected: total - items.len(),
            items,
        }
    }
}

/// Tries every `[` in order, so bracketed prose ahead of the payload
/// ("options [A-D]") does not hide it. The first candidate's failure is
/// reported when none succeeds.
fn parse_array<T>(raw: &str, element: impl Fn(&Value) -> Option<T>) -> Parsed<T> {
    let cleaned = strip_code_fences(raw);
    let mut first_failure = None;

    for (start, _) in cleaned.match_indices('[') {
        let Some(array) = balanced_array_at(&cleaned, start) else {
            continue;
        };
        match parse_candidate(array, &element) {
            Parsed::Unparseable { reason } => {
                first_failure.get_or_insert(reason);
            }
            parsed => return parsed,
        }
    }

    Parsed::Unparseable {
        reason: first_failure.unwrap_or_else(|| "no JSON array in model output".to_string()),
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn flashcard(value: &Value) -> Option<Flashcard> {
    Some(Flashcard {
        front: non_empty_str(value, "front")?.to_string(),
        back: non_empty_str(value, "back")?.to_string(),
    })
}

fn quiz_item(value: &Value) -> Option<QuizItem> {
    let question = non_empty_str(value, "question")?.to_string();
    let options: Vec<String> = value
        .get("options")?
        .as_array()?
        .iter()
        .map(|o| o.as_str().map(|s| s.trim().to_string()))
        .collect::<Option<_>>()?;
    if options.len() < 2 || options.iter().any(String::is_empty) {
        return None;
    }

    let answer = non_empty_str(value, "correct_answer")?;
    let correct_answer = if options.iter().any(|o| o == answer) {
        answer.to_string()
    } else {
        // "B" meaning the second option.
        let mut chars = answer.chars();
        let letter = match (chars.next(), chars.next()) {
            (Some(c), None) => c.to_ascii_uppercase(),
            _ => return None,
        };
        if !('A'..='D').contains(&letter) {
            return None;
        }
        options.get((letter as u8 - b'A') as usize)?.clone()
    };

    Some(QuizItem {
        question,
        options,
        correct_answer,
    })
}

pub fn parse_flashcards(raw: &str) -> Parsed<Flashcard> {
    parse_array(raw, flashcard)
}

pub fn parse_quiz(raw: &str) -> Parsed<QuizItem> {
    parse_array(raw, quiz_item)
}

/// The parsed cards, or a single placeholder card when nothing was usable.
pub fn flashcards_or_placeholder(parsed: Parsed<Flashcard>) -> Vec<Flashcard> {
    parsed.into_items().unwrap_or_else(|| {
        vec![Flashcard {
            front: PLACEHOLDER_FRONT.to_string(),
            back: PLACEHOLDER_BACK.to_string(),
        }]
    })
}

pub fn quiz_or_empty(parsed: Parsed<QuizItem>) -> Vec<QuizItem> {
    parsed.into_items().unwrap_or_default()
}
