//! Structured payload extraction from free-form model output
//!
//! Models wrap JSON in prose, restate earlier drafts, or drop the outer
//! braces. [`normalize`] picks the authoritative candidate and repairs the
//! braces; [`extract`] then decodes it strictly.

use crate::error::{ExtractionError, ValidationError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json(.*?)```").expect("valid fence pattern"));

/// What a planner or replanner asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    /// Remaining steps, in order
    Steps(Vec<String>),
    /// Final answer to the user
    Response(String),
}

impl Payload {
    /// Canonical JSON object form, e.g. `{"steps":["a"]}`
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Deserialize)]
struct RawPayload {
    #[serde(default)]
    steps: Option<Vec<String>>,
    #[serde(default)]
    response: Option<String>,
}

/// Pick the candidate text and repair missing outer braces
///
/// The last ```` ```json ```` block wins; without one the whole text is the
/// candidate.
pub fn normalize(text: &str) -> String {
    let candidate = JSON_FENCE
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str())
        .trim();

    if candidate.is_empty() || candidate.starts_with('{') {
        candidate.to_string()
    } else {
        format!("{{{candidate}}}")
    }
}

/// Parse the normalized candidate as JSON
pub fn parse(text: &str) -> Result<Value, ExtractionError> {
    let candidate = normalize(text);
    if candidate.is_empty() {
        return Err(ExtractionError::Empty);
    }
    serde_json::from_str(&candidate).map_err(|e| ExtractionError::Malformed {
        reason: e.to_string(),
        candidate,
    })
}

/// Decode a parsed value into a [`Payload`]
///
/// `steps` is checked before `response`.
pub fn decode(value: Value) -> Result<Payload, ValidationError> {
    if !value.is_object() {
        return Err(ValidationError::Schema(format!(
            "expected a JSON object, got {value}"
        )));
    }
    let raw: RawPayload =
        serde_json::from_value(value).map_err(|e| ValidationError::Schema(e.to_string()))?;

    match (raw.steps, raw.response) {
        (Some(steps), _) => Ok(Payload::Steps(steps)),
        (None, Some(response)) => Ok(Payload::Response(response)),
        (None, None) => Err(ValidationError::Schema(
            "expected either a \"steps\" list or a \"response\" string".to_string(),
        )),
    }
}

/// Extract a [`Payload`] from raw model output
pub fn extract(text: &str) -> Result<Payload, ValidationError> {
    decode(parse(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_fenced_block_wins() {
        let text = "First try:\n```json\n{\"steps\": [\"old\"]}\n```\nCorrected:\n```json\n{\"steps\": [\"new\", \"plan\"]}\n```";
        assert_eq!(
            extract(text).unwrap(),
            Payload::Steps(vec!["new".to_string(), "plan".to_string()])
        );
    }

    #[test]
    fn test_missing_braces_are_repaired() {
        let text = "```json\n    \"steps\": [\"Perform the first task\",\n              \"Give the final answer\"]\n```";
        assert_eq!(
            extract(text).unwrap(),
            Payload::Steps(vec![
                "Perform the first task".to_string(),
                "Give the final answer".to_string()
            ])
        );
    }

    #[test]
    fn test_unfenced_response() {
        assert_eq!(
            extract("  {\"response\": \"X\"}  ").unwrap(),
            Payload::Response("X".to_string())
        );
        assert_eq!(
            extract("\"response\": \"X\"").unwrap(),
            Payload::Response("X".to_string())
        );
    }

    #[test]
    fn test_repair_is_idempotent() {
        let text = "Sure!\n```json\n\"response\": \"The capital of France is Paris.\"\n```";
        let repaired = normalize(text);
        assert_eq!(normalize(&repaired), repaired);
        assert_eq!(extract(&repaired).unwrap(), extract(text).unwrap());
    }

    #[test]
    fn test_not_json_is_an_extraction_error() {
        assert_eq!(normalize("not json at all"), "{not json at all}");
        let err = extract("not json at all").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Extraction(ExtractionError::Malformed { ref candidate, .. })
                if candidate == "{not json at all}"
        ));
    }

    #[test]
    fn test_empty_output() {
        assert_eq!(
            extract("   ").unwrap_err(),
            ValidationError::Extraction(ExtractionError::Empty)
        );
        assert_eq!(
            extract("```json\n```").unwrap_err(),
            ValidationError::Extraction(ExtractionError::Empty)
        );
    }

    #[test]
    fn test_shape_mismatch_is_a_validation_error() {
        assert!(matches!(
            extract("{\"steps\": \"just one\"}"),
            Err(ValidationError::Schema(_))
        ));
        assert!(matches!(
            extract("{\"answer\": \"X\"}"),
            Err(ValidationError::Schema(_))
        ));
        assert!(matches!(extract("[1, 2]"), Err(ValidationError::Extraction(_))));
    }

    #[test]
    fn test_steps_take_precedence() {
        assert_eq!(
            extract("{\"response\": \"done\", \"steps\": [\"more\"]}").unwrap(),
            Payload::Steps(vec!["more".to_string()])
        );
    }

    #[test]
    fn test_canonical_json() {
        let payload = Payload::Steps(vec!["a".to_string()]);
        assert_eq!(payload.to_json(), serde_json::json!({"steps": ["a"]}));
        assert_eq!(extract(&payload.to_json().to_string()).unwrap(), payload);
    }
}
