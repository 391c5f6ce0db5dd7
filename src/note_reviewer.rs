//! Completeness review of the accumulated record.
//!
//! The verdict combines two opinions: the reasoning model's, and a
//! mechanical scan for sentinels, placeholders and masked values. A field
//! either one flags is missing. From the second round on, only fields that
//! were already in focus can stay missing, so the focus never grows.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::GenerationError;
use crate::llm::{generate_structured, TextGenerator};
use crate::prompts;
use crate::record::Record;
use crate::schema::{is_sentinel_str, ExtractionSchema, NOT_AVAILABLE};
use crate::state::{IterationState, Step};
use crate::target::TargetKind;

const PLACEHOLDERS: &[&str] = &[
    "",
    "unknown",
    "n/a",
    "na",
    "none",
    "null",
    "nil",
    "tbd",
    "tba",
    "not found",
    "not available",
    "not specified",
    "not provided",
    "not disclosed",
    "-",
    "?",
];

static MASKED_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\*{3,}|•{3,}|\bx{3,}\b|\[(redacted|hidden|masked)\]|<(redacted|hidden)>)")
        .unwrap_or_else(|e| panic!("masked value pattern is invalid: {e}"))
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub is_satisfactory: bool,
    pub missing_fields: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
struct ReviewOutput {
    #[serde(default)]
    is_satisfactory: bool,
    #[serde(default)]
    missing_fields: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

fn review_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "is_satisfactory": { "type": "boolean" },
            "missing_fields": { "type": "array", "items": { "type": "string" } },
            "reasoning": { "type": "string" }
        },
        "required": ["is_satisfactory", "missing_fields", "reasoning"]
    })
}

fn is_placeholder(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    PLACEHOLDERS.contains(&normalized.as_str()) || is_sentinel_str(&normalized) || MASKED_VALUE.is_match(text)
}

fn is_gap(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => is_placeholder(s),
        Some(Value::Array(items)) => items.iter().all(|item| match item {
            Value::String(s) => is_placeholder(s),
            Value::Null => true,
            _ => false,
        }),
        Some(_) => false,
    }
}

/// Fields of `schema` that hold no usable value in `record`, in schema order.
pub fn scan_gaps(schema: &ExtractionSchema, record: &Record) -> Vec<String> {
    schema
        .fields
        .iter()
        .filter(|f| is_gap(record.get(&f.name)))
        .map(|f| f.name.clone())
        .collect()
}

/// Replaces a profile URL that does not point at the kind's profile path
/// with the sentinel. Returns true when the record was changed.
pub fn normalize_profile_url(kind: TargetKind, record: &mut Record) -> bool {
    let field = kind.profile_field();
    let Some(Value::String(url)) = record.get(field) else {
        return false;
    };
    if is_sentinel_str(url) || kind.is_profile_url(url) {
        return false;
    }

    warn!(field, url = %url, "discarding profile URL outside {}", kind.profile_path());
    record.set(field, Value::String(NOT_AVAILABLE.to_string()));
    true
}

/// Combines the model's missing fields with the mechanical scan.
///
/// The result holds schema fields only, in schema order. With a
/// `previous_focus` it is further limited to fields in that focus.
pub fn combine_missing(
    schema: &ExtractionSchema,
    from_model: &[String],
    from_scan: &[String],
    previous_focus: Option<&[String]>,
) -> Vec<String> {
    let union: Vec<&String> = from_model.iter().chain(from_scan.iter()).collect();
    let mut missing = schema.canonical_fields(union);
    if let Some(focus) = previous_focus {
        missing.retain(|field| focus.contains(field));
    }
    missing
}

pub struct NoteReviewer {
    generator: Arc<dyn TextGenerator>,
}

impl NoteReviewer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Reviews `state.accumulated`, sets the verdict fields on the state and
    /// completes the round.
    pub async fn run(&self, state: &mut IterationState) -> Result<ReviewVerdict, GenerationError> {
        state.record_step(Step::NoteReviewer);

        let kind = state.target.kind();
        normalize_profile_url(kind, &mut state.accumulated);

        let json_schema = state.schema.to_json_schema();
        let schema_json =
            serde_json::to_string_pretty(&json_schema).map_err(|e| GenerationError::MalformedJson(e.to_string()))?;
        let info_json = serde_json::to_string_pretty(&state.accumulated)
            .map_err(|e| GenerationError::MalformedJson(e.to_string()))?;
        let today = Utc::now().date_naive().to_string();
        let prompt = prompts::review(kind, &schema_json, &info_json, &state.search_focus, &today);

        let (output, usage) =
            generate_structured::<ReviewOutput>(self.generator.as_ref(), &prompt, &review_schema()).await?;
        state.record_usage(self.generator.model_id(), usage);

        let gaps = scan_gaps(&state.schema, &state.accumulated);
        let previous_focus = (state.iteration >= 1).then_some(state.search_focus.as_slice());
        let missing = combine_missing(&state.schema, &output.missing_fields, &gaps, previous_focus);

        if output.is_satisfactory && !missing.is_empty() {
            warn!(missing = ?missing, "model accepted a record with gaps");
        } else if !output.is_satisfactory && missing.is_empty() {
            warn!(reasoning = %output.reasoning, "model rejected a record without naming usable fields");
        }

        let verdict = ReviewVerdict {
            is_satisfactory: missing.is_empty(),
            missing_fields: missing,
            reasoning: output.reasoning,
        };

        state.is_review_successful = verdict.is_satisfactory;
        state.search_focus = verdict.missing_fields.clone();
        state.iteration += 1;

        info!(
            iteration = state.iteration,
            satisfied = verdict.is_satisfactory,
            missing = ?verdict.missing_fields,
            "reviewed notes"
        );
        Ok(verdict)
    }
}
