use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::llm::Usage;
use crate::record::Record;
use crate::schema::{self, ExtractionSchema};
use crate::search::SourceMap;
use crate::target::ResearchTarget;

/// One entry of the execution trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    QueryWriter,
    WebSearch,
    ProfileFinder,
    NoteTaker,
    NoteReviewer,
}

/// Token counts per model id. Only ever added to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenUsage(BTreeMap<String, Usage>);

impl TokenUsage {
    pub fn record(&mut self, model_id: &str, usage: Usage) {
        *self.0.entry(model_id.to_string()).or_default() += usage;
    }

    pub fn get(&self, model_id: &str) -> Option<Usage> {
        self.0.get(model_id).copied()
    }

    pub fn total(&self) -> Usage {
        let mut total = Usage::default();
        for usage in self.0.values() {
            total += *usage;
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything a session knows, threaded through every stage and saved
/// whole at each checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationState {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub target: ResearchTarget,
    pub schema: ExtractionSchema,
    /// Completed review rounds.
    pub iteration: usize,
    pub notes: Record,
    pub accumulated: Record,
    pub search_focus: Vec<String>,
    pub is_review_successful: bool,
    pub unique_sources: SourceMap,
    pub steps: Vec<Step>,
    pub token_usage: TokenUsage,
}

impl IterationState {
    pub fn new(target: ResearchTarget) -> Self {
        let schema = schema::for_kind(target.kind()).clone();
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            target,
            schema,
            iteration: 0,
            notes: Record::new(),
            accumulated: Record::new(),
            search_focus: Vec::new(),
            is_review_successful: false,
            unique_sources: SourceMap::new(),
            steps: Vec::new(),
            token_usage: TokenUsage::default(),
        }
    }

    pub fn record_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn record_usage(&mut self, model_id: &str, usage: Usage) {
        self.token_usage.record(model_id, usage);
    }

    pub fn review_rounds(&self) -> usize {
        self.steps.iter().filter(|s| **s == Step::NoteReviewer).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_usage_accumulates_per_model() {
        let mut usage = TokenUsage::default();
        usage.record("language", Usage::new(100, 10));
        usage.record("reasoning", Usage::new(50, 5));
        usage.record("language", Usage::new(1, 1));

        assert_eq!(usage.get("language"), Some(Usage::new(101, 11)));
        assert_eq!(usage.total(), Usage::new(151, 16));
        assert_eq!(
            serde_json::to_value(&usage).unwrap(),
            json!({
                "language": { "input_tokens": 101, "output_tokens": 11 },
                "reasoning": { "input_tokens": 50, "output_tokens": 5 }
            })
        );
    }

    #[test]
    fn new_state_uses_the_kind_schema() {
        let state = IterationState::new(ResearchTarget::company("Acme"));
        assert_eq!(state.schema.title, "CompanyInfo");
        assert_eq!(state.iteration, 0);
        assert!(state.search_focus.is_empty());
        assert!(!state.is_review_successful);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = IterationState::new(ResearchTarget::person("Jane Roe").with_email("jane@acme.io"));
        state.record_step(Step::QueryWriter);
        state.record_step(Step::NoteReviewer);
        state.search_focus = vec!["role".to_string()];

        let json = serde_json::to_string(&state).unwrap();
        let back: IterationState = serde_json::from_str(&json).unwrap();

        assert_eq!(back.session_id, state.session_id);
        assert_eq!(back.target, state.target);
        assert_eq!(back.steps, vec![Step::QueryWriter, Step::NoteReviewer]);
        assert_eq!(back.review_rounds(), 1);
        assert!(json.contains("\"note_reviewer\""));
    }
}
