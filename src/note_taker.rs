use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::error::GenerationError;
use crate::llm::{generate_validated, TextGenerator};
use crate::prompts;
use crate::state::{IterationState, Step};

/// Turns a pass's sources into a schema-shaped record.
///
/// The first pass runs on the language model; refinement passes switch to
/// the reasoning model.
pub struct NoteTaker {
    language: Arc<dyn TextGenerator>,
    reasoning: Arc<dyn TextGenerator>,
}

impl NoteTaker {
    pub fn new(language: Arc<dyn TextGenerator>, reasoning: Arc<dyn TextGenerator>) -> Self {
        Self { language, reasoning }
    }

    fn generator_for(&self, iteration: usize) -> &dyn TextGenerator {
        if iteration == 0 {
            self.language.as_ref()
        } else {
            self.reasoning.as_ref()
        }
    }

    /// Replaces `state.notes` with a record holding every schema field.
    pub async fn run(&self, state: &mut IterationState, sources: &str) -> Result<(), GenerationError> {
        state.record_step(Step::NoteTaker);

        let json_schema = state.schema.to_json_schema();
        let schema_json =
            serde_json::to_string_pretty(&json_schema).map_err(|e| GenerationError::MalformedJson(e.to_string()))?;
        let today = Utc::now().date_naive().to_string();
        let prompt = prompts::note_taking(
            state.target.kind(),
            &state.target.info_lines(),
            sources,
            &schema_json,
            &state.search_focus,
            &today,
        );

        let generator = self.generator_for(state.iteration);
        let schema = &state.schema;
        let (notes, usage) =
            generate_validated(generator, &prompt, &json_schema, |raw: Value| schema.conform(raw)).await?;
        state.record_usage(generator.model_id(), usage);

        state.notes = notes;
        info!(
            iteration = state.iteration,
            model = generator.model_id(),
            fields = state.notes.len(),
            "took notes"
        );
        Ok(())
    }
}
