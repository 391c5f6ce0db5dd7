use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::GenerationError;
use crate::llm::{generate_structured, TextGenerator};
use crate::prompts;
use crate::search::SourceMap;
use crate::state::{IterationState, Step};

#[derive(Debug, Deserialize)]
struct ProfileAnswer {
    result: String,
}

/// Checks profile pages in a batch against the target and drops the ones
/// that belong to someone else. Other sources pass through untouched.
pub struct ProfileFinder {
    generator: Arc<dyn TextGenerator>,
}

impl ProfileFinder {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn run(&self, state: &mut IterationState, batch: SourceMap) -> Result<SourceMap, GenerationError> {
        state.record_step(Step::ProfileFinder);

        let kind = state.target.kind();
        let info_lines = state.target.info_lines();
        let schema = json!({
            "type": "object",
            "properties": { "result": { "type": "string", "enum": ["YES", "NO"] } },
            "required": ["result"]
        });

        let mut kept = SourceMap::new();
        let mut rejected = 0usize;
        for (url, source) in batch {
            if !kind.is_profile_url(&url) {
                kept.insert(source);
                continue;
            }

            let mut content = source.content.clone();
            if let Some(raw) = &source.raw_content {
                content.push('\n');
                content.push_str(raw);
            }
            let prompt = prompts::profile_check(kind, &info_lines, &url, &content);
            let (answer, usage) = generate_structured::<ProfileAnswer>(self.generator.as_ref(), &prompt, &schema).await?;
            state.record_usage(self.generator.model_id(), usage);

            if answer.result.trim().eq_ignore_ascii_case("yes") {
                kept.insert(source);
            } else {
                debug!(url = %url, "profile does not match target");
                rejected += 1;
            }
        }

        info!(kept = kept.len(), rejected, "verified profile sources");
        Ok(kept)
    }
}
