use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::GenerationError;
use crate::llm::{generate_validated, TextGenerator};
use crate::prompts;
use crate::schema::narrow;
use crate::state::{IterationState, Step};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub aspect: String,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Deserialize)]
struct QueryList {
    queries: Vec<SearchQuery>,
}

fn response_schema(number_of_queries: usize) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "queries": {
                "type": "array",
                "minItems": number_of_queries,
                "maxItems": number_of_queries,
                "items": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "aspect": { "type": "string" },
                        "rationale": { "type": "string" }
                    },
                    "required": ["query", "aspect", "rationale"]
                }
            }
        },
        "required": ["queries"]
    })
}

fn check_queries(queries: Vec<SearchQuery>, expected: usize) -> Result<Vec<SearchQuery>, GenerationError> {
    if queries.len() != expected {
        return Err(GenerationError::QueryCount { expected, actual: queries.len() });
    }
    if let Some(position) = queries.iter().position(|q| q.query.trim().is_empty()) {
        return Err(GenerationError::SchemaViolation(format!("search query {} is empty", position + 1)));
    }
    Ok(queries)
}

/// Writes the search queries for one pass, aimed at the fields still open.
pub struct QueryWriter {
    generator: Arc<dyn TextGenerator>,
    number_of_queries: usize,
}

impl QueryWriter {
    pub fn new(generator: Arc<dyn TextGenerator>, number_of_queries: usize) -> Self {
        Self { generator, number_of_queries }
    }

    /// Produces exactly `number_of_queries` non-empty queries, or fails.
    pub async fn run(&self, state: &mut IterationState) -> Result<Vec<SearchQuery>, GenerationError> {
        state.record_step(Step::QueryWriter);

        let schema = narrow(&state.schema, &state.search_focus);
        let schema_json = serde_json::to_string_pretty(&schema.to_json_schema())
            .map_err(|e| GenerationError::MalformedJson(e.to_string()))?;
        let prompt = prompts::query_writing(
            state.target.kind(),
            &state.target.info_lines(),
            &schema_json,
            self.number_of_queries,
        );

        let expected = self.number_of_queries;
        let (queries, usage) = generate_validated(
            self.generator.as_ref(),
            &prompt,
            &response_schema(expected),
            |list: QueryList| check_queries(list.queries, expected),
        )
        .await?;
        state.record_usage(self.generator.model_id(), usage);

        for query in &queries {
            debug!(query = %query.query, aspect = %query.aspect, "search query");
        }
        info!(
            iteration = state.iteration,
            count = queries.len(),
            focus = ?state.search_focus,
            "wrote search queries"
        );

        Ok(queries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Usage, MAX_PARSE_ATTEMPTS};
    use crate::target::ResearchTarget;
    use crate::testing::ScriptedGenerator;

    fn queries(n: usize) -> serde_json::Value {
        let items: Vec<_> = (0..n)
            .map(|i| json!({ "query": format!("acme query {i}"), "aspect": "overview", "rationale": "r" }))
            .collect();
        json!({ "queries": items })
    }

    #[tokio::test]
    async fn writes_exactly_n_queries_and_records_usage() {
        let generator = Arc::new(
            ScriptedGenerator::new("language")
                .with_usage(Usage::new(30, 8))
                .reply_json(queries(3)),
        );
        let writer = QueryWriter::new(generator.clone(), 3);
        let mut state = IterationState::new(ResearchTarget::company("Acme"));

        let written = writer.run(&mut state).await.unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(written[0].query, "acme query 0");
        assert_eq!(state.steps, vec![Step::QueryWriter]);
        assert_eq!(state.token_usage.get("language"), Some(Usage::new(30, 8)));
    }

    #[tokio::test]
    async fn wrong_count_is_re_asked() {
        let generator = Arc::new(
            ScriptedGenerator::new("language")
                .with_usage(Usage::new(30, 8))
                .reply_json(queries(2))
                .reply_json(queries(3)),
        );
        let writer = QueryWriter::new(generator.clone(), 3);
        let mut state = IterationState::new(ResearchTarget::company("Acme"));

        let written = writer.run(&mut state).await.unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(generator.calls(), 2);
        assert_eq!(state.token_usage.get("language"), Some(Usage::new(60, 16)));
    }

    #[tokio::test]
    async fn wrong_count_is_an_error_once_attempts_run_out() {
        let mut generator = ScriptedGenerator::new("language");
        for _ in 0..MAX_PARSE_ATTEMPTS {
            generator = generator.reply_json(queries(2));
        }
        let writer = QueryWriter::new(Arc::new(generator), 3);
        let mut state = IterationState::new(ResearchTarget::company("Acme"));

        let err = writer.run(&mut state).await.unwrap_err();
        assert!(matches!(err, GenerationError::QueryCount { expected: 3, actual: 2 }));
    }

    #[test]
    fn empty_query_is_a_violation() {
        let blank = vec![SearchQuery { query: "  ".into(), aspect: "a".into(), rationale: "r".into() }];
        assert!(matches!(check_queries(blank, 1), Err(GenerationError::SchemaViolation(_))));
    }

    #[tokio::test]
    async fn prompt_only_carries_focus_fields() {
        let generator = Arc::new(ScriptedGenerator::new("language").reply_json(queries(1)));
        let writer = QueryWriter::new(generator.clone(), 1);
        let mut state = IterationState::new(ResearchTarget::company("Acme"));
        state.search_focus = vec!["ceo".to_string()];

        writer.run(&mut state).await.unwrap();
        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("\"ceo\""));
        assert!(!prompt.contains("\"funding_summary\""));
    }
}
