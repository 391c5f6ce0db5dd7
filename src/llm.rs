//! The text-generation seam: anything that turns a prompt (optionally
//! constrained by a JSON schema) into text and reports its token usage.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::ops::AddAssign;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::GenerationError;

/// Attempts made by [`generate_structured`] before malformed output becomes
/// a hard failure.
pub const MAX_PARSE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self { input_tokens, output_tokens }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub usage: Usage,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Stable identifier token usage is recorded under.
    fn model_id(&self) -> &str;

    async fn generate(&self, prompt: &str, schema: Option<&Value>) -> Result<Generation, GenerationError>;
}

/// Generates and deserializes a JSON response.
///
/// Responses that are not valid JSON for `T` are retried up to
/// [`MAX_PARSE_ATTEMPTS`] times. The returned usage covers every attempt,
/// failed ones included.
pub async fn generate_structured<T>(
    generator: &dyn TextGenerator,
    prompt: &str,
    schema: &Value,
) -> Result<(T, Usage), GenerationError>
where
    T: DeserializeOwned,
{
    generate_validated(generator, prompt, schema, Ok).await
}

/// Like [`generate_structured`], but also runs `validate` on each parsed
/// response. A response that parses but breaks the contract
/// (`SchemaViolation`, `QueryCount`) is re-asked like malformed JSON.
pub async fn generate_validated<T, U, F>(
    generator: &dyn TextGenerator,
    prompt: &str,
    schema: &Value,
    validate: F,
) -> Result<(U, Usage), GenerationError>
where
    T: DeserializeOwned,
    F: Fn(T) -> Result<U, GenerationError>,
{
    let mut usage = Usage::default();
    let mut last_error = None;

    for attempt in 1..=MAX_PARSE_ATTEMPTS {
        let generation = generator.generate(prompt, Some(schema)).await?;
        usage += generation.usage;

        match parse_json::<T>(&generation.text).and_then(&validate) {
            Ok(value) => return Ok((value, usage)),
            Err(err) if is_contract_violation(&err) => {
                warn!(
                    model = generator.model_id(),
                    attempt,
                    max_attempts = MAX_PARSE_ATTEMPTS,
                    error = %err,
                    "structured response rejected"
                );
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error.unwrap_or_else(|| GenerationError::MalformedJson("no attempts made".to_string())))
}

/// Output the model can get right on another try.
pub fn is_contract_violation(error: &GenerationError) -> bool {
    matches!(
        error,
        GenerationError::MalformedJson(_) | GenerationError::SchemaViolation(_) | GenerationError::QueryCount { .. }
    )
}

/// Parses `text` as `T`, falling back to the first balanced JSON object
/// embedded in it (models like to wrap JSON in prose or code fences).
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, GenerationError> {
    match serde_json::from_str::<T>(text.trim()) {
        Ok(value) => Ok(value),
        Err(first) => {
            let Some(extracted) = extract_json_object(text) else {
                return Err(GenerationError::MalformedJson(first.to_string()));
            };
            serde_json::from_str::<T>(&extracted).map_err(|e| GenerationError::MalformedJson(e.to_string()))
        }
    }
}

/// Returns the first balanced `{...}` in `text`, honouring string literals.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;

    for (offset, ch) in text[start..].char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Transport hiccups and overloaded servers are worth another try; bad
/// requests and malformed output are not.
pub fn is_retryable(error: &GenerationError) -> bool {
    match error {
        GenerationError::Transport(_) => true,
        GenerationError::Status { status, .. } => is_retryable_status(*status),
        GenerationError::MalformedJson(_)
        | GenerationError::SchemaViolation(_)
        | GenerationError::QueryCount { .. } => false,
    }
}

fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    if current >= config.max_delay {
        return config.max_delay;
    }
    let multiplier = config.backoff_multiplier.max(1.0) as f64;
    Duration::from_secs_f64(current.as_secs_f64() * multiplier).min(config.max_delay)
}

pub async fn execute_with_retry<T, Op, Fut>(config: &RetryConfig, mut operation: Op) -> Result<T, GenerationError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    if !config.enabled {
        return operation().await;
    }

    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_retries && is_retryable(&err) => {
                attempt += 1;
                debug!(attempt, max_retries = config.max_retries, delay_ms = delay.as_millis() as u64, error = %err, "retrying generation request");
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, config);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Deserialize)]
    struct Answer {
        result: String,
    }

    #[test]
    fn extracts_object_wrapped_in_prose() {
        let text = "Sure! ```json\n{\"result\": \"YES\", \"note\": \"a } in a string\"}\n``` done";
        let extracted = extract_json_object(text).unwrap();
        assert_eq!(extracted, "{\"result\": \"YES\", \"note\": \"a } in a string\"}");
    }

    #[test]
    fn extract_handles_nesting_and_unbalanced_input() {
        assert_eq!(extract_json_object("x {\"a\": {\"b\": 1}} y").unwrap(), "{\"a\": {\"b\": 1}}");
        assert!(extract_json_object("{\"a\": 1").is_none());
        assert!(extract_json_object("no json here").is_none());
    }

    #[test]
    fn parse_json_reports_malformed_output() {
        let err = parse_json::<Answer>("definitely not json").unwrap_err();
        assert!(matches!(err, GenerationError::MalformedJson(_)));
    }

    #[tokio::test]
    async fn structured_generation_retries_malformed_output() {
        let generator = ScriptedGenerator::new("lang")
            .with_usage(Usage::new(10, 2))
            .reply("oops, no json")
            .reply_json(json!({ "result": "YES" }));

        let (answer, usage) = generate_structured::<Answer>(&generator, "prompt", &json!({}))
            .await
            .unwrap();
        assert_eq!(answer.result, "YES");
        assert_eq!(usage, Usage::new(20, 4));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn structured_generation_gives_up_after_max_attempts() {
        let mut generator = ScriptedGenerator::new("lang");
        for _ in 0..MAX_PARSE_ATTEMPTS {
            generator = generator.reply("[]");
        }

        let answer = generate_structured::<Answer>(&generator, "prompt", &json!({})).await;
        assert!(matches!(answer, Err(GenerationError::MalformedJson(_))));
        assert_eq!(generator.calls(), MAX_PARSE_ATTEMPTS);
    }

    #[tokio::test]
    async fn validated_generation_re_asks_after_contract_violation() {
        let generator = ScriptedGenerator::new("lang")
            .with_usage(Usage::new(7, 1))
            .reply_json(json!({ "result": "MAYBE" }))
            .reply_json(json!({ "result": "NO" }));

        let (answer, usage) = generate_validated(&generator, "prompt", &json!({}), |a: Answer| {
            match a.result.as_str() {
                "YES" | "NO" => Ok(a.result),
                other => Err(GenerationError::SchemaViolation(format!("bad result {other}"))),
            }
        })
        .await
        .unwrap();

        assert_eq!(answer, "NO");
        assert_eq!(usage, Usage::new(14, 2));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn validated_generation_does_not_re_ask_transport_failures() {
        let generator = ScriptedGenerator::new("lang")
            .fail(GenerationError::Status { status: 400, body: "bad".into() })
            .reply_json(json!({ "result": "YES" }));

        let answer = generate_validated(&generator, "prompt", &json!({}), |a: Answer| Ok(a)).await;
        assert!(matches!(answer, Err(GenerationError::Status { status: 400, .. })));
        assert_eq!(generator.calls(), 1);
    }

    #[test]
    fn disabled_retry_config_is_off() {
        assert!(!RetryConfig::disabled().enabled);
        assert!(RetryConfig::default().enabled);
    }

    #[tokio::test]
    async fn retry_recovers_from_rate_limits() {
        let config = RetryConfig::default()
            .with_max_retries(2)
            .with_initial_delay(Duration::ZERO)
            .with_max_delay(Duration::ZERO);
        let attempts = Arc::new(AtomicU32::new(0));

        let result = execute_with_retry(&config, || {
            let attempts = Arc::clone(&attempts);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(GenerationError::Status { status: 429, body: "slow down".into() });
                }
                Ok("ok")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_stops_on_client_errors() {
        let config = RetryConfig::default().with_initial_delay(Duration::ZERO);
        let attempts = Arc::new(AtomicU32::new(0));

        let result = execute_with_retry(&config, || {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GenerationError::Status { status: 400, body: "bad".into() })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(1));
        let delay = next_delay(Duration::from_millis(800), &config);
        assert_eq!(delay, Duration::from_secs(1));
    }
}
