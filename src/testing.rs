//! Scripted stand-ins for the generation and search collaborators.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{GenerationError, SearchError};
use crate::llm::{Generation, TextGenerator, Usage};
use crate::search::{SearchOptions, SourceMap, SourceRecord, WebSearch};

/// Replays canned responses in order and records every prompt it sees.
pub struct ScriptedGenerator {
    model_id: String,
    usage: Usage,
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    prompts: Mutex<Vec<String>>,
    cancel: Option<CancellationToken>,
}

impl ScriptedGenerator {
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
            usage: Usage::default(),
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            cancel: None,
        }
    }

    /// Fires `token` from inside every call, as an interrupt arriving
    /// mid-stage would.
    pub fn cancel_on_call(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Usage reported for every call.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn reply(self, text: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn reply_json(self, value: Value) -> Self {
        self.script.lock().unwrap().push_back(Ok(value.to_string()));
        self
    }

    pub fn fail(self, error: GenerationError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, prompt: &str, _schema: Option<&Value>) -> Result<Generation, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(token) = &self.cancel {
            token.cancel();
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(Generation { text, usage: self.usage }),
            Some(Err(err)) => Err(err),
            None => Err(GenerationError::Transport(format!("{}: script exhausted", self.model_id))),
        }
    }
}

/// Returns one batch per call, then empty maps once the batches run out.
pub struct StaticSearch {
    batches: Mutex<VecDeque<Result<SourceMap, SearchError>>>,
    queries: Mutex<Vec<Vec<String>>>,
}

impl StaticSearch {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn batch(self, sources: Vec<SourceRecord>) -> Self {
        self.batches
            .lock()
            .unwrap()
            .push_back(Ok(sources.into_iter().collect()));
        self
    }

    pub fn fail(self, error: SearchError) -> Self {
        self.batches.lock().unwrap().push_back(Err(error));
        self
    }

    /// Query lists received, one entry per call.
    pub fn queries(&self) -> Vec<Vec<String>> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearch for StaticSearch {
    async fn search(&self, queries: &[String], _options: &SearchOptions) -> Result<SourceMap, SearchError> {
        self.queries.lock().unwrap().push(queries.to_vec());
        let next = self.batches.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(SourceMap::new()))
    }
}
