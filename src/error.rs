use thiserror::Error;

/// Failures of the text-generation collaborator, including responses that
/// do not honour the requested shape.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("model API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("malformed JSON from model: {0}")]
    MalformedJson(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("expected {expected} search queries, model produced {actual}")]
    QueryCount { expected: usize, actual: usize },
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search transport error: {0}")]
    Transport(String),

    #[error("search API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("all {0} search queries failed")]
    AllQueriesFailed(usize),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        SearchError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("search failed: {0}")]
    Search(#[from] SearchError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ResearchError>;
