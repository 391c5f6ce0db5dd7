pub mod checkpoint;
pub mod config;
pub mod error;
pub mod llm;
pub mod note_reviewer;
pub mod note_taker;
pub mod ollama;
pub mod profile_finder;
pub mod prompts;
pub mod query_writer;
pub mod record;
pub mod research;
pub mod schema;
pub mod search;
pub mod state;
pub mod target;

#[cfg(test)]
mod testing;

pub use config::{Config, RunConfig};
pub use error::{GenerationError, ResearchError, Result, SearchError};
pub use llm::{TextGenerator, Usage};
pub use record::Record;
pub use research::{Outcome, ResearchProgress, ResearchReport, Researcher};
pub use search::{SourceMap, SourceRecord, WebSearch};
pub use state::{IterationState, Step, TokenUsage};
pub use target::{ResearchTarget, TargetKind};
