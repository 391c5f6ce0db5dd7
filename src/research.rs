//! The research loop: write queries, search, (verify profiles), take notes,
//! review, and repeat on whatever is still missing until the record is
//! complete or the iteration budget is spent.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::config::RunConfig;
use crate::error::Result;
use crate::llm::TextGenerator;
use crate::note_reviewer::NoteReviewer;
use crate::note_taker::NoteTaker;
use crate::profile_finder::ProfileFinder;
use crate::query_writer::QueryWriter;
use crate::record::Record;
use crate::search::{format_sources, SourceMap, WebSearch};
use crate::state::{IterationState, Step, TokenUsage};
use crate::target::ResearchTarget;

#[derive(Debug, Clone, PartialEq)]
pub enum ResearchProgress {
    Started(Uuid),
    WritingQueries(usize, usize), // current iteration, max iterations
    Searching(usize),             // number of queries
    VerifyingProfiles(usize),     // sources in the batch
    TakingNotes(usize),           // sources in the batch
    Reviewing,
    Refining(Vec<String>), // fields still missing
    Completed(Outcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The reviewer found nothing missing.
    Satisfied,
    /// The iteration budget ran out first; the content is best effort.
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub session_id: Uuid,
    pub target: ResearchTarget,
    pub content: Record,
    pub token_usage: TokenUsage,
    pub steps: Vec<Step>,
    pub iterations: usize,
    pub outcome: Outcome,
}

impl ResearchReport {
    fn from_state(state: IterationState, outcome: Outcome) -> Self {
        Self {
            session_id: state.session_id,
            target: state.target,
            content: state.accumulated,
            token_usage: state.token_usage,
            steps: state.steps,
            iterations: state.iteration,
            outcome,
        }
    }
}

enum Pass {
    Reviewed,
    Cancelled,
}

pub struct Researcher {
    config: RunConfig,
    search: Arc<dyn WebSearch>,
    query_writer: QueryWriter,
    profile_finder: ProfileFinder,
    note_taker: NoteTaker,
    note_reviewer: NoteReviewer,
    checkpoints: Option<Arc<CheckpointStore>>,
    progress_tx: Option<mpsc::UnboundedSender<ResearchProgress>>,
}

impl Researcher {
    /// `language` writes queries, checks profiles and takes the first
    /// pass's notes; `reasoning` takes later notes and runs every review.
    pub fn new(
        language: Arc<dyn TextGenerator>,
        reasoning: Arc<dyn TextGenerator>,
        search: Arc<dyn WebSearch>,
        config: RunConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            query_writer: QueryWriter::new(language.clone(), config.number_of_queries),
            profile_finder: ProfileFinder::new(language.clone()),
            note_taker: NoteTaker::new(language, reasoning.clone()),
            note_reviewer: NoteReviewer::new(reasoning),
            search,
            config,
            checkpoints: None,
            progress_tx: None,
        })
    }

    pub fn set_checkpoint_store(&mut self, store: Arc<CheckpointStore>) {
        self.checkpoints = Some(store);
    }

    pub fn set_progress_channel(&mut self, tx: mpsc::UnboundedSender<ResearchProgress>) {
        self.progress_tx = Some(tx);
    }

    fn send_progress(&self, progress: ResearchProgress) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(progress);
        }
    }

    /// Starts a fresh session for `target`.
    pub async fn run(&self, target: ResearchTarget, cancel: &CancellationToken) -> Result<ResearchReport> {
        self.resume(IterationState::new(target), cancel).await
    }

    /// Continues a session from a saved state. A state that is already
    /// satisfied or out of budget finishes without another pass.
    pub async fn resume(&self, mut state: IterationState, cancel: &CancellationToken) -> Result<ResearchReport> {
        info!(
            session = %state.session_id,
            kind = %state.target.kind(),
            name = state.target.name(),
            iteration = state.iteration,
            max_iterations = self.config.max_iterations,
            "research session started"
        );
        self.send_progress(ResearchProgress::Started(state.session_id));

        let outcome = loop {
            if state.is_review_successful {
                break Outcome::Satisfied;
            }
            if state.iteration >= self.config.max_iterations {
                break Outcome::Exhausted;
            }
            if !state.search_focus.is_empty() {
                self.send_progress(ResearchProgress::Refining(state.search_focus.clone()));
            }

            match self.pass(&mut state, cancel).await? {
                Pass::Reviewed => self.checkpoint(&state),
                Pass::Cancelled => break Outcome::Cancelled,
            }
        };

        info!(
            session = %state.session_id,
            outcome = ?outcome,
            iterations = state.iteration,
            sources = state.unique_sources.len(),
            "research session finished"
        );
        self.send_progress(ResearchProgress::Completed(outcome));
        Ok(ResearchReport::from_state(state, outcome))
    }

    /// One query-search-extract-review round. Stops early, leaving the
    /// accumulated record as it was, when `cancel` fires between stages.
    async fn pass(&self, state: &mut IterationState, cancel: &CancellationToken) -> Result<Pass> {
        if cancel.is_cancelled() {
            return Ok(Pass::Cancelled);
        }
        self.send_progress(ResearchProgress::WritingQueries(state.iteration + 1, self.config.max_iterations));
        let queries: Vec<String> = self
            .query_writer
            .run(state)
            .await?
            .into_iter()
            .map(|q| q.query)
            .collect();

        if cancel.is_cancelled() {
            return Ok(Pass::Cancelled);
        }
        self.send_progress(ResearchProgress::Searching(queries.len()));
        let batch = self.retrieve(state, &queries).await;

        let batch = if self.config.verify_profiles {
            if cancel.is_cancelled() {
                return Ok(Pass::Cancelled);
            }
            self.send_progress(ResearchProgress::VerifyingProfiles(batch.len()));
            self.profile_finder.run(state, batch).await?
        } else {
            batch
        };

        let sources = format_sources(
            &batch,
            self.config.max_tokens_per_source,
            self.config.include_raw_content,
        );
        let batch_len = batch.len();
        state.unique_sources.merge(batch);

        if cancel.is_cancelled() {
            return Ok(Pass::Cancelled);
        }
        self.send_progress(ResearchProgress::TakingNotes(batch_len));
        self.note_taker.run(state, &sources).await?;

        if cancel.is_cancelled() {
            return Ok(Pass::Cancelled);
        }
        let first_pass = state.iteration == 0;
        state.accumulated.merge_focus(&state.notes, &state.search_focus, first_pass);

        self.send_progress(ResearchProgress::Reviewing);
        self.note_reviewer.run(state).await?;
        Ok(Pass::Reviewed)
    }

    /// A failed search is not fatal: the pass goes on with no sources and
    /// the reviewer flags whatever that leaves empty.
    async fn retrieve(&self, state: &mut IterationState, queries: &[String]) -> SourceMap {
        state.record_step(Step::WebSearch);
        match self.search.search(queries, &self.config.search_options()).await {
            Ok(batch) => {
                info!(iteration = state.iteration, sources = batch.len(), "retrieved sources");
                batch
            }
            Err(e) => {
                warn!(iteration = state.iteration, error = %e, "web search failed, continuing without sources");
                SourceMap::new()
            }
        }
    }

    fn checkpoint(&self, state: &IterationState) {
        let Some(store) = &self.checkpoints else {
            return;
        };
        if let Err(e) = store.save(state) {
            warn!(session = %state.session_id, error = %e, "failed to save checkpoint");
        }
    }
}
