use anyhow::{bail, Context};
use business_researcher::checkpoint::CheckpointStore;
use business_researcher::config::Config;
use business_researcher::llm::{RetryConfig, TextGenerator};
use business_researcher::ollama::OllamaClient;
use business_researcher::research::{ResearchProgress, Researcher};
use business_researcher::search::{TavilyClient, WebSearch};
use business_researcher::target::{ResearchTarget, TargetKind};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

/// Research a person or company on the web and print a structured record.
#[derive(Parser, Debug)]
#[command(name = "business-researcher", version)]
struct Args {
    /// person or company
    kind: Option<TargetKind>,

    /// Name of the person or company
    name: Option<String>,

    #[arg(long)]
    email: Option<String>,

    /// Current company (people only)
    #[arg(long)]
    company: Option<String>,

    /// Config file [default: ~/.config/business-researcher/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override research.max_iterations
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Continue a checkpointed session
    #[arg(long, conflicts_with_all = ["kind", "name"])]
    resume: Option<Uuid>,

    /// List recent checkpointed sessions and exit
    #[arg(long)]
    list: bool,

    /// Print progress to stderr
    #[arg(short, long)]
    progress: bool,
}

fn build_target(args: &Args) -> anyhow::Result<ResearchTarget> {
    let (Some(kind), Some(name)) = (args.kind, args.name.clone()) else {
        bail!("a target kind and name are required unless --resume or --list is given");
    };
    let mut target = match kind {
        TargetKind::Person => ResearchTarget::person(name),
        TargetKind::Company => ResearchTarget::company(name),
    };
    if let Some(email) = &args.email {
        target = target.with_email(email.clone());
    }
    if let Some(company) = &args.company {
        target = target.with_company(company.clone());
    }
    Ok(target)
}

fn describe(progress: &ResearchProgress) -> String {
    match progress {
        ResearchProgress::Started(id) => format!("session {id}"),
        ResearchProgress::WritingQueries(current, max) => format!("iteration {current}/{max}: writing queries"),
        ResearchProgress::Searching(n) => format!("searching the web ({n} queries)"),
        ResearchProgress::VerifyingProfiles(n) => format!("verifying profiles ({n} sources)"),
        ResearchProgress::TakingNotes(n) => format!("taking notes ({n} sources)"),
        ResearchProgress::Reviewing => "reviewing notes".to_string(),
        ResearchProgress::Refining(fields) => format!("refining: {}", fields.join(", ")),
        ResearchProgress::Completed(outcome) => format!("done ({outcome:?})"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let store = Arc::new(CheckpointStore::open(&Config::get_config_dir().join("checkpoints.sqlite"))?);

    if args.list {
        for entry in store.list(20)? {
            println!(
                "{}  {:<8} {:<30} {}",
                entry.session_id,
                entry.target_kind,
                entry.target_name,
                entry.updated_at.to_rfc3339()
            );
        }
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(Config::get_config_path);
    let config = Config::load_with(&config_path, args.max_iterations)?;

    let api_key = config
        .search
        .api_key
        .clone()
        .context("no Tavily API key: set TAVILY_API_KEY or add it to api_keys.toml")?;

    let retry = RetryConfig::default().with_max_retries(config.ollama.max_retries);
    let ollama = |model: &str, id: &str| -> Arc<dyn TextGenerator> {
        Arc::new(
            OllamaClient::with_config(config.ollama.host.clone(), model.to_string())
                .with_model_id(id)
                .with_temperature(config.ollama.temperature)
                .with_context_window(config.ollama.context_window)
                .with_retry(retry.clone()),
        )
    };
    let language = ollama(&config.ollama.language_model, &config.ollama.language_model);
    let reasoning = ollama(&config.ollama.reasoning_model, &config.ollama.reasoning_model);
    let search: Arc<dyn WebSearch> = Arc::new(TavilyClient::with_endpoint(config.search.endpoint.clone(), api_key));

    let mut researcher = Researcher::new(language, reasoning, search, config.research.clone())?;
    researcher.set_checkpoint_store(store.clone());

    if args.progress {
        let (tx, mut rx) = mpsc::unbounded_channel();
        researcher.set_progress_channel(tx);
        tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                eprintln!("[research] {}", describe(&progress));
            }
        });
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing after the current stage");
            on_interrupt.cancel();
        }
    });

    let report = match args.resume {
        Some(session_id) => {
            let state = store
                .load(session_id)?
                .with_context(|| format!("no checkpoint for session {session_id}"))?;
            info!(session = %session_id, iteration = state.iteration, "resuming session");
            researcher.resume(state, &cancel).await?
        }
        None => researcher.run(build_target(&args)?, &cancel).await?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
