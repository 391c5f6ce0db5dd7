use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ResearchError, Result};
use crate::ollama::DEFAULT_HOST;
use crate::search::{SearchCategory, SearchDepth, SearchOptions, TavilyClient};

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_language_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_reasoning_model() -> String {
    "qwen2.5:14b".to_string()
}

fn default_context_window() -> usize {
    32768
}

fn default_max_retries() -> u32 {
    3
}

fn default_search_endpoint() -> String {
    TavilyClient::DEFAULT_ENDPOINT.to_string()
}

fn default_max_results_per_query() -> usize {
    5
}

fn default_max_tokens_per_source() -> usize {
    1000
}

fn default_number_of_queries() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub search: SearchConfig,
    pub research: RunConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OllamaConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_language_model")]
    pub language_model: String,
    #[serde(default = "default_reasoning_model")]
    pub reasoning_model: String,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        OllamaConfig {
            host: default_host(),
            language_model: default_language_model(),
            reasoning_model: default_reasoning_model(),
            context_window: default_context_window(),
            temperature: 0.0,
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            endpoint: default_search_endpoint(),
            api_key: None,
        }
    }
}

/// Per-session knobs. `max_iterations` has no default and must be set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunConfig {
    pub max_iterations: usize,
    #[serde(default = "default_max_results_per_query")]
    pub max_results_per_query: usize,
    #[serde(default = "default_max_tokens_per_source")]
    pub max_tokens_per_source: usize,
    #[serde(default = "default_number_of_queries")]
    pub number_of_queries: usize,
    #[serde(default)]
    pub search_category: SearchCategory,
    #[serde(default)]
    pub search_depth: SearchDepth,
    #[serde(default)]
    pub number_of_days_back: Option<u32>,
    #[serde(default)]
    pub include_raw_content: bool,
    #[serde(default)]
    pub verify_profiles: bool,
}

impl RunConfig {
    pub fn new(max_iterations: usize) -> Self {
        RunConfig {
            max_iterations,
            max_results_per_query: default_max_results_per_query(),
            max_tokens_per_source: default_max_tokens_per_source(),
            number_of_queries: default_number_of_queries(),
            search_category: SearchCategory::default(),
            search_depth: SearchDepth::default(),
            number_of_days_back: None,
            include_raw_content: false,
            verify_profiles: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_iterations", self.max_iterations),
            ("max_results_per_query", self.max_results_per_query),
            ("max_tokens_per_source", self.max_tokens_per_source),
            ("number_of_queries", self.number_of_queries),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ResearchError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.number_of_days_back == Some(0) {
            return Err(ResearchError::Config(
                "number_of_days_back must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            max_results_per_query: self.max_results_per_query,
            max_tokens_per_source: self.max_tokens_per_source,
            category: self.search_category,
            depth: self.search_depth,
            days_back: self.number_of_days_back,
            include_raw_content: self.include_raw_content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiKeysConfig {
    #[serde(default)]
    keys: HashMap<String, String>,
}

/// Reads the `[keys]` table of an `api_keys.toml`. A missing file is empty.
pub fn load_api_keys(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let contents = fs::read_to_string(path)?;
    let config: ApiKeysConfig = toml::from_str(&contents)
        .map_err(|e| ResearchError::Config(format!("{}: {}", path.display(), e)))?;
    Ok(config.keys)
}

impl Config {
    /// Loads the default config file, then applies `api_keys.toml` and
    /// environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        Self::load_with(path, None)
    }

    /// Like `load_from`, but a `max_iterations` given here replaces the
    /// file's `research.max_iterations` before anything is validated.
    pub fn load_with(path: &Path, max_iterations: Option<usize>) -> Result<Self> {
        let parse_error = |e: String| ResearchError::Config(format!("cannot parse {}: {}", path.display(), e));

        let contents = fs::read_to_string(path)
            .map_err(|e| ResearchError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut table: toml::Table = contents.parse().map_err(|e: toml::de::Error| parse_error(e.to_string()))?;
        if let Some(max_iterations) = max_iterations {
            let max_iterations = i64::try_from(max_iterations)
                .map_err(|_| ResearchError::Config(format!("max_iterations {max_iterations} is too large")))?;
            let research = table
                .entry("research")
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            let toml::Value::Table(research) = research else {
                return Err(ResearchError::Config(format!("{}: [research] must be a table", path.display())));
            };
            research.insert("max_iterations".to_string(), toml::Value::Integer(max_iterations));
        }
        let mut config: Config = table.try_into().map_err(|e| parse_error(e.to_string()))?;
        debug!(path = %path.display(), "loaded config");

        if config.search.api_key.is_none() {
            let keys_path = path
                .parent()
                .map(|dir| dir.join("api_keys.toml"))
                .unwrap_or_else(|| PathBuf::from("api_keys.toml"));
            match load_api_keys(&keys_path) {
                Ok(keys) => config.search.api_key = keys.get("TAVILY_API_KEY").cloned(),
                Err(e) => warn!(error = %e, "failed to load api_keys.toml"),
            }
        }

        config.apply_env_overrides();
        config.research.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            self.ollama.host = host;
        }
        if let Ok(key) = std::env::var("TAVILY_API_KEY") {
            self.search.api_key = Some(key);
        }
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/business-researcher")
        } else {
            PathBuf::from(".")
        }
    }
}
