//! Runtime configuration.
//!
//! [`Settings`] holds credentials, model names and paths read from the
//! environment (after loading `.env`). [`PipelineConfig`] holds the tuning
//! knobs of the pipeline itself and is read from an optional JSON file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::agent::AgentConfig;
use crate::error::{Error, Result};
use crate::handlers::AnswererConfig;
use crate::llm::{ClientConfig, Provider};
use crate::retrieval::IngestConfig;
use crate::router::RouterConfig;
use crate::sandbox::SandboxConfig;

/// Tunables for routing, solving and answering. Every field is optional in
/// the JSON form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub router: RouterConfig,
    pub agent: AgentConfig,
    pub answerer: AnswererConfig,
    pub sandbox: SandboxConfig,
}

impl PipelineConfig {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Environment-derived settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Model for the answerers and the code agent
    pub llm_model: String,
    /// Model for the routing call
    pub router_model: String,
    pub embedding_model: String,
    pub knowledge_db: PathBuf,
    pub collection: String,
    pub data_input_dir: PathBuf,
    pub data_output_dir: PathBuf,
    pub python_path: String,
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Settings {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str, default: usize| -> Result<usize> {
            get(key).map_or(Ok(default), |v| {
                v.parse()
                    .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got '{}'", key, v)))
            })
        };
        let path = |key: &str, default: &str| -> Result<PathBuf> {
            let raw = get(key).unwrap_or_else(|| default.to_string());
            shellexpand::full(&raw)
                .map(|p| PathBuf::from(p.as_ref()))
                .map_err(|e| Error::Config(format!("cannot expand {}: {}", key, e)))
        };

        let provider = get("LLM_PROVIDER")
            .map(|p| Provider::from_str(&p))
            .transpose()?
            .unwrap_or(Provider::Google);
        let api_key = match provider {
            Provider::Google => get("GOOGLE_API_KEY"),
            Provider::OpenAI => get("OPENAI_API_KEY"),
        };
        let llm_model = get("LLM_MODEL").unwrap_or_else(|| "gemini-2.5-flash-lite".to_string());

        Ok(Self {
            provider,
            api_key,
            base_url: get("LLM_BASE_URL"),
            router_model: get("ROUTER_MODEL").unwrap_or_else(|| llm_model.clone()),
            llm_model,
            embedding_model: get("EMBEDDING_MODEL").unwrap_or_else(|| "text-embedding-004".to_string()),
            knowledge_db: path("KNOWLEDGE_DB", "data/knowledge.sqlite")?,
            collection: get("KNOWLEDGE_COLLECTION").unwrap_or_else(|| "vnpt_knowledge_base".to_string()),
            data_input_dir: path("DATA_INPUT_DIR", "data")?,
            data_output_dir: path("DATA_OUTPUT_DIR", "data")?,
            python_path: get("PYTHON_PATH").unwrap_or_else(|| "python3".to_string()),
            top_k: number("TOP_K_RETRIEVAL", 3)?,
            chunk_size: number("CHUNK_SIZE", 500)?,
            chunk_overlap: number("CHUNK_OVERLAP", 50)?,
        })
    }

    /// Client configuration for the chosen provider.
    ///
    /// A key is required unless a custom base URL points at a local
    /// OpenAI-compatible server.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let api_key = match (&self.api_key, &self.base_url, self.provider) {
            (Some(key), _, _) => key.clone(),
            (None, Some(_), Provider::OpenAI) => String::new(),
            (None, _, Provider::Google) => {
                return Err(Error::Config("GOOGLE_API_KEY is not set".to_string()))
            }
            (None, None, Provider::OpenAI) => {
                return Err(Error::Config("OPENAI_API_KEY is not set".to_string()))
            }
        };

        let mut config = ClientConfig::new(api_key)
            .with_default_model(self.llm_model.clone())
            .with_embedding_model(self.embedding_model.clone());
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url.clone());
        }
        Ok(config)
    }

    /// Apply environment overrides on top of a file-based pipeline config.
    pub fn apply_to(&self, config: &mut PipelineConfig) {
        config.answerer.top_k = self.top_k;
        if self.router_model != self.llm_model && config.router.model.is_none() {
            config.router.model = Some(self.router_model.clone());
        }
        config.sandbox.python_path = self.python_path.clone();
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            collection: self.collection.clone(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            embedding_model: Some(self.embedding_model.clone()),
            ..IngestConfig::default()
        }
    }

    /// Default knowledge files: `knowledge_base.txt` in the input dir.
    pub fn default_knowledge_pattern(&self) -> String {
        self.data_input_dir
            .join("knowledge_base.txt")
            .display()
            .to_string()
    }

    /// `private_test.csv` if present, else `public_test.csv`.
    pub fn default_input(&self) -> PathBuf {
        let private = self.data_input_dir.join("private_test.csv");
        if private.exists() {
            private
        } else {
            self.data_input_dir.join("public_test.csv")
        }
    }

    pub fn default_output(&self) -> PathBuf {
        self.data_output_dir.join("pred.csv")
    }
}
