//! Configuration for the research pipeline.
//!
//! Configuration is read from a TOML file and then overridden from the
//! environment. Lookup order for the file:
//!
//! 1. an explicit path (the CLI `--config` flag),
//! 2. the `SAGE_CONFIG_PATH` environment variable,
//! 3. `sage.toml` in the working directory, if it exists,
//! 4. built-in defaults.
//!
//! Every field has a default, so a file only needs the values it changes:
//!
//! ```toml
//! [general]
//! data_dir = "/var/lib/sage"
//!
//! [generation]
//! model_id = "google/flan-t5-large"
//! ```

use crate::error::{Result, SageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const ENV_CONFIG_PATH: &str = "SAGE_CONFIG_PATH";
pub const ENV_LOG_LEVEL: &str = "SAGE_LOG_LEVEL";
pub const ENV_DATA_DIR: &str = "SAGE_DATA_DIR";
pub const ENV_EMBEDDING_PROVIDER: &str = "SAGE_EMBEDDING_PROVIDER";
pub const ENV_GENERATION_PROVIDER: &str = "SAGE_GENERATION_PROVIDER";

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "sage.toml";

/// Prompt used when none is configured.
pub const DEFAULT_PROMPT_TEMPLATE: &str =
    "Answer using only the following research:\n\n{context}\n\nQuestion: {question}\nAnswer:";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const EMBEDDING_PROVIDERS: [&str; 2] = ["onnx", "mock"];
const GENERATION_PROVIDERS: [&str; 2] = ["t5", "mock"];
const DEVICES: [&str; 3] = ["cpu", "cuda", "metal"];

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SageConfig {
    pub general: GeneralConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub sources: SourcesConfig,
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Directory holding the persisted vector and document files
    pub data_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: PathBuf::from("."),
        }
    }
}

/// Persisted file names, relative to `general.data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub vector_file: PathBuf,
    pub document_file: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            vector_file: PathBuf::from("vector.index"),
            document_file: PathBuf::from("documents.log"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider: onnx or mock
    pub provider: String,

    /// Hugging Face repository holding the ONNX export
    pub model_id: String,

    pub revision: String,

    /// Path of the ONNX graph inside the repository (or local directory)
    pub model_file: String,

    /// Load `model_file` and `tokenizer.json` from here instead of the hub
    pub local_dir: Option<PathBuf>,

    pub dimension: usize,

    /// Inputs longer than this many tokens are truncated
    pub max_sequence_length: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "onnx".to_string(),
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            revision: "main".to_string(),
            model_file: "onnx/model.onnx".to_string(),
            local_dir: None,
            dimension: 384,
            max_sequence_length: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Provider: t5 or mock
    pub provider: String,

    pub model_id: String,

    pub revision: String,

    /// Load `config.json`, `tokenizer.json` and `model.safetensors` from here
    pub local_dir: Option<PathBuf>,

    /// Prompt budget in model tokens; longer prompts are truncated
    pub max_input_tokens: usize,

    /// Maximum decoder length, decoder start token included
    pub max_output_tokens: usize,

    /// Device: cpu, cuda or metal
    pub device: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "t5".to_string(),
            model_id: "google/flan-t5-base".to_string(),
            revision: "main".to_string(),
            local_dir: None,
            max_input_tokens: 400,
            max_output_tokens: 300,
            device: "cpu".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub user_agent: String,

    /// Request timeout; unset means requests may block indefinitely
    pub timeout_secs: Option<u64>,

    pub wikipedia: WikipediaConfig,
    pub arxiv: ArxivConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            user_agent: format!(
                "sage/{} (local research assistant)",
                env!("CARGO_PKG_VERSION")
            ),
            timeout_secs: None,
            wikipedia: WikipediaConfig::default(),
            arxiv: ArxivConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikipediaConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Number of summary sentences to keep
    pub sentences: usize,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://en.wikipedia.org/w/api.php".to_string(),
            sentences: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArxivConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub max_results: usize,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://export.arxiv.org/api/query".to_string(),
            max_results: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of snippets fed to the generator
    pub top_k: usize,

    /// Must contain `{question}`; `{context}` is replaced by the snippets
    pub prompt_template: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

impl SageConfig {
    /// Locate, load, override and validate the configuration.
    ///
    /// Returns the configuration and the file it was read from, if any.
    pub async fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match std::env::var(ENV_CONFIG_PATH) {
                Ok(path) => Some(PathBuf::from(path)),
                Err(_) => {
                    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                    local.exists().then_some(local)
                }
            },
        };

        let mut config = match &path {
            Some(path) => Self::load_from_path(path).await?,
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.merge_env_vars();
        config.validate()?;

        Ok((config, path))
    }

    /// Load configuration from a TOML file without environment overrides.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SageError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            SageError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Save configuration atomically (write to a temp file, then rename).
    pub async fn save_to_path(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = self.to_toml()?;
        let temp_path = path.with_extension("toml.tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, path).await?;

        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SageError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Apply `SAGE_*` environment overrides.
    pub fn merge_env_vars(&mut self) {
        if let Ok(log_level) = std::env::var(ENV_LOG_LEVEL) {
            debug!("Overriding log_level from environment: {}", log_level);
            self.general.log_level = log_level;
        }

        if let Ok(data_dir) = std::env::var(ENV_DATA_DIR) {
            debug!("Overriding data_dir from environment: {}", data_dir);
            self.general.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(provider) = std::env::var(ENV_EMBEDDING_PROVIDER) {
            debug!("Overriding embedding provider from environment: {}", provider);
            self.embedding.provider = provider;
        }

        if let Ok(provider) = std::env::var(ENV_GENERATION_PROVIDER) {
            debug!("Overriding generation provider from environment: {}", provider);
            self.generation.provider = provider;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(SageError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.general.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        check_choice("embedding.provider", &self.embedding.provider, &EMBEDDING_PROVIDERS)?;
        check_choice("generation.provider", &self.generation.provider, &GENERATION_PROVIDERS)?;
        check_choice("generation.device", &self.generation.device, &DEVICES)?;

        if self.embedding.dimension == 0 {
            return Err(SageError::Config(
                "embedding.dimension must be greater than 0".to_string(),
            ));
        }

        if self.embedding.max_sequence_length == 0 {
            return Err(SageError::Config(
                "embedding.max_sequence_length must be greater than 0".to_string(),
            ));
        }

        if self.generation.max_input_tokens == 0 || self.generation.max_output_tokens == 0 {
            return Err(SageError::Config(
                "generation token budgets must be greater than 0".to_string(),
            ));
        }

        if self.retrieval.top_k == 0 {
            return Err(SageError::Config(
                "retrieval.top_k must be greater than 0".to_string(),
            ));
        }

        if !self.retrieval.prompt_template.contains("{question}") {
            return Err(SageError::Config(
                "retrieval.prompt_template must contain {question}".to_string(),
            ));
        }

        if self.sources.wikipedia.sentences == 0 {
            return Err(SageError::Config(
                "sources.wikipedia.sentences must be greater than 0".to_string(),
            ));
        }

        if self.sources.arxiv.max_results == 0 {
            return Err(SageError::Config(
                "sources.arxiv.max_results must be greater than 0".to_string(),
            ));
        }

        if self.store.vector_file == self.store.document_file {
            return Err(SageError::Config(
                "store.vector_file and store.document_file must differ".to_string(),
            ));
        }

        Ok(())
    }

    pub fn vector_path(&self) -> PathBuf {
        self.general.data_dir.join(&self.store.vector_file)
    }

    pub fn document_path(&self) -> PathBuf {
        self.general.data_dir.join(&self.store.document_file)
    }
}

fn check_choice(field: &str, value: &str, choices: &[&str]) -> Result<()> {
    if choices.contains(&value) {
        Ok(())
    } else {
        Err(SageError::Config(format!(
            "Invalid {} '{}'. Must be one of: {}",
            field,
            value,
            choices.join(", ")
        )))
    }
}
