//! Embedding providers for generating vector embeddings.

use crate::config::EmbeddingConfig;
use crate::error::{Result, SageError};
use crate::hub;
use crate::types::{EmbeddingModel, Vector, normalize};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vector>;

    /// Generate embeddings for multiple texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the embedding model information.
    fn model(&self) -> &EmbeddingModel;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize {
        self.model().dimension
    }
}

/// Build the provider named in the configuration.
pub async fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.to_lowercase().as_str() {
        "onnx" => Ok(Arc::new(ONNXProvider::new(config).await?)),
        "mock" => Ok(Arc::new(MockProvider::new(config.dimension))),
        other => Err(SageError::Config(format!("Unknown embedding provider: {}", other))),
    }
}

/// ONNX Runtime embedding provider for sentence-transformers models.
///
/// Token embeddings are mean-pooled over the attention mask and
/// L2-normalized, matching what `all-MiniLM-L6-v2` produces in
/// sentence-transformers.
pub struct ONNXProvider {
    model: EmbeddingModel,
    session: Arc<RwLock<ort::Session>>,
    tokenizer: Arc<Tokenizer>,
    #[allow(dead_code)] // Keep environment alive for the session
    environment: Arc<ort::Environment>,
}

impl ONNXProvider {
    pub async fn new(config: &EmbeddingConfig) -> Result<Self> {
        info!("Initializing ONNX provider with model: {}", config.model_id);

        let paths = hub::resolve_model_files(
            &config.model_id,
            &config.revision,
            config.local_dir.as_deref(),
            &[config.model_file.as_str(), "tokenizer.json"],
        )
        .await?;

        let environment = ort::Environment::builder()
            .with_name("sage_embeddings")
            .with_log_level(ort::LoggingLevel::Warning)
            .build()?
            .into_arc();

        let session = ort::SessionBuilder::new(&environment)?
            .with_optimization_level(ort::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .with_model_from_file(&paths[0])?;

        info!("ONNX session created from: {}", paths[0].display());

        let tokenizer = load_tokenizer(&paths[1], config.max_sequence_length)?;

        Ok(Self {
            model: EmbeddingModel::new("onnx", &config.model_id, config.dimension),
            session: Arc::new(RwLock::new(session)),
            tokenizer: Arc::new(tokenizer),
            environment,
        })
    }

    fn generate_embedding(&self, text: &str) -> Result<Vector> {
        use ndarray::{Array, Axis, CowArray, IxDyn};

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| SageError::Embedding(format!("Tokenization failed: {}", e)))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> =
            encoding.get_attention_mask().iter().map(|&m| m as i64).collect();
        let seq_len = input_ids.len();

        let session = self.session.read();

        // BERT exports take token_type_ids as a third input; feed inputs by name
        let arrays = session
            .inputs
            .iter()
            .map(|input| {
                let data = match input.name.as_str() {
                    "input_ids" => input_ids.clone(),
                    "attention_mask" => attention_mask.clone(),
                    "token_type_ids" => vec![0i64; seq_len],
                    other => {
                        return Err(SageError::Embedding(format!(
                            "Unsupported model input: {}",
                            other
                        )));
                    }
                };
                Array::from_shape_vec(IxDyn(&[1, seq_len]), data)
                    .map(CowArray::from)
                    .map_err(|e| SageError::Embedding(format!("Failed to build tensor: {}", e)))
            })
            .collect::<Result<Vec<CowArray<i64, IxDyn>>>>()?;

        let allocator = session.allocator();
        let values = arrays
            .iter()
            .map(|array| ort::Value::from_array(allocator, array))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let outputs = session.run(values)?;
        let output = outputs
            .first()
            .ok_or_else(|| SageError::Embedding("Model produced no outputs".to_string()))?;
        let extracted = output.try_extract::<f32>()?;
        let view = extracted.view();

        let mut embedding: Vector = match view.ndim() {
            // [batch, seq_len, hidden]: mean-pool over the sequence
            3 => {
                let tokens = view.index_axis(Axis(0), 0);
                let mask_total: f32 = attention_mask.iter().map(|&m| m as f32).sum();
                let hidden = tokens.shape()[1];
                let mut pooled = vec![0.0f32; hidden];
                for (token, &mask) in tokens.outer_iter().zip(attention_mask.iter()) {
                    if mask == 0 {
                        continue;
                    }
                    for (acc, value) in pooled.iter_mut().zip(token.iter()) {
                        *acc += value;
                    }
                }
                if mask_total > 0.0 {
                    pooled.iter_mut().for_each(|x| *x /= mask_total);
                }
                pooled
            }
            // [batch, hidden]: already pooled
            2 => view.index_axis(Axis(0), 0).iter().copied().collect(),
            _ => {
                return Err(SageError::Embedding(format!(
                    "Unexpected output shape: {:?}",
                    view.shape()
                )));
            }
        };

        if embedding.len() != self.model.dimension {
            return Err(SageError::DimensionMismatch {
                expected: self.model.dimension,
                got: embedding.len(),
            });
        }

        normalize(&mut embedding);

        debug!(
            "Generated embedding for text: '{}'",
            text.chars().take(50).collect::<String>()
        );

        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for ONNXProvider {
    async fn embed(&self, text: &str) -> Result<Vector> {
        self.generate_embedding(text)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        texts.iter().map(|text| self.generate_embedding(text)).collect()
    }

    fn model(&self) -> &EmbeddingModel {
        &self.model
    }
}

pub(crate) fn load_tokenizer(path: &Path, max_length: usize) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| SageError::ModelNotLoaded(format!("Failed to load tokenizer: {}", e)))?;

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| SageError::ModelNotLoaded(format!("Invalid truncation settings: {}", e)))?;
    tokenizer.with_padding(None);

    Ok(tokenizer)
}

/// Deterministic provider for tests and offline runs.
///
/// Identical text always maps to the identical vector, but there is no
/// semantic similarity between different texts.
pub struct MockProvider {
    model: EmbeddingModel,
    dimension: usize,
}

impl MockProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            model: EmbeddingModel::new("mock", "mock-model", dimension),
            dimension,
        }
    }

    fn generate_embedding(&self, text: &str) -> Vector {
        let hash = text
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));

        let mut embedding = vec![0.0; self.dimension];
        for (i, val) in embedding.iter_mut().enumerate() {
            let seed = hash.wrapping_add((i as u64).wrapping_mul(0x9e37_79b9));
            *val = ((seed % 1000) as f32 / 1000.0) - 0.5;
        }

        normalize(&mut embedding);
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vector> {
        Ok(self.generate_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        Ok(texts.iter().map(|t| self.generate_embedding(t)).collect())
    }

    fn model(&self) -> &EmbeddingModel {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider() {
        let provider = MockProvider::new(128);
        assert_eq!(provider.dimension(), 128);

        let embedding = provider.embed("test").await.unwrap();
        assert_eq!(embedding.len(), 128);

        // Same text should produce same embedding
        let embedding2 = provider.embed("test").await.unwrap();
        assert_eq!(embedding, embedding2);

        // Different text should produce different embedding
        let embedding3 = provider.embed("different").await.unwrap();
        assert_ne!(embedding, embedding3);
    }

    #[tokio::test]
    async fn test_mock_provider_batch() {
        let provider = MockProvider::new(128);
        let texts = vec!["hello".to_string(), "world".to_string()];

        let embeddings = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0], provider.embed("hello").await.unwrap());
        assert_ne!(embeddings[0], embeddings[1]);
    }

    #[tokio::test]
    async fn test_create_mock_provider_from_config() {
        let config = EmbeddingConfig {
            provider: "mock".to_string(),
            dimension: 16,
            ..Default::default()
        };
        let provider = create_provider(&config).await.unwrap();
        assert_eq!(provider.dimension(), 16);
        assert_eq!(provider.model().provider, "mock");
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_provider(&config).await,
            Err(SageError::Config(_))
        ));
    }

    /// Word-level tokenizer that appends `</s>` like the T5 tokenizer does.
    fn write_word_tokenizer(dir: &Path) -> std::path::PathBuf {
        let words = ["one", "two", "three", "four", "five", "six", "seven", "eight"];
        let mut vocab = serde_json::Map::new();
        vocab.insert("<unk>".to_string(), 0.into());
        vocab.insert("</s>".to_string(), 1.into());
        for (i, word) in words.iter().enumerate() {
            vocab.insert(word.to_string(), (i + 2).into());
        }

        let tokenizer = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [{
                "id": 1,
                "content": "</s>",
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            }],
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": {
                "type": "TemplateProcessing",
                "single": [
                    { "Sequence": { "id": "A", "type_id": 0 } },
                    { "SpecialToken": { "id": "</s>", "type_id": 0 } }
                ],
                "pair": [
                    { "Sequence": { "id": "A", "type_id": 0 } },
                    { "SpecialToken": { "id": "</s>", "type_id": 0 } },
                    { "Sequence": { "id": "B", "type_id": 0 } },
                    { "SpecialToken": { "id": "</s>", "type_id": 0 } }
                ],
                "special_tokens": {
                    "</s>": { "id": "</s>", "ids": [1], "tokens": ["</s>"] }
                }
            },
            "decoder": null,
            "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "<unk>" }
        });

        let path = dir.join("tokenizer.json");
        std::fs::write(&path, tokenizer.to_string()).unwrap();
        path
    }

    #[test]
    fn test_load_tokenizer_truncates_in_model_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_word_tokenizer(dir.path());
        let tokenizer = load_tokenizer(&path, 4).unwrap();

        let encoding = tokenizer
            .encode("one two three four five six seven eight", true)
            .unwrap();
        assert_eq!(encoding.get_ids(), &[2, 3, 4, 1]);

        let encoding = tokenizer.encode("one two", true).unwrap();
        assert_eq!(encoding.get_ids(), &[2, 3, 1]);
    }

    #[test]
    fn test_load_tokenizer_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_tokenizer(&dir.path().join("tokenizer.json"), 4);
        assert!(matches!(result, Err(SageError::ModelNotLoaded(_))));
    }
}
