//! Answer generation with a local seq2seq model.

use crate::config::GenerationConfig;
use crate::error::{Result, SageError};
use crate::hub;
use crate::providers::load_tokenizer;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::t5;
use parking_lot::Mutex;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Turns a finished prompt into answer text.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Short description for logs and health output.
    fn name(&self) -> &str;
}

/// Build the generator named in the configuration.
pub async fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.provider.to_lowercase().as_str() {
        "t5" => Ok(Arc::new(T5Generator::new(config).await?)),
        "mock" => Ok(Arc::new(MockGenerator::new(config.max_input_tokens))),
        other => Err(SageError::Config(format!("Unknown generation provider: {}", other))),
    }
}

fn select_device(name: &str) -> Result<Device> {
    match name {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0)
            .map_err(|e| SageError::Config(format!("CUDA device 0: {}", e))),
        "metal" => Device::new_metal(0)
            .map_err(|e| SageError::Config(format!("Metal device: {}", e))),
        other => Err(SageError::Config(format!("Unknown device: {}", other))),
    }
}

/// Greedy T5 decoding (flan-t5 by default) with candle.
///
/// The prompt is truncated to `max_input_tokens` by the model's tokenizer.
/// Decoding stops at end-of-sequence or when the output, decoder start token
/// included, reaches `max_output_tokens`. The model sits behind a mutex and
/// runs on the blocking thread pool, so calls are serialized.
pub struct T5Generator {
    name: String,
    inner: Arc<Mutex<T5Inner>>,
    max_output_tokens: usize,
}

struct T5Inner {
    model: t5::T5ForConditionalGeneration,
    config: t5::Config,
    tokenizer: Tokenizer,
    device: Device,
}

impl T5Generator {
    pub async fn new(config: &GenerationConfig) -> Result<Self> {
        info!("Loading generation model: {}", config.model_id);

        let paths = hub::resolve_model_files(
            &config.model_id,
            &config.revision,
            config.local_dir.as_deref(),
            &["config.json", "tokenizer.json", "model.safetensors"],
        )
        .await?;

        let device = select_device(&config.device)?;

        let model_config: t5::Config = serde_json::from_str(&tokio::fs::read_to_string(&paths[0]).await?)?;
        let tokenizer = load_tokenizer(&paths[1], config.max_input_tokens)?;

        let weights = paths[2].clone();
        let load_device = device.clone();
        let load_config = model_config.clone();
        let model = tokio::task::spawn_blocking(move || -> Result<t5::T5ForConditionalGeneration> {
            // Safety: the weights file is not modified while mapped
            let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &load_device)? };
            Ok(t5::T5ForConditionalGeneration::load(vb, &load_config)?)
        })
        .await
        .map_err(|e| SageError::ModelNotLoaded(format!("Model loader stopped: {}", e)))??;

        info!("Generation model ready on {}", config.device);

        Ok(Self {
            name: format!("t5:{}", config.model_id),
            inner: Arc::new(Mutex::new(T5Inner {
                model,
                config: model_config,
                tokenizer,
                device,
            })),
            max_output_tokens: config.max_output_tokens,
        })
    }
}

impl T5Inner {
    fn generate(&mut self, prompt: &str, max_output_tokens: usize) -> Result<String> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| SageError::Generation(format!("Tokenization failed: {}", e)))?;
        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        debug!("Prompt encoded to {} tokens", encoding.get_ids().len());

        let encoder_output = self.model.encode(&input_ids)?;

        let start_token = self
            .config
            .decoder_start_token_id
            .unwrap_or(self.config.pad_token_id) as u32;
        let eos_token = self.config.eos_token_id as u32;
        let mut output_ids = vec![start_token];

        let result = self.decode_loop(&encoder_output, &mut output_ids, eos_token, max_output_tokens);
        self.model.clear_kv_cache();
        result?;

        debug!("Generated {} tokens", output_ids.len() - 1);

        self.tokenizer
            .decode(&output_ids[1..], true)
            .map(|text| text.trim().to_string())
            .map_err(|e| SageError::Generation(format!("Detokenization failed: {}", e)))
    }

    fn decode_loop(
        &mut self,
        encoder_output: &Tensor,
        output_ids: &mut Vec<u32>,
        eos_token: u32,
        max_output_tokens: usize,
    ) -> Result<()> {
        while output_ids.len() < max_output_tokens {
            // With the kv cache only the newest token is fed back in
            let decoder_input = match output_ids.last() {
                Some(&last) if output_ids.len() > 1 && self.config.use_cache => {
                    Tensor::new(&[last], &self.device)?.unsqueeze(0)?
                }
                _ => Tensor::new(output_ids.as_slice(), &self.device)?.unsqueeze(0)?,
            };

            let logits = self.model.decode(&decoder_input, encoder_output)?.squeeze(0)?;
            let next = logits.argmax(0)?.to_scalar::<u32>()?;
            if next == eos_token {
                break;
            }
            output_ids.push(next);
        }
        Ok(())
    }
}

#[async_trait]
impl AnswerGenerator for T5Generator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let inner = Arc::clone(&self.inner);
        let prompt = prompt.to_string();
        let max_output_tokens = self.max_output_tokens;

        tokio::task::spawn_blocking(move || inner.lock().generate(&prompt, max_output_tokens))
            .await
            .map_err(|e| SageError::Generation(format!("Generation worker stopped: {}", e)))?
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Offline stand-in for the language model.
///
/// Truncates the prompt to `max_input_tokens` whitespace-separated words,
/// records it, and answers with a fixed sentence describing its size.
pub struct MockGenerator {
    max_input_tokens: usize,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new(max_input_tokens: usize) -> Self {
        Self {
            max_input_tokens,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far, after truncation.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl AnswerGenerator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let words: Vec<&str> = prompt.split_whitespace().take(self.max_input_tokens).collect();
        let answer = format!("Mock answer from {} prompt words.", words.len());
        self.prompts.lock().push(words.join(" "));
        Ok(answer)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_generator_is_deterministic() {
        let generator = MockGenerator::new(400);
        let a = generator.generate("Question: what?\nAnswer:").await.unwrap();
        let b = generator.generate("Question: what?\nAnswer:").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_generator_truncates_prompt() {
        let generator = MockGenerator::new(3);
        let answer = generator.generate("one two three four five").await.unwrap();
        assert_eq!(answer, "Mock answer from 3 prompt words.");
        assert_eq!(generator.prompts(), vec!["one two three".to_string()]);
    }

    #[tokio::test]
    async fn test_create_generator_from_config() {
        let config = GenerationConfig {
            provider: "mock".to_string(),
            ..Default::default()
        };
        let generator = create_generator(&config).await.unwrap();
        assert_eq!(generator.name(), "mock");

        let config = GenerationConfig {
            provider: "gpt".to_string(),
            ..Default::default()
        };
        assert!(matches!(create_generator(&config).await, Err(SageError::Config(_))));
    }

    #[test]
    fn test_select_device() {
        assert!(matches!(select_device("cpu"), Ok(Device::Cpu)));
        assert!(select_device("tpu").is_err());
    }
}
