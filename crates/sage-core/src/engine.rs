//! Research engine: ingestion, retrieval and generation for one question.

use crate::config::{DEFAULT_PROMPT_TEMPLATE, SageConfig};
use crate::error::{Result, SageError};
use crate::generator::{AnswerGenerator, create_generator};
use crate::ingest::{IngestReport, ingest};
use crate::knowledge::{KnowledgeBase, KnowledgeStats};
use crate::providers::{EmbeddingProvider, create_provider};
use crate::sources::{KnowledgeSource, default_sources};
use crate::types::RetrievedSnippet;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the engine is in answering a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Idle,
    Ingesting,
    Retrieving,
    Generating,
    Done,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Ingesting => "ingesting",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Everything produced while answering one question.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchAnswer {
    pub question: String,
    pub answer: String,
    pub context: Vec<RetrievedSnippet>,
    pub ingestion: Vec<IngestReport>,
}

/// Fill `{context}` and `{question}` in `template`.
///
/// Placeholders are substituted in one pass, so braces inside the context
/// or question are never expanded.
pub fn build_prompt(template: &str, context: &str, question: &str) -> String {
    let mut prompt = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        prompt.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{context}") {
            prompt.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{question}") {
            prompt.push_str(question);
            rest = after;
        } else {
            prompt.push('{');
            rest = &tail[1..];
        }
    }
    prompt.push_str(rest);
    prompt
}

/// Answers research questions against a growing knowledge base.
///
/// Every question first pulls fresh material from each source into the
/// knowledge base, then retrieves the nearest snippets and hands them to
/// the generator. Nothing is cached or deduplicated.
pub struct ResearchEngine {
    knowledge: KnowledgeBase,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn AnswerGenerator>,
    sources: Vec<Box<dyn KnowledgeSource>>,
    top_k: usize,
    prompt_template: String,
    stage: QueryStage,
}

impl ResearchEngine {
    /// An engine with no sources, `top_k = 4` and the default prompt.
    pub fn new(
        knowledge: KnowledgeBase,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self {
            knowledge,
            embedder,
            generator,
            sources: Vec::new(),
            top_k: 4,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            stage: QueryStage::Idle,
        }
    }

    pub fn with_sources(mut self, sources: Vec<Box<dyn KnowledgeSource>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_source(mut self, source: Box<dyn KnowledgeSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    /// Load models, open the persisted knowledge base and configure sources.
    pub async fn from_config(config: &SageConfig) -> Result<Self> {
        config.validate()?;

        let embedder = create_provider(&config.embedding).await?;
        if embedder.dimension() != config.embedding.dimension {
            return Err(SageError::DimensionMismatch {
                expected: config.embedding.dimension,
                got: embedder.dimension(),
            });
        }

        let knowledge = KnowledgeBase::open(
            &config.vector_path(),
            &config.document_path(),
            config.embedding.dimension,
        )
        .await?;

        let generator = create_generator(&config.generation).await?;
        let sources = default_sources(&config.sources)?;

        info!(
            "Research engine ready: {} snippets, generator {}",
            knowledge.len(),
            generator.name()
        );

        Ok(Self::new(knowledge, embedder, generator)
            .with_sources(sources)
            .with_top_k(config.retrieval.top_k)
            .with_prompt_template(config.retrieval.prompt_template.clone()))
    }

    fn enter(&mut self, stage: QueryStage) {
        debug!("Query stage: {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Research `question` and generate an answer.
    ///
    /// Source failures are recorded in the returned ingestion reports.
    /// A blank question is rejected before anything is fetched. Any other
    /// error returns the engine to [`QueryStage::Idle`].
    pub async fn research(&mut self, question: &str) -> Result<ResearchAnswer> {
        if question.trim().is_empty() {
            return Err(SageError::EmptyQuestion);
        }

        let result = self.run_query(question).await;
        if let Err(e) = &result {
            warn!("Research failed during {}: {}", self.stage, e);
            self.enter(QueryStage::Idle);
        }
        result
    }

    async fn run_query(&mut self, question: &str) -> Result<ResearchAnswer> {
        info!("Researching: {}", question);

        self.enter(QueryStage::Ingesting);
        let mut ingestion = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let report = ingest(
                source.as_ref(),
                question,
                self.embedder.as_ref(),
                &mut self.knowledge,
            )
            .await;
            ingestion.push(report);
        }

        self.enter(QueryStage::Retrieving);
        let query_vector = self.embedder.embed(question).await?;
        let context = self.knowledge.retrieve(&query_vector, self.top_k)?;
        debug!("Retrieved {} snippets", context.len());

        let joined = context
            .iter()
            .map(|snippet| snippet.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = build_prompt(&self.prompt_template, &joined, question);

        self.enter(QueryStage::Generating);
        let answer = self.generator.generate(&prompt).await?;

        self.enter(QueryStage::Done);
        info!("Final answer: {}", answer);

        Ok(ResearchAnswer {
            question: question.to_string(),
            answer,
            context,
            ingestion,
        })
    }

    pub fn stage(&self) -> QueryStage {
        self.stage
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn stats(&self) -> KnowledgeStats {
        self.knowledge.stats()
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_default_template() {
        let prompt = build_prompt(DEFAULT_PROMPT_TEMPLATE, "A\n\nB", "What is X?");
        assert_eq!(
            prompt,
            "Answer using only the following research:\n\nA\n\nB\n\nQuestion: What is X?\nAnswer:"
        );
    }

    #[test]
    fn test_build_prompt_empty_context() {
        let prompt = build_prompt(DEFAULT_PROMPT_TEMPLATE, "", "Why?");
        assert_eq!(
            prompt,
            "Answer using only the following research:\n\n\n\nQuestion: Why?\nAnswer:"
        );
    }

    #[test]
    fn test_build_prompt_does_not_expand_inserted_text() {
        let prompt = build_prompt("{context}|{question}|{other}", "{question}", "{context}");
        assert_eq!(prompt, "{question}|{context}|{other}");
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(QueryStage::Retrieving.to_string(), "retrieving");
    }
}
