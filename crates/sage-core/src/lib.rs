//! Retrieval-augmented research analyst.
//!
//! For every question the engine pulls a Wikipedia summary and an arXiv
//! abstract, embeds them into a flat vector store that persists across
//! runs, retrieves the nearest snippets and asks a local seq2seq model to
//! answer from them.
//!
//! # Architecture
//!
//! - **Knowledge Base**: exact L2 vector store plus an index-aligned
//!   document log, mirrored to two append-only files
//! - **Embedding Providers**: ONNX Runtime sentence embeddings
//! - **Sources**: Wikipedia and arXiv lookups
//! - **Answer Generator**: greedy T5 decoding with candle
//! - **Research Engine**: ingestion, retrieval and generation in order
//!
//! # Example
//!
//! ```no_run
//! use sage_core::prelude::*;
//!
//! # async fn example() -> sage_core::Result<()> {
//! let (config, _) = SageConfig::resolve(None).await?;
//! let mut engine = ResearchEngine::from_config(&config).await?;
//!
//! let result = engine.research("What is quantum entanglement?").await?;
//! println!("{}", result.answer);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod documents;
pub mod engine;
pub mod error;
pub mod generator;
pub mod hub;
pub mod ingest;
pub mod knowledge;
pub mod providers;
pub mod sources;
pub mod store;
pub mod types;

pub use config::SageConfig;
pub use documents::DocumentLog;
pub use engine::{QueryStage, ResearchAnswer, ResearchEngine, build_prompt};
pub use error::{Result, SageError};
pub use generator::{AnswerGenerator, MockGenerator, T5Generator};
pub use ingest::{IngestOutcome, IngestReport};
pub use knowledge::{KnowledgeBase, KnowledgeStats};
pub use providers::{EmbeddingProvider, MockProvider, ONNXProvider};
pub use sources::{ArxivSource, KnowledgeSource, WikipediaSource};
pub use store::FlatVectorStore;
pub use types::{EmbeddingModel, Neighbor, RetrievedSnippet, Snippet, Vector};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SageConfig;
    pub use crate::engine::{ResearchAnswer, ResearchEngine};
    pub use crate::error::{Result, SageError};
    pub use crate::generator::AnswerGenerator;
    pub use crate::ingest::{IngestOutcome, IngestReport};
    pub use crate::knowledge::KnowledgeBase;
    pub use crate::providers::EmbeddingProvider;
    pub use crate::sources::KnowledgeSource;
    pub use crate::types::{RetrievedSnippet, Snippet, Vector};
}
