//! Best-effort ingestion of external knowledge into the knowledge base.

use crate::knowledge::KnowledgeBase;
use crate::providers::EmbeddingProvider;
use crate::sources::KnowledgeSource;
use serde::Serialize;
use tracing::{debug, warn};

/// What happened when one source was consulted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// A snippet was stored at `index`.
    Added { index: usize },
    /// The source had nothing for the query.
    Empty,
    /// Fetching, embedding or storing failed; the query goes on without it.
    Failed { reason: String },
}

impl IngestOutcome {
    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub source: String,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

/// Fetch from `source`, embed the snippet and append it to `kb`.
///
/// Never fails: every error is logged and turned into
/// [`IngestOutcome::Failed`].
pub async fn ingest(
    source: &dyn KnowledgeSource,
    query: &str,
    embedder: &dyn EmbeddingProvider,
    kb: &mut KnowledgeBase,
) -> IngestReport {
    let name = source.name().to_string();

    let outcome = match try_ingest(source, query, embedder, kb).await {
        Ok(Some(index)) => IngestOutcome::Added { index },
        Ok(None) => {
            debug!(source = %name, "No result");
            IngestOutcome::Empty
        }
        Err(e) => {
            warn!(source = %name, "Ingestion failed: {}", e);
            IngestOutcome::Failed {
                reason: e.to_string(),
            }
        }
    };

    IngestReport {
        source: name,
        outcome,
    }
}

async fn try_ingest(
    source: &dyn KnowledgeSource,
    query: &str,
    embedder: &dyn EmbeddingProvider,
    kb: &mut KnowledgeBase,
) -> crate::Result<Option<usize>> {
    let Some(snippet) = source.fetch(query).await? else {
        return Ok(None);
    };

    let vector = embedder.embed(&snippet.content).await?;
    let index = kb.add(&snippet, vector).await?;
    Ok(Some(index))
}
