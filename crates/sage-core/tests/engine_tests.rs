//! End-to-end research engine tests with offline sources and models.

use async_trait::async_trait;
use sage_core::{
    AnswerGenerator, IngestOutcome, KnowledgeBase, KnowledgeSource, MockGenerator, MockProvider,
    QueryStage, ResearchEngine, Result, SageError, Snippet,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

const DIM: usize = 32;
const QUESTION: &str = "What is quantum entanglement?";

/// Source that answers every query with the same text and counts calls.
struct StubSource {
    name: &'static str,
    text: Option<&'static str>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl StubSource {
    fn ok(name: &'static str, text: &'static str) -> (Box<dyn KnowledgeSource>, Arc<AtomicUsize>) {
        Self::build(name, Some(text), false)
    }

    fn failing(name: &'static str) -> (Box<dyn KnowledgeSource>, Arc<AtomicUsize>) {
        Self::build(name, None, true)
    }

    fn build(
        name: &'static str,
        text: Option<&'static str>,
        fail: bool,
    ) -> (Box<dyn KnowledgeSource>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = Self {
            name,
            text,
            fail,
            calls: Arc::clone(&calls),
        };
        (Box::new(source), calls)
    }
}

#[async_trait]
impl KnowledgeSource for StubSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self, _query: &str) -> Result<Option<Snippet>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SageError::fetch(self.name, "network unreachable"));
        }
        Ok(self.text.map(|text| Snippet::new(self.name, text)))
    }
}

fn engine_with(kb: KnowledgeBase, generator: Arc<MockGenerator>) -> ResearchEngine {
    ResearchEngine::new(kb, Arc::new(MockProvider::new(DIM)), generator)
}

#[tokio::test]
async fn test_both_sources_succeed() {
    let (wiki, wiki_calls) = StubSource::ok(
        "Wikipedia",
        "Quantum entanglement is a phenomenon where particles share a state.",
    );
    let (arxiv, arxiv_calls) = StubSource::ok(
        "ArXiv Paper",
        "Entanglement of formation\nWe study entanglement measures.",
    );
    let generator = Arc::new(MockGenerator::new(400));

    let mut engine = engine_with(KnowledgeBase::in_memory(DIM), Arc::clone(&generator))
        .with_source(wiki)
        .with_source(arxiv);
    assert_eq!(engine.stage(), QueryStage::Idle);

    let result = engine.research(QUESTION).await.unwrap();

    assert_eq!(wiki_calls.load(Ordering::SeqCst), 1);
    assert_eq!(arxiv_calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.knowledge().len(), 2);
    assert_eq!(engine.stage(), QueryStage::Done);

    assert_eq!(result.question, QUESTION);
    assert_eq!(result.context.len(), 2);
    assert_eq!(
        result.ingestion[0].outcome,
        IngestOutcome::Added { index: 0 }
    );
    assert_eq!(
        result.ingestion[1].outcome,
        IngestOutcome::Added { index: 1 }
    );

    // Retrieved text reaches the prompt
    assert_eq!(generator.calls(), 1);
    let prompt = &generator.prompts()[0];
    assert!(prompt.starts_with("Answer using only the following research:"));
    assert!(prompt.contains("particles share a state."));
    assert!(prompt.contains("We study entanglement measures."));
    assert!(prompt.ends_with("Question: What is quantum entanglement? Answer:"));
}

#[tokio::test]
async fn test_both_sources_fail_still_answers() {
    let (wiki, wiki_calls) = StubSource::failing("Wikipedia");
    let (arxiv, arxiv_calls) = StubSource::failing("ArXiv Paper");
    let generator = Arc::new(MockGenerator::new(400));

    let mut engine = engine_with(KnowledgeBase::in_memory(DIM), Arc::clone(&generator))
        .with_sources(vec![wiki, arxiv]);

    let result = engine.research(QUESTION).await.unwrap();

    assert_eq!(wiki_calls.load(Ordering::SeqCst), 1);
    assert_eq!(arxiv_calls.load(Ordering::SeqCst), 1);
    assert!(engine.knowledge().is_empty());
    assert!(result.context.is_empty());
    assert!(!result.answer.is_empty());
    assert!(
        result
            .ingestion
            .iter()
            .all(|report| matches!(report.outcome, IngestOutcome::Failed { .. }))
    );
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_blank_question_is_rejected() {
    let (wiki, wiki_calls) = StubSource::ok("Wikipedia", "text");
    let generator = Arc::new(MockGenerator::new(400));
    let mut engine =
        engine_with(KnowledgeBase::in_memory(DIM), Arc::clone(&generator)).with_source(wiki);

    for question in ["", "   ", "\n\t"] {
        let err = engine.research(question).await.unwrap_err();
        assert!(matches!(err, SageError::EmptyQuestion));
    }

    assert_eq!(wiki_calls.load(Ordering::SeqCst), 0);
    assert_eq!(generator.calls(), 0);
    assert_eq!(engine.stage(), QueryStage::Idle);
}

#[tokio::test]
async fn test_repeated_questions_accumulate_duplicates() {
    let (wiki, _) = StubSource::ok("Wikipedia", "same summary every time");
    let generator = Arc::new(MockGenerator::new(400));
    let mut engine = engine_with(KnowledgeBase::in_memory(DIM), Arc::clone(&generator))
        .with_source(wiki)
        .with_top_k(4);

    for _ in 0..5 {
        engine.research(QUESTION).await.unwrap();
    }

    assert_eq!(engine.knowledge().len(), 5);

    let result = engine.research(QUESTION).await.unwrap();
    assert_eq!(engine.knowledge().len(), 6);
    assert_eq!(result.context.len(), 4);

    // Equal distances keep insertion order
    let indices: Vec<usize> = result.context.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_answers_are_deterministic() {
    let generator = Arc::new(MockGenerator::new(400));
    let mut engine = engine_with(KnowledgeBase::in_memory(DIM), Arc::clone(&generator));

    let first = engine.research(QUESTION).await.unwrap();
    let second = engine.research(QUESTION).await.unwrap();
    assert_eq!(first.answer, second.answer);

    let prompts = generator.prompts();
    assert_eq!(prompts[0], prompts[1]);
}

#[tokio::test]
async fn test_knowledge_persists_across_engines() {
    let dir = tempdir().unwrap();
    let vector_path = dir.path().join("vector.index");
    let document_path = dir.path().join("documents.log");

    {
        let kb = KnowledgeBase::open(&vector_path, &document_path, DIM)
            .await
            .unwrap();
        let (wiki, _) = StubSource::ok("Wikipedia", "Summary with\n\nblank lines inside.");
        let (arxiv, _) = StubSource::ok("ArXiv Paper", "Title\nAbstract.");
        let mut engine = engine_with(kb, Arc::new(MockGenerator::new(400)))
            .with_sources(vec![wiki, arxiv]);
        engine.research(QUESTION).await.unwrap();
    }

    let kb = KnowledgeBase::open(&vector_path, &document_path, DIM)
        .await
        .unwrap();
    assert_eq!(kb.len(), 2);
    assert_eq!(kb.document(0), Some("Summary with\n\nblank lines inside."));
    assert_eq!(kb.document(1), Some("Title\nAbstract."));

    // No sources this time: the answer comes only from what was persisted
    let generator = Arc::new(MockGenerator::new(400));
    let mut engine = engine_with(kb, Arc::clone(&generator));
    let result = engine.research(QUESTION).await.unwrap();
    assert_eq!(result.context.len(), 2);
    assert!(generator.prompts()[0].contains("Abstract."));
}

#[tokio::test]
async fn test_custom_prompt_template() {
    let (wiki, _) = StubSource::ok("Wikipedia", "context text");
    let generator = Arc::new(MockGenerator::new(400));
    let mut engine = engine_with(KnowledgeBase::in_memory(DIM), Arc::clone(&generator))
        .with_source(wiki)
        .with_prompt_template("Q: {question} C: {context}");

    engine.research("why").await.unwrap();
    assert_eq!(generator.prompts()[0], "Q: why C: context text");
}

struct BrokenGenerator;

#[async_trait]
impl AnswerGenerator for BrokenGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(SageError::Generation("model crashed".into()))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

#[tokio::test]
async fn test_generation_failure_returns_to_idle() {
    let (wiki, _) = StubSource::ok("Wikipedia", "context text");
    let mut engine = ResearchEngine::new(
        KnowledgeBase::in_memory(DIM),
        Arc::new(MockProvider::new(DIM)),
        Arc::new(BrokenGenerator),
    )
    .with_source(wiki);

    let err = engine.research(QUESTION).await.unwrap_err();
    assert!(matches!(err, SageError::Generation(_)));
    assert_eq!(engine.stage(), QueryStage::Idle);

    // Ingestion already happened before generation failed
    assert_eq!(engine.knowledge().len(), 1);
}
