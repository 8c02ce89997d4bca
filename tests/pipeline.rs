use std::sync::Arc;

use async_trait::async_trait;
use pdf_rag::chat::ChatEngine;
use pdf_rag::chunk::TextSplitter;
use pdf_rag::config::DuplicatePolicy;
use pdf_rag::embedding::{EmbeddingProvider, HashEmbeddings};
use pdf_rag::error::RagError;
use pdf_rag::extract::join_pages;
use pdf_rag::ingest::DocumentProcessor;
use pdf_rag::llm::ChatModel;
use pdf_rag::provider::ProviderError;
use pdf_rag::store::{SqliteVectorStore, VectorStore};
use tempfile::TempDir;

struct CannedModel;

#[async_trait]
impl ChatModel for CannedModel {
    fn provider_name(&self) -> &str {
        "canned"
    }

    fn model_name(&self) -> &str {
        "canned-1"
    }

    async fn generate(&self, _system: &str, prompt: &str) -> Result<String, ProviderError> {
        Ok(format!("answered from {} prompt chars", prompt.chars().count()))
    }
}

struct Harness {
    _tmp: TempDir,
    store: Arc<SqliteVectorStore>,
    processor: DocumentProcessor,
    engine: ChatEngine,
}

async fn harness(dims: usize) -> Harness {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(
        SqliteVectorStore::open(&tmp.path().join("db/vector_store"))
            .await
            .unwrap(),
    );
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddings::new(dims));
    let processor = DocumentProcessor::new(
        store.clone(),
        embedder.clone(),
        TextSplitter::new(1000, 200),
        DuplicatePolicy::Replace,
    );
    let engine = ChatEngine::new(store.clone(), embedder, Arc::new(CannedModel), 5, 20);
    Harness {
        _tmp: tmp,
        store,
        processor,
        engine,
    }
}

fn manual_pages() -> Vec<String> {
    let topics = [
        "Installation requires a 12 volt supply and a grounded outlet.",
        "To reset the device hold the power button for ten seconds.",
        "The warranty covers manufacturing defects for two years.",
        "Clean the filter monthly with warm water and mild soap.",
    ];
    topics
        .iter()
        .map(|t| format!("{} ", t).repeat(30))
        .collect()
}

#[tokio::test]
async fn ingest_then_ask_cites_only_ingested_document() {
    let h = harness(256).await;
    let text = join_pages(&manual_pages());

    let outcome = h.processor.ingest_text("manual.pdf", &text).await.unwrap();
    assert!(outcome.chunks_created >= 4);
    assert_eq!(outcome.total_documents, outcome.chunks_created as u64);

    let answer = h
        .engine
        .chat("How do I reset the device?", Some(3))
        .await
        .unwrap();
    assert!(answer.answer.starts_with("answered from"));
    assert!(!answer.sources.is_empty());
    assert!(answer.sources.len() <= 3);
    assert!(answer.sources.iter().all(|s| s.source == "manual.pdf"));
    assert!(answer
        .sources
        .windows(2)
        .all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn page_markers_survive_chunking() {
    let h = harness(64).await;
    let text = join_pages(&manual_pages());
    h.processor.ingest_text("manual.pdf", &text).await.unwrap();

    let answer = h.engine.chat("Page 1", Some(20)).await.unwrap();
    assert!(answer
        .sources
        .iter()
        .any(|s| s.preview.contains("--- Page 1 ---")));
}

#[tokio::test]
async fn identical_questions_return_identical_sources() {
    let h = harness(128).await;
    h.processor
        .ingest_text("manual.pdf", &join_pages(&manual_pages()))
        .await
        .unwrap();
    h.processor
        .ingest_text("notes.pdf", "warranty claims need the original receipt")
        .await
        .unwrap();

    let first = h.engine.chat("warranty period", Some(4)).await.unwrap();
    let second = h.engine.chat("warranty period", Some(4)).await.unwrap();
    let indices = |a: &pdf_rag::models::ChatAnswer| {
        a.sources
            .iter()
            .map(|s| (s.source.clone(), s.chunk_index))
            .collect::<Vec<_>>()
    };
    assert_eq!(indices(&first), indices(&second));
}

#[tokio::test]
async fn clear_empties_store_and_chat_reports_empty() {
    let h = harness(64).await;
    h.processor
        .ingest_text("manual.pdf", &join_pages(&manual_pages()))
        .await
        .unwrap();
    assert!(h.store.count().await.unwrap() > 0);

    h.store.clear().await.unwrap();
    let status = h.store.status().await.unwrap();
    assert_eq!(status.total_documents, 0);
    assert!(!status.initialized);

    let err = h.engine.chat("anything", None).await.unwrap_err();
    assert!(matches!(err, RagError::EmptyStore));
}

#[tokio::test]
async fn reingest_same_file_does_not_duplicate() {
    let h = harness(64).await;
    let text = join_pages(&manual_pages());
    let first = h.processor.ingest_text("manual.pdf", &text).await.unwrap();
    let second = h.processor.ingest_text("manual.pdf", &text).await.unwrap();
    assert_eq!(first.total_documents, second.total_documents);
    assert_eq!(second.chunks_replaced, first.chunks_created as u64);
}

#[tokio::test]
async fn switching_embedding_width_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("vs");
    let store = Arc::new(SqliteVectorStore::open(&dir).await.unwrap());

    let narrow = DocumentProcessor::new(
        store.clone(),
        Arc::new(HashEmbeddings::new(32)),
        TextSplitter::new(1000, 200),
        DuplicatePolicy::Replace,
    );
    narrow.ingest_text("a.pdf", "first document").await.unwrap();

    let wide: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddings::new(64));
    let processor = DocumentProcessor::new(
        store.clone(),
        wide.clone(),
        TextSplitter::new(1000, 200),
        DuplicatePolicy::Replace,
    );
    let err = processor.ingest_text("b.pdf", "second").await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingMismatch { .. }));

    let engine = ChatEngine::new(store.clone(), wide, Arc::new(CannedModel), 5, 20);
    let err = engine.chat("first", None).await.unwrap_err();
    assert!(matches!(err, RagError::EmbeddingMismatch { .. }));
    assert_eq!(store.count().await.unwrap(), 1);
}
