//! Shared fixtures: an in-memory note source and a deterministic
//! vocabulary-count embedder, wired into a full engine stack on a temp dir.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recollect::config::{ChunkUnit, ChunkingConfig, RetrievalConfig};
use recollect::embedding::{EmbeddingCache, EmbeddingError, EmbeddingProvider};
use recollect::indexing::{IndexingOrchestrator, JobTracker};
use recollect::lexical::{LexicalBackend, TantivyLexicalIndex};
use recollect::notes::{Note, NoteSource};
use recollect::retrieval::RetrievalEngine;
use recollect::storage::Database;
use recollect::vector::{ExactVectorBackend, HnswBackend, VectorBackend, VectorStoreFacade};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const VOCAB: [&str; 8] = [
    "rotate", "keys", "dns", "records", "coffee", "grinder", "backup", "restic",
];

/// Deterministic embedder: one dimension per vocabulary word, counting
/// occurrences. Texts sharing words are cosine-similar.
pub struct KeywordEmbedder {
    pub calls: AtomicU64,
    pub fail: AtomicBool,
}

impl KeywordEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            fail: AtomicBool::new(false),
        })
    }

    fn vectorize(text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        VOCAB
            .iter()
            .map(|word| lowered.matches(word).count() as f32)
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Unavailable("scripted outage".to_string()));
        }
        Ok(Self::vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Unavailable("scripted outage".to_string()));
        }
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }

    fn model_name(&self) -> &str {
        "keyword-count"
    }

    fn provider_name(&self) -> &str {
        "fake"
    }
}

/// Mutable in-memory note collection standing in for the live notes app
pub struct FakeNoteSource {
    notes: Mutex<Vec<Note>>,
    pub fail: AtomicBool,
}

impl FakeNoteSource {
    pub fn new(notes: Vec<Note>) -> Arc<Self> {
        Arc::new(Self {
            notes: Mutex::new(notes),
            fail: AtomicBool::new(false),
        })
    }

    pub fn set_notes(&self, notes: Vec<Note>) {
        *self.notes.lock().unwrap() = notes;
    }
}

#[async_trait]
impl NoteSource for FakeNoteSource {
    async fn list_notes(&self, _user_id: &str) -> anyhow::Result<Vec<Note>> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("notes app unreachable");
        }
        Ok(self.notes.lock().unwrap().clone())
    }
}

pub fn note(id: &str, title: &str, content: &str, updated_at: DateTime<Utc>) -> Note {
    Note::new(id, title, content, updated_at)
}

pub struct Harness {
    pub _temp: TempDir,
    pub database: Arc<Database>,
    pub vector_store: Arc<VectorStoreFacade>,
    pub lexical: Arc<dyn LexicalBackend>,
    pub cache: Arc<EmbeddingCache>,
    pub embedder: Arc<KeywordEmbedder>,
    pub notes: Arc<FakeNoteSource>,
    pub orchestrator: Arc<IndexingOrchestrator>,
}

impl Harness {
    pub fn new(notes: Vec<Note>) -> Self {
        let temp = TempDir::new().unwrap();
        let database = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());
        let embedder = KeywordEmbedder::new();

        let exact = Arc::new(ExactVectorBackend::new(Arc::clone(&database)).unwrap());
        let hnsw = Arc::new(HnswBackend::new(VOCAB.len(), 200, 16, 64));
        let backends: Vec<Arc<dyn VectorBackend>> = vec![exact, hnsw];
        let vector_store = Arc::new(VectorStoreFacade::new(
            backends,
            Duration::from_secs(2),
        ));

        let lexical: Arc<dyn LexicalBackend> =
            Arc::new(TantivyLexicalIndex::new(temp.path().join("lexical")).unwrap());

        let cache = Arc::new(EmbeddingCache::new(1024 * 1024));
        let notes = FakeNoteSource::new(notes);

        let chunking = ChunkingConfig {
            unit: ChunkUnit::Characters,
            target_size: 200,
            overlap: 20,
        };

        let orchestrator = Arc::new(IndexingOrchestrator::new(
            Arc::clone(&notes) as Arc<dyn NoteSource>,
            Arc::clone(&database),
            Arc::clone(&vector_store),
            Arc::clone(&lexical),
            Arc::clone(&cache),
            Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>,
            Arc::new(JobTracker::new()),
            chunking,
            2,
        ));

        Self {
            _temp: temp,
            database,
            vector_store,
            lexical,
            cache,
            embedder,
            notes,
            orchestrator,
        }
    }

    pub fn engine(&self, config: RetrievalConfig) -> RetrievalEngine {
        self.engine_with_llm(config, None)
    }

    pub fn engine_with_llm(
        &self,
        config: RetrievalConfig,
        completion: Option<Arc<dyn recollect::llm::CompletionProvider>>,
    ) -> RetrievalEngine {
        RetrievalEngine::new(
            Arc::clone(&self.database),
            Arc::clone(&self.vector_store),
            Arc::clone(&self.lexical),
            Arc::clone(&self.cache),
            Arc::clone(&self.embedder) as Arc<dyn EmbeddingProvider>,
            completion,
            config,
        )
    }
}
