//! Lexical index: ranked BM25 full-text search over chunk content
//!
//! Backed by tantivy. Results are scoped to one user's chunks and may carry
//! highlighted snippets.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::snippet::SnippetGenerator;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError, Term};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LexicalIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),

    #[error("Query parsing error: {0}")]
    QueryParseError(String),
}

/// A chunk's lexical projection, the indexing unit
#[derive(Debug, Clone)]
pub struct LexicalChunk {
    pub chunk_id: i64,
    pub note_id: String,
    pub user_id: String,
    pub content: String,
}

/// Search result with BM25 relevance score
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: i64,
    pub score: f32,
    /// Highlighted snippet, when requested
    pub snippet: Option<String>,
}

/// Ranked lexical search plus the writes that keep it in sync
#[async_trait]
pub trait LexicalBackend: Send + Sync {
    async fn index_chunks(&self, chunks: &[LexicalChunk]) -> Result<(), LexicalIndexError>;

    async fn delete_by_note(&self, note_id: &str) -> Result<(), LexicalIndexError>;

    async fn delete_by_user(&self, user_id: &str) -> Result<(), LexicalIndexError>;

    /// Make pending writes visible to searches
    async fn commit(&self) -> Result<(), LexicalIndexError>;

    async fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
        with_highlights: bool,
    ) -> Result<Vec<LexicalHit>, LexicalIndexError>;
}

/// Tantivy-backed lexical index
pub struct TantivyLexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    chunk_id_field: Field,
    note_id_field: Field,
    user_id_field: Field,
    content_field: Field,
}

impl TantivyLexicalIndex {
    /// Open an index directory, creating it when absent
    pub fn new(index_path: PathBuf) -> Result<Self, LexicalIndexError> {
        if index_path.exists() && index_path.join("meta.json").exists() {
            Self::load(index_path)
        } else {
            Self::create(index_path)
        }
    }

    fn create(index_path: PathBuf) -> Result<Self, LexicalIndexError> {
        std::fs::create_dir_all(&index_path)?;

        let mut schema_builder = Schema::builder();
        let chunk_id_field = schema_builder.add_u64_field("chunk_id", INDEXED | STORED);
        let note_id_field = schema_builder.add_text_field("note_id", STRING | STORED);
        let user_id_field = schema_builder.add_text_field("user_id", STRING);
        let content_field = schema_builder.add_text_field("content", TEXT | STORED);
        let schema = schema_builder.build();

        let index = Index::create_in_dir(&index_path, schema)
            .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?;

        Self::finish_open(index, chunk_id_field, note_id_field, user_id_field, content_field)
    }

    fn load(index_path: PathBuf) -> Result<Self, LexicalIndexError> {
        let index = Index::open_in_dir(&index_path)
            .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?;

        let schema = index.schema();
        let field = |name: &str| {
            schema.get_field(name).map_err(|_| {
                LexicalIndexError::InitializationError(format!("Missing '{}' field in schema", name))
            })
        };

        let chunk_id_field = field("chunk_id")?;
        let note_id_field = field("note_id")?;
        let user_id_field = field("user_id")?;
        let content_field = field("content")?;

        Self::finish_open(index, chunk_id_field, note_id_field, user_id_field, content_field)
    }

    fn finish_open(
        index: Index,
        chunk_id_field: Field,
        note_id_field: Field,
        user_id_field: Field,
        content_field: Field,
    ) -> Result<Self, LexicalIndexError> {
        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: TantivyError| LexicalIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            chunk_id_field,
            note_id_field,
            user_id_field,
            content_field,
        })
    }

    /// Number of searchable documents
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LexicalBackend for TantivyLexicalIndex {
    async fn index_chunks(&self, chunks: &[LexicalChunk]) -> Result<(), LexicalIndexError> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        for chunk in chunks {
            writer
                .add_document(doc!(
                    self.chunk_id_field => chunk.chunk_id as u64,
                    self.note_id_field => chunk.note_id.as_str(),
                    self.user_id_field => chunk.user_id.as_str(),
                    self.content_field => chunk.content.as_str(),
                ))
                .map_err(|e| LexicalIndexError::InsertError(e.to_string()))?;
        }
        Ok(())
    }

    async fn delete_by_note(&self, note_id: &str) -> Result<(), LexicalIndexError> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.delete_term(Term::from_field_text(self.note_id_field, note_id));
        Ok(())
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<(), LexicalIndexError> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.delete_term(Term::from_field_text(self.user_id_field, user_id));
        Ok(())
    }

    async fn commit(&self) -> Result<(), LexicalIndexError> {
        {
            let mut writer = self.writer.lock().expect("writer lock poisoned");
            writer
                .commit()
                .map_err(|e| LexicalIndexError::InsertError(e.to_string()))?;
        }

        self.reader
            .reload()
            .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
        with_highlights: bool,
    ) -> Result<Vec<LexicalHit>, LexicalIndexError> {
        // Empty query means no results, not "all chunks"
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let text_query = query_parser
            .parse_query(query)
            .map_err(|e| LexicalIndexError::QueryParseError(e.to_string()))?;

        let user_query: Box<dyn Query> = Box::new(TermQuery::new(
            Term::from_field_text(self.user_id_field, user_id),
            IndexRecordOption::Basic,
        ));
        let scoped = BooleanQuery::new(vec![
            (Occur::Must, text_query),
            (Occur::Must, user_query),
        ]);

        let top_docs = searcher
            .search(&scoped, &TopDocs::with_limit(top_k))
            .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?;

        let snippet_generator = if with_highlights {
            Some(
                SnippetGenerator::create(&searcher, &scoped, self.content_field)
                    .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?,
            )
        } else {
            None
        };

        let mut hits = Vec::new();
        for (score, doc_address) in top_docs {
            let retrieved: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?;

            let chunk_id = retrieved
                .get_first(self.chunk_id_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    LexicalIndexError::SearchError("Missing or invalid chunk_id field".to_string())
                })? as i64;

            let snippet = snippet_generator
                .as_ref()
                .map(|generator| generator.snippet_from_doc(&retrieved).to_html());

            hits.push(LexicalHit {
                chunk_id,
                score,
                snippet,
            });
        }

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn index() -> (TantivyLexicalIndex, TempDir) {
        let temp = TempDir::new().unwrap();
        let index = TantivyLexicalIndex::new(temp.path().join("lexical")).unwrap();
        (index, temp)
    }

    fn chunk(id: i64, note: &str, user: &str, content: &str) -> LexicalChunk {
        LexicalChunk {
            chunk_id: id,
            note_id: note.to_string(),
            user_id: user.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_search() {
        let (index, _temp) = index();

        index
            .index_chunks(&[
                chunk(1, "n1", "u1", "The quick brown fox jumps over the lazy dog"),
                chunk(2, "n2", "u1", "A fast red fox leaps above a sleepy canine"),
                chunk(3, "n3", "u1", "Rust programming language tutorial"),
            ])
            .await
            .unwrap();
        index.commit().await.unwrap();

        let hits = index.search("fox", "u1", 10, false).await.unwrap();
        assert_eq!(hits.len(), 2);

        let hits = index.search("rust", "u1", 10, false).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 3);
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let (index, _temp) = index();
        index
            .index_chunks(&[chunk(1, "n1", "u1", "some content")])
            .await
            .unwrap();
        index.commit().await.unwrap();

        assert!(index.search("", "u1", 10, false).await.unwrap().is_empty());
        assert!(index.search("   ", "u1", 10, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_scoping() {
        let (index, _temp) = index();

        index
            .index_chunks(&[
                chunk(1, "n1", "alice", "postgres connection pooling"),
                chunk(2, "n2", "bob", "postgres replication setup"),
            ])
            .await
            .unwrap();
        index.commit().await.unwrap();

        let hits = index.search("postgres", "alice", 10, false).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 1);
    }

    #[tokio::test]
    async fn test_delete_by_note() {
        let (index, _temp) = index();

        index
            .index_chunks(&[
                chunk(1, "n1", "u1", "delete me please"),
                chunk(2, "n2", "u1", "keep me around"),
            ])
            .await
            .unwrap();
        index.commit().await.unwrap();

        index.delete_by_note("n1").await.unwrap();
        index.commit().await.unwrap();

        assert!(index.search("delete", "u1", 10, false).await.unwrap().is_empty());
        assert_eq!(index.search("keep", "u1", 10, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_highlights() {
        let (index, _temp) = index();

        index
            .index_chunks(&[chunk(
                1,
                "n1",
                "u1",
                "Kubernetes ingress controllers route external traffic",
            )])
            .await
            .unwrap();
        index.commit().await.unwrap();

        let hits = index.search("ingress", "u1", 10, true).await.unwrap();
        assert_eq!(hits.len(), 1);
        let snippet = hits[0].snippet.as_ref().unwrap();
        assert!(snippet.contains("<b>"));
    }

    #[tokio::test]
    async fn test_reload_existing_index() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lexical");

        {
            let index = TantivyLexicalIndex::new(path.clone()).unwrap();
            index
                .index_chunks(&[chunk(1, "n1", "u1", "persisted content")])
                .await
                .unwrap();
            index.commit().await.unwrap();
        }

        let index = TantivyLexicalIndex::new(path).unwrap();
        assert_eq!(index.len(), 1);
        let hits = index.search("persisted", "u1", 10, false).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
