//! Retrieval of grounding passages for knowledge questions.
//!
//! The answerers only see the [`Retriever`] trait. The concrete pieces are
//! a recursive [`TextSplitter`], a SQLite [`KnowledgeStore`] holding chunk
//! embeddings, the [`Ingestor`] that fills it from text files, and the
//! [`EmbeddingRetriever`] that ranks stored chunks against an embedded
//! query.

mod chunker;
mod ingest;
mod schema;
mod store;

pub use chunker::{TextSplitter, DEFAULT_SEPARATORS};
pub use ingest::{IngestConfig, IngestReport, Ingestor};
pub use store::{cosine_similarity, IngestionRecord, KnowledgeStore, StoredChunk};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::llm::{EmbeddingRequest, LLMClient};

/// A ranked passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    /// Similarity to the query, higher is better
    pub score: f32,
}

impl Passage {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
        }
    }
}

/// Similarity search over the knowledge base.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` passages ranked best first. An empty result is not an error.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>>;
}

/// Retriever for runs without a knowledge base.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyRetriever;

#[async_trait]
impl Retriever for EmptyRetriever {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>> {
        Ok(Vec::new())
    }
}

/// Embeds the query and ranks the stored chunks of one collection.
pub struct EmbeddingRetriever {
    client: Arc<dyn LLMClient>,
    store: KnowledgeStore,
    collection: String,
    embedding_model: Option<String>,
}

impl EmbeddingRetriever {
    pub fn new(client: Arc<dyn LLMClient>, store: KnowledgeStore, collection: impl Into<String>) -> Self {
        Self {
            client,
            store,
            collection: collection.into(),
            embedding_model: None,
        }
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }
}

#[async_trait]
impl Retriever for EmbeddingRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        if k == 0 || self.store.chunk_count(&self.collection)? == 0 {
            return Ok(Vec::new());
        }

        let mut request = EmbeddingRequest::query(query);
        if let Some(model) = &self.embedding_model {
            request = request.with_model(model.clone());
        }
        let response = self.client.embed(request).await?;
        let embedding = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::LLM("embedding response was empty".to_string()))?;

        let passages = self.store.search(&self.collection, &embedding, k)?;
        debug!(collection = %self.collection, hits = passages.len(), "retrieved passages");
        Ok(passages)
    }
}
