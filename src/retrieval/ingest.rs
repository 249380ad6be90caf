//! Knowledge base ingestion: read files, chunk, embed, store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::chunker::TextSplitter;
use super::store::{IngestionRecord, KnowledgeStore, StoredChunk};
use crate::error::{Error, Result};
use crate::llm::{EmbeddingRequest, LLMClient};

/// Ingestion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub collection: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Texts per embedding request
    pub batch_size: usize,
    pub embedding_model: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            collection: "vnpt_knowledge_base".to_string(),
            chunk_size: 500,
            chunk_overlap: 50,
            batch_size: 64,
            embedding_model: None,
        }
    }
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub collection: String,
    pub files: Vec<PathBuf>,
    pub chunks: usize,
    /// True when the stored collection was already up to date
    pub skipped: bool,
}

/// Fills a [`KnowledgeStore`] collection from text files.
pub struct Ingestor {
    client: Arc<dyn LLMClient>,
    store: KnowledgeStore,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(client: Arc<dyn LLMClient>, store: KnowledgeStore, config: IngestConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Ingest every file matching `patterns` into the configured collection,
    /// replacing its previous contents.
    ///
    /// Skipped when the files, chunking and embedding model are unchanged
    /// since the last ingestion, unless `force` is set.
    #[instrument(skip(self, patterns), fields(collection = %self.config.collection))]
    pub async fn ingest(&self, patterns: &[String], force: bool) -> Result<IngestReport> {
        let files = expand_patterns(patterns)?;
        if files.is_empty() {
            return Err(Error::Config(format!(
                "no knowledge files matched {}",
                patterns.join(", ")
            )));
        }

        let mut text = String::new();
        for file in &files {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&std::fs::read_to_string(file)?);
        }

        let fingerprint = self.fingerprint(&text);
        let collection = &self.config.collection;
        if !force {
            if let Some(previous) = self.store.ingestion(collection)? {
                if previous.fingerprint == fingerprint && previous.chunk_count > 0 {
                    info!(chunks = previous.chunk_count, "knowledge base unchanged, skipping ingestion");
                    return Ok(IngestReport {
                        collection: collection.clone(),
                        files,
                        chunks: previous.chunk_count,
                        skipped: true,
                    });
                }
            }
        }

        let splitter = TextSplitter::new(self.config.chunk_size, self.config.chunk_overlap);
        let pieces = splitter.split(&text);
        if pieces.is_empty() {
            warn!("knowledge files contain no text");
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(self.config.batch_size.max(1)) {
            let mut request = EmbeddingRequest::documents(batch.to_vec());
            if let Some(model) = &self.config.embedding_model {
                request = request.with_model(model.clone());
            }
            let response = self.client.embed(request).await?;
            if response.embeddings.len() != batch.len() {
                return Err(Error::LLM(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    response.embeddings.len()
                )));
            }
            chunks.extend(
                batch
                    .iter()
                    .zip(response.embeddings)
                    .map(|(content, embedding)| StoredChunk {
                        content: content.clone(),
                        embedding,
                    }),
            );
        }

        let record = IngestionRecord {
            collection: collection.clone(),
            source: files
                .iter()
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            fingerprint,
            chunk_count: chunks.len(),
            embedding_model: self.config.embedding_model.clone(),
            ingested_at: Utc::now(),
        };
        self.store.replace_collection(&chunks, &record)?;

        info!(files = files.len(), chunks = chunks.len(), "ingested knowledge base");
        Ok(IngestReport {
            collection: collection.clone(),
            files,
            chunks: chunks.len(),
            skipped: false,
        })
    }

    /// Hash of everything that determines the stored chunks.
    fn fingerprint(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "size={};overlap={};model={}\n",
                self.config.chunk_size,
                self.config.chunk_overlap,
                self.config.embedding_model.as_deref().unwrap_or_default()
            )
            .as_bytes(),
        );
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Expand `~`/`$VAR` and glob patterns into a sorted list of files.
fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let expanded = shellexpand::full(pattern)
            .map_err(|e| Error::Config(format!("cannot expand '{}': {}", pattern, e)))?;
        let paths = glob::glob(&expanded)
            .map_err(|e| Error::Config(format!("invalid pattern '{}': {}", pattern, e)))?;
        for entry in paths.flatten() {
            if entry.is_file() && !files.contains(&entry) {
                files.push(entry);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedClient;

    fn setup(dir: &tempfile::TempDir) -> (Ingestor, KnowledgeStore, String) {
        std::fs::write(
            dir.path().join("a.txt"),
            "Hà Nội là thủ đô của Việt Nam.\n\nThành phố có nhiều hồ.",
        )
        .unwrap();
        std::fs::write(dir.path().join("b.txt"), "Phở là món ăn nổi tiếng.").unwrap();

        let store = KnowledgeStore::in_memory().unwrap();
        let config = IngestConfig {
            chunk_size: 40,
            chunk_overlap: 0,
            batch_size: 2,
            ..IngestConfig::default()
        };
        let ingestor = Ingestor::new(Arc::new(ScriptedClient::new(vec![])), store.clone(), config);
        let pattern = dir.path().join("*.txt").display().to_string();
        (ingestor, store, pattern)
    }

    #[tokio::test]
    async fn test_ingest_and_skip_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, store, pattern) = setup(&dir);

        let report = ingestor.ingest(&[pattern.clone()], false).await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.chunks, 3);
        assert_eq!(store.chunk_count("vnpt_knowledge_base").unwrap(), 3);

        let again = ingestor.ingest(&[pattern.clone()], false).await.unwrap();
        assert!(again.skipped);
        assert_eq!(again.chunks, 3);

        let forced = ingestor.ingest(&[pattern], true).await.unwrap();
        assert!(!forced.skipped);
        assert_eq!(store.chunk_count("vnpt_knowledge_base").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_changed_file_is_reingested() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, store, pattern) = setup(&dir);
        ingestor.ingest(&[pattern.clone()], false).await.unwrap();

        std::fs::write(dir.path().join("b.txt"), "Bún chả cũng nổi tiếng.").unwrap();
        let report = ingestor.ingest(&[pattern], false).await.unwrap();
        assert!(!report.skipped);

        let texts: Vec<String> = store
            .chunks("vnpt_knowledge_base")
            .unwrap()
            .into_iter()
            .map(|c| c.content)
            .collect();
        assert!(texts.iter().any(|t| t.contains("Bún chả")));
        assert!(!texts.iter().any(|t| t.contains("Phở")));
    }

    #[tokio::test]
    async fn test_no_matching_files_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ingestor, _, _) = setup(&dir);
        let pattern = dir.path().join("*.md").display().to_string();

        let err = ingestor.ingest(&[pattern], false).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
