//! SQLite-backed chunk store with embedding similarity search.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::schema::initialize_schema;
use super::Passage;
use crate::error::{Error, Result};

/// A chunk with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Ledger entry for the last ingestion of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionRecord {
    pub collection: String,
    /// Source description (file list)
    pub source: String,
    /// sha256 of the ingested text, hex encoded
    pub fingerprint: String,
    pub chunk_count: usize,
    pub embedding_model: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

/// Knowledge chunks grouped into named collections.
#[derive(Clone)]
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
}

impl KnowledgeStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&mut conn).map_err(|e| Error::Storage(e.to_string()))
    }

    /// Replace every chunk of `collection` and record the ingestion, in one
    /// transaction.
    pub fn replace_collection(&self, chunks: &[StoredChunk], record: &IngestionRecord) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM chunks WHERE collection = ?1",
                params![record.collection],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO chunks (collection, position, content, embedding)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (position, chunk) in chunks.iter().enumerate() {
                    stmt.execute(params![
                        record.collection,
                        position as i64,
                        chunk.content,
                        encode_embedding(&chunk.embedding),
                    ])?;
                }
            }
            tx.execute(
                "INSERT OR REPLACE INTO ingestions
                    (collection, source, fingerprint, chunk_count, embedding_model, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.collection,
                    record.source,
                    record.fingerprint,
                    record.chunk_count as i64,
                    record.embedding_model,
                    record.ingested_at.to_rfc3339(),
                ],
            )?;
            tx.commit()
        })
    }

    /// Last ingestion of `collection`, if any.
    pub fn ingestion(&self, collection: &str) -> Result<Option<IngestionRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT collection, source, fingerprint, chunk_count, embedding_model, ingested_at
                 FROM ingestions WHERE collection = ?1",
                params![collection],
                |row| {
                    let ingested_at: String = row.get(5)?;
                    Ok(IngestionRecord {
                        collection: row.get(0)?,
                        source: row.get(1)?,
                        fingerprint: row.get(2)?,
                        chunk_count: row.get::<_, i64>(3)? as usize,
                        embedding_model: row.get(4)?,
                        ingested_at: DateTime::parse_from_rfc3339(&ingested_at)
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    })
                },
            )
            .optional()
        })
    }

    /// Number of chunks stored in `collection`.
    pub fn chunk_count(&self, collection: &str) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
                params![collection],
                |row| row.get::<_, i64>(0),
            )
        })
        .map(|n| n as usize)
    }

    /// All chunks of `collection` in insertion order.
    pub fn chunks(&self, collection: &str) -> Result<Vec<StoredChunk>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT content, embedding FROM chunks WHERE collection = ?1 ORDER BY position",
            )?;
            let rows = stmt.query_map(params![collection], |row| {
                Ok(StoredChunk {
                    content: row.get(0)?,
                    embedding: decode_embedding(&row.get::<_, Vec<u8>>(1)?),
                })
            })?;
            rows.collect()
        })
    }

    /// The `k` chunks most similar to `query` by cosine similarity, best first.
    pub fn search(&self, collection: &str, query: &[f32], k: usize) -> Result<Vec<Passage>> {
        let mut scored: Vec<Passage> = self
            .chunks(collection)?
            .into_iter()
            .map(|chunk| Passage::new(chunk.content, cosine_similarity(query, &chunk.embedding)))
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}

/// Cosine similarity; 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(collection: &str, fingerprint: &str, chunk_count: usize) -> IngestionRecord {
        IngestionRecord {
            collection: collection.to_string(),
            source: "knowledge_base.txt".to_string(),
            fingerprint: fingerprint.to_string(),
            chunk_count,
            embedding_model: Some("text-embedding-004".to_string()),
            ingested_at: Utc::now(),
        }
    }

    fn chunk(content: &str, embedding: &[f32]) -> StoredChunk {
        StoredChunk {
            content: content.to_string(),
            embedding: embedding.to_vec(),
        }
    }

    #[test]
    fn test_replace_and_search() {
        let store = KnowledgeStore::in_memory().unwrap();
        store
            .replace_collection(
                &[
                    chunk("Hà Nội là thủ đô.", &[1.0, 0.0, 0.0]),
                    chunk("Sông Hồng chảy qua Hà Nội.", &[0.7, 0.7, 0.0]),
                    chunk("Phở là món ăn.", &[0.0, 0.0, 1.0]),
                ],
                &record("kb", "abc", 3),
            )
            .unwrap();

        let hits = store.search("kb", &[1.0, 0.1, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "Hà Nội là thủ đô.");
        assert_eq!(hits[1].text, "Sông Hồng chảy qua Hà Nội.");
        assert!(hits[0].score > hits[1].score);

        assert!(store.search("other", &[1.0, 0.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_replace_discards_previous_chunks() {
        let store = KnowledgeStore::in_memory().unwrap();
        store
            .replace_collection(&[chunk("cũ", &[1.0]), chunk("cũ 2", &[1.0])], &record("kb", "v1", 2))
            .unwrap();
        store
            .replace_collection(&[chunk("mới", &[0.5])], &record("kb", "v2", 1))
            .unwrap();

        assert_eq!(store.chunk_count("kb").unwrap(), 1);
        assert_eq!(store.chunks("kb").unwrap(), vec![chunk("mới", &[0.5])]);

        let ledger = store.ingestion("kb").unwrap().unwrap();
        assert_eq!(ledger.fingerprint, "v2");
        assert_eq!(ledger.chunk_count, 1);
        assert!(store.ingestion("missing").unwrap().is_none());
    }

    #[test]
    fn test_open_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("knowledge.sqlite");

        KnowledgeStore::open(&path)
            .unwrap()
            .replace_collection(&[chunk("bền vững", &[0.25, -1.5])], &record("kb", "f", 1))
            .unwrap();

        let reopened = KnowledgeStore::open(&path).unwrap();
        assert_eq!(reopened.chunks("kb").unwrap(), vec![chunk("bền vững", &[0.25, -1.5])]);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }
}
