use rig::embeddings::Embedding;
use rig::vector_store::VectorStoreError;
use rusqlite::ffi::sqlite3_auto_extension;
use serde::{Deserialize, Serialize};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};
use zerocopy::IntoBytes;

/// A knowledge-base entry as surfaced to the chat engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub topic: String,
    pub text: String,
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(path: P, dims: usize) -> Result<Self, VectorStoreError> {
        info!("Initializing SQLite store at {:?}", path.as_ref());
        unsafe {
            sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
        }

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| VectorStoreError::DatastoreError(Box::new(e)))?;
            }
        }

        let conn = Connection::open(path)
            .await
            .map_err(|e| VectorStoreError::DatastoreError(Box::new(e)))?;

        debug!("Running initial migrations");
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "BEGIN;
                CREATE TABLE IF NOT EXISTS entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    doc_id TEXT UNIQUE NOT NULL,
                    topic TEXT NOT NULL,
                    text TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_entries_doc_id ON entries(doc_id);
                CREATE VIRTUAL TABLE IF NOT EXISTS entry_embeddings USING vec0(embedding float[{}]);
                COMMIT;",
                dims
            ))
            .map_err(tokio_rusqlite::Error::from)
        })
        .await
        .map_err(|e| VectorStoreError::DatastoreError(Box::new(e)))?;

        Ok(Self { conn })
    }

    /// Drops every stored entry and its embeddings. Ingestion rebuilds the
    /// store from scratch rather than reconciling in place.
    pub async fn reset(&self) -> Result<(), VectorStoreError> {
        info!("Resetting store");
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "BEGIN;
                    DELETE FROM entry_embeddings;
                    DELETE FROM entries;
                    COMMIT;",
                )
                .map_err(tokio_rusqlite::Error::from)
            })
            .await
            .map_err(|e| VectorStoreError::DatastoreError(Box::new(e)))
    }

    pub async fn count(&self) -> Result<usize, VectorStoreError> {
        self.conn
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM entries", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|n| n as usize)
                .map_err(tokio_rusqlite::Error::from)
            })
            .await
            .map_err(|e| VectorStoreError::DatastoreError(Box::new(e)))
    }

    pub async fn add_entries(
        &self,
        entries: Vec<(String, KnowledgeEntry, Vec<Embedding>)>,
    ) -> Result<(), VectorStoreError> {
        info!("Adding {} entries to store", entries.len());
        self.conn
            .call(|conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::from)?;

                for (doc_id, entry, embeddings) in entries {
                    debug!("Storing entry with id {}", doc_id);
                    tx.execute(
                        "INSERT OR REPLACE INTO entries (doc_id, topic, text) VALUES (?1, ?2, ?3)",
                        rusqlite::params![doc_id, entry.topic, entry.text],
                    )
                    .map_err(tokio_rusqlite::Error::from)?;

                    let row_id = tx.last_insert_rowid();

                    let mut stmt = tx
                        .prepare("INSERT INTO entry_embeddings (rowid, embedding) VALUES (?1, ?2)")
                        .map_err(tokio_rusqlite::Error::from)?;

                    for embedding in embeddings {
                        let vec = Self::serialize_embedding(&embedding);
                        let blob = rusqlite::types::Value::Blob(vec.as_slice().as_bytes().to_vec());
                        stmt.execute(rusqlite::params![row_id, blob])
                            .map_err(tokio_rusqlite::Error::from)?;
                    }
                }

                tx.commit().map_err(tokio_rusqlite::Error::from)?;
                Ok(())
            })
            .await
            .map_err(|e| VectorStoreError::DatastoreError(Box::new(e)))?;

        Ok(())
    }

    /// KNN search against the vec0 table with a pre-computed query embedding.
    /// Returns `(distance, doc_id, entry)` rows ordered nearest first; the
    /// distance is vec0's L2 metric.
    pub async fn search(
        &self,
        embedding: &Embedding,
        k: usize,
    ) -> Result<Vec<(f64, String, KnowledgeEntry)>, VectorStoreError> {
        debug!("Finding {} nearest entries", k);
        let query_vec = Self::serialize_embedding(embedding);

        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT d.doc_id, d.topic, d.text, e.distance
                     FROM entry_embeddings e
                     JOIN entries d ON e.rowid = d.id
                     WHERE e.embedding MATCH ?1 AND k = ?2
                     ORDER BY e.distance",
                )?;

                let rows = stmt
                    .query_map(rusqlite::params![query_vec.as_slice().as_bytes(), k], |row| {
                        Ok((
                            row.get::<_, f64>(3)?,
                            row.get::<_, String>(0)?,
                            KnowledgeEntry {
                                topic: row.get(1)?,
                                text: row.get(2)?,
                            },
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(|e| VectorStoreError::DatastoreError(Box::new(e)))?;

        debug!("Found {} potential matches", rows.len());
        Ok(rows)
    }

    fn serialize_embedding(embedding: &Embedding) -> Vec<f32> {
        embedding.vec.iter().map(|x| *x as f32).collect()
    }
}
