use std::collections::HashMap;

use rig::embeddings::{EmbeddingModel, EmbeddingsBuilder};
use tracing::{debug, info, warn};

use crate::loaders::csv::KnowledgeDocument;
use crate::stores::sqlite::{KnowledgeEntry, SqliteStore};

pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.6;

#[derive(Clone)]
pub struct KnowledgeBase<E: EmbeddingModel> {
    store: SqliteStore,
    model: E,
}

impl<E: EmbeddingModel> KnowledgeBase<E> {
    pub fn new(store: SqliteStore, model: E) -> Self {
        Self { store, model }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub async fn add_documents(&mut self, documents: Vec<KnowledgeDocument>) -> anyhow::Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        info!(count = documents.len(), "Adding documents to KnowledgeBase");
        let mut builder = EmbeddingsBuilder::new(self.model.clone());
        let mut entries: HashMap<String, KnowledgeEntry> = HashMap::new();

        for doc in &documents {
            debug!(document_id = %doc.doc_id, "Adding document");
            builder = builder.simple_document(&doc.doc_id, &doc.embed_text);
            entries.insert(
                doc.doc_id.clone(),
                KnowledgeEntry {
                    topic: doc.topic.clone(),
                    text: doc.text.clone(),
                },
            );
        }

        debug!("Building embeddings");
        let embedded = builder.build().await?;

        let mut rows = Vec::new();
        for doc in embedded {
            let Some(entry) = entries.remove(&doc.id) else {
                warn!(document_id = %doc.id, "Embedded document has no source entry");
                continue;
            };
            rows.push((doc.id, entry, doc.embeddings));
        }

        let stored = rows.len();
        self.store.add_entries(rows).await?;

        info!(count = stored, "Successfully added documents to KnowledgeBase");
        Ok(stored)
    }

    /// Clears the store and re-ingests from scratch.
    pub async fn rebuild(&mut self, documents: Vec<KnowledgeDocument>) -> anyhow::Result<usize> {
        self.store.reset().await?;
        self.add_documents(documents).await
    }

    /// Embeds the query, fetches the `top_k` nearest entries and keeps those
    /// at or above the cosine-similarity cutoff, nearest first.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f64,
    ) -> anyhow::Result<Vec<KnowledgeEntry>> {
        let embedding = self.model.embed_document(query).await?;
        let hits = self.store.search(&embedding, top_k).await?;

        let mut results = Vec::new();
        for (distance, doc_id, entry) in hits {
            let similarity = similarity_from_distance(distance);
            if similarity >= min_similarity {
                debug!(doc_id = %doc_id, similarity, "Entry passed similarity cutoff");
                results.push(entry);
            } else {
                debug!(doc_id = %doc_id, similarity, "Entry below similarity cutoff");
            }
        }

        Ok(results)
    }
}

/// vec0 reports L2 distance; embeddings are unit length, so
/// `cos = 1 - d^2 / 2`.
pub fn similarity_from_distance(distance: f64) -> f64 {
    1.0 - (distance * distance) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        assert!((similarity_from_distance(0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn orthogonal_unit_vectors_have_similarity_zero() {
        // |a - b| = sqrt(2) for orthogonal unit vectors
        let d = std::f64::consts::SQRT_2;
        assert!(similarity_from_distance(d).abs() < 1e-9);
    }

    #[test]
    fn opposite_unit_vectors_have_similarity_minus_one() {
        assert!((similarity_from_distance(2.0) + 1.0).abs() < 1e-9);
    }
}
