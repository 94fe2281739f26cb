//! Similarity-based agent selection over descriptor embeddings.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;

/// Produces an embedding vector for a text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A similarity hit returned by selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionMatch {
    pub agent_id: String,
    pub agent_name: String,
    pub similarity: f32,
}

/// Caches one embedding per agent id and answers nearest-descriptor queries.
///
/// Embeddings are recomputed asynchronously on reload; until a fresh vector
/// lands, queries read whichever vector is present. An agent with no vector
/// is excluded from similarity search (never from listings).
pub struct AgentSelector {
    embedder: Option<Arc<dyn Embedder>>,
    embeddings: Arc<Mutex<HashMap<String, Vec<f32>>>>,
}

impl AgentSelector {
    pub fn new(embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            embedder,
            embeddings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Recompute an agent's embedding in the background.
    pub fn upsert(&self, id: String, descriptor: String) {
        let Some(embedder) = self.embedder.clone() else {
            return;
        };
        let embeddings = Arc::clone(&self.embeddings);
        tokio::spawn(async move {
            match embedder.embed(&descriptor).await {
                Ok(vector) => {
                    embeddings
                        .lock()
                        .expect("embedding cache lock poisoned")
                        .insert(id, vector);
                }
                Err(e) => {
                    tracing::warn!(
                        agent = %id,
                        error = %e,
                        "embedding failed; agent excluded from similarity search"
                    );
                }
            }
        });
    }

    /// Recompute an agent's embedding inline (startup and tests).
    pub async fn refresh(&self, id: &str, descriptor: &str) {
        let Some(embedder) = &self.embedder else {
            return;
        };
        match embedder.embed(descriptor).await {
            Ok(vector) => {
                self.embeddings
                    .lock()
                    .expect("embedding cache lock poisoned")
                    .insert(id.to_string(), vector);
            }
            Err(e) => {
                tracing::warn!(agent = %id, error = %e, "embedding failed");
            }
        }
    }

    pub fn remove(&self, id: &str) {
        self.embeddings
            .lock()
            .expect("embedding cache lock poisoned")
            .remove(id);
    }

    /// Top `n` agent ids by cosine similarity, ties broken by id.
    pub async fn find_top(&self, task: &str, n: usize) -> Result<Vec<(String, f32)>> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        let query = embedder.embed(task).await?;

        let snapshot = self
            .embeddings
            .lock()
            .expect("embedding cache lock poisoned")
            .clone();

        let mut scored: Vec<(String, f32)> = snapshot
            .into_iter()
            .map(|(id, vector)| {
                let similarity = cosine(&query, &vector);
                (id, similarity)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(n);
        Ok(scored)
    }
}

/// Cosine similarity; zero for mismatched or zero-norm vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
