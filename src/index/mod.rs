//! Similarity index over feedback history
//!
//! Finds past corrections relevant to a new bug. Two strategies: lexical
//! token overlap (always available) and dense nearest-neighbor over
//! embeddings (higher recall, needs the embedding collaborator).
//!
//! Queries run against an immutable snapshot; `rebuild` constructs a fresh
//! snapshot and swaps it in on completion, so readers never block and a
//! query started before a concurrent append simply sees the prior
//! generation.

pub mod embeddings;
pub mod lexical;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Result, TriageError};
use crate::feedback::{FeedbackRecord, FeedbackStore};

pub use embeddings::{cosine_similarity, Embedder, HttpEmbedder};

/// How similarity between a bug and past feedback is scored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStrategy {
    /// Token-set Jaccard overlap; no external dependency
    #[default]
    Lexical,
    /// Cosine over embeddings; requires an embedding collaborator
    Dense,
}

impl FromStr for IndexStrategy {
    type Err = TriageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lexical" => Ok(IndexStrategy::Lexical),
            "dense" => Ok(IndexStrategy::Dense),
            other => Err(TriageError::Config(format!(
                "unknown index strategy {other:?} (expected \"lexical\" or \"dense\")"
            ))),
        }
    }
}

impl std::fmt::Display for IndexStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexStrategy::Lexical => write!(f, "lexical"),
            IndexStrategy::Dense => write!(f, "dense"),
        }
    }
}

struct IndexedEntry {
    record: FeedbackRecord,
    tokens: HashSet<String>,
    /// Present in dense mode; records that could not be embedded are
    /// excluded from dense retrieval
    embedding: Option<Vec<f32>>,
}

/// One immutable index generation
#[derive(Default)]
struct IndexSnapshot {
    generation: u64,
    entries: Vec<IndexedEntry>,
}

/// Similarity index backed by the feedback store
pub struct SimilarityIndex {
    store: FeedbackStore,
    strategy: IndexStrategy,
    embedder: Option<Arc<dyn Embedder>>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    rebuild_lock: Mutex<()>,
}

impl SimilarityIndex {
    /// Create an empty index. Call `rebuild` to populate it.
    ///
    /// Requesting the dense strategy without an embedder falls back to
    /// lexical, since dense scoring is impossible without one.
    pub fn new(
        store: FeedbackStore,
        strategy: IndexStrategy,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let strategy = if strategy == IndexStrategy::Dense && embedder.is_none() {
            warn!("Dense index strategy requested without an embedder, using lexical");
            IndexStrategy::Lexical
        } else {
            strategy
        };

        Self {
            store,
            strategy,
            embedder,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// The strategy actually in effect after any fallback
    pub fn strategy(&self) -> IndexStrategy {
        self.strategy
    }

    /// Rebuild the index from the current store contents.
    ///
    /// Serialized against itself; concurrent queries keep reading the prior
    /// generation until the swap. Idempotent for a fixed store state.
    /// Returns the number of indexed records.
    pub async fn rebuild(&self) -> Result<usize> {
        let _guard = self.rebuild_lock.lock().await;

        let records = self.store.all().await?;
        let generation = self.snapshot.read().await.generation + 1;

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let tokens = lexical::tokenize(&record.bug_signature);
            let embedding = match (self.strategy, &record.embedding, &self.embedder) {
                (IndexStrategy::Dense, Some(existing), _) => Some(existing.clone()),
                (IndexStrategy::Dense, None, Some(embedder)) => {
                    // Backfill in memory only; the stored record stays as-is
                    match embedder.embed(&record.bug_signature).await {
                        Ok(vector) => Some(vector),
                        Err(e) => {
                            warn!(
                                record_id = %record.id,
                                "Could not embed feedback record, excluded from dense retrieval: {e}"
                            );
                            None
                        }
                    }
                }
                _ => None,
            };
            entries.push(IndexedEntry {
                record,
                tokens,
                embedding,
            });
        }

        let count = entries.len();
        let snapshot = Arc::new(IndexSnapshot {
            generation,
            entries,
        });
        *self.snapshot.write().await = snapshot;

        info!(generation, records = count, "Similarity index rebuilt");
        Ok(count)
    }

    /// Top-k feedback records similar to `bug_text`, descending score,
    /// scores in [0, 1], nothing below `min_similarity`. An empty (or
    /// never-rebuilt) index yields an empty result. Ties break by
    /// most-recent-timestamp-first so results are deterministic for a
    /// fixed snapshot.
    pub async fn query(
        &self,
        bug_text: &str,
        k: usize,
        min_similarity: f64,
    ) -> Result<Vec<(FeedbackRecord, f64)>> {
        let snapshot = self.snapshot.read().await.clone();

        if snapshot.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f64)> = match self.strategy {
            IndexStrategy::Lexical => {
                let query_tokens = lexical::tokenize(bug_text);
                snapshot
                    .entries
                    .iter()
                    .enumerate()
                    .map(|(i, entry)| (i, lexical::jaccard(&query_tokens, &entry.tokens)))
                    .collect()
            }
            IndexStrategy::Dense => {
                let embedder = self.embedder.as_ref().ok_or_else(|| {
                    TriageError::Retrieval("dense strategy with no embedder".to_string())
                })?;
                let query_embedding = embedder
                    .embed(bug_text)
                    .await
                    .map_err(|e| TriageError::Retrieval(format!("query embedding: {e}")))?;
                snapshot
                    .entries
                    .iter()
                    .enumerate()
                    .filter_map(|(i, entry)| {
                        entry.embedding.as_ref().map(|emb| {
                            // Clamp: anti-correlated vectors are simply irrelevant
                            let score =
                                f64::from(cosine_similarity(&query_embedding, emb)).clamp(0.0, 1.0);
                            (i, score)
                        })
                    })
                    .collect()
            }
        };

        scored.retain(|(_, score)| *score >= min_similarity);
        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ra = &snapshot.entries[*ia].record;
                    let rb = &snapshot.entries[*ib].record;
                    rb.created_at
                        .cmp(&ra.created_at)
                        .then_with(|| ra.id.cmp(&rb.id))
                })
        });
        scored.truncate(k);

        debug!(
            hits = scored.len(),
            generation = snapshot.generation,
            "Similarity query"
        );

        Ok(scored
            .into_iter()
            .map(|(i, score)| (snapshot.entries[i].record.clone(), score))
            .collect())
    }
}
