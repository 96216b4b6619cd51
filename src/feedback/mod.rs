//! Feedback store
//!
//! Persists every human judgment (confirmation or correction) about a bug's
//! feature assignment. History is append-only: corrections are new records,
//! never edits, so the trail stays auditable. A persisted review queue holds
//! bugs awaiting a decision across process restarts.

pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, TriageError};
use crate::index::embeddings::Embedder;

pub use sqlite::SqliteFeedbackStore;

/// One persisted human judgment about a bug's feature assignment.
///
/// `model_suggestion` and `human_decision` are feature IDs drawn from
/// `candidate_features`, or `None` for the explicit "none" answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Unique record ID
    pub id: String,
    /// Bug text (title + description) at judgment time
    pub bug_signature: String,
    /// Candidate feature IDs presented at judgment time, in input order
    pub candidate_features: Vec<String>,
    /// What the model suggested, if it produced an answer
    pub model_suggestion: Option<String>,
    /// What the human decided
    pub human_decision: Option<String>,
    /// Free-text justification supplied by the reviewer
    #[serde(default)]
    pub rationale: String,
    /// When the judgment was recorded
    pub created_at: DateTime<Utc>,
    /// Embedding of the bug signature, if an embedder was available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl FeedbackRecord {
    /// Build a new record stamped with a fresh ID and the current time.
    pub fn new(
        bug_signature: impl Into<String>,
        candidate_features: Vec<String>,
        model_suggestion: Option<String>,
        human_decision: Option<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            bug_signature: bug_signature.into(),
            candidate_features,
            model_suggestion,
            human_decision,
            rationale: rationale.into(),
            created_at: Utc::now(),
            embedding: None,
        }
    }

    /// A decision must name a candidate that existed at judgment time,
    /// or be the explicit "none".
    pub fn validate(&self) -> Result<()> {
        if let Some(decision) = &self.human_decision {
            if !self.candidate_features.iter().any(|c| c == decision) {
                return Err(TriageError::Validation(format!(
                    "human decision {decision:?} is not among the {} candidate features recorded for bug {:?}",
                    self.candidate_features.len(),
                    self.bug_signature,
                )));
            }
        }
        Ok(())
    }
}

/// A bug waiting for a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReview {
    pub bug_id: String,
    pub bug_signature: String,
    /// Candidates the reviewer may choose from
    pub candidate_features: Vec<String>,
    /// The model's suggestion, shown to the reviewer for context
    pub model_suggestion: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

/// Feedback store combining SQLite persistence with optional
/// embedding enrichment on append.
#[derive(Clone)]
pub struct FeedbackStore {
    sqlite: Arc<SqliteFeedbackStore>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl FeedbackStore {
    /// Open the store, enriching future records with embeddings when an
    /// embedder is supplied.
    pub async fn open<P: AsRef<Path>>(
        path: P,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let sqlite = Arc::new(SqliteFeedbackStore::new(path).await?);
        Ok(Self { sqlite, embedder })
    }

    /// Append one record, durable before return.
    ///
    /// Missing embeddings are computed here when possible; an embedding
    /// failure downgrades the record rather than losing the judgment.
    pub async fn append(&self, mut record: FeedbackRecord) -> Result<FeedbackRecord> {
        record.validate()?;

        if record.embedding.is_none() {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(&record.bug_signature).await {
                    Ok(vector) => record.embedding = Some(vector),
                    Err(e) => {
                        warn!("Embedding failed for feedback record, storing without: {e}");
                    }
                }
            }
        }

        self.sqlite.append(&record).await?;
        info!(
            record_id = %record.id,
            decision = record.human_decision.as_deref().unwrap_or("none"),
            "Recorded feedback"
        );
        Ok(record)
    }

    /// Full history in insertion order.
    pub async fn all(&self) -> Result<Vec<FeedbackRecord>> {
        self.sqlite.all().await
    }

    /// History for one bug signature, most recent first.
    pub async fn by_bug(&self, bug_signature: &str) -> Result<Vec<FeedbackRecord>> {
        self.sqlite.by_bug(bug_signature).await
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<usize> {
        self.sqlite.count().await
    }

    /// Queue a bug for human review.
    pub async fn enqueue_review(&self, review: PendingReview) -> Result<()> {
        self.sqlite.enqueue_review(&review).await
    }

    /// Bugs awaiting a decision, oldest first.
    pub async fn pending_reviews(&self) -> Result<Vec<PendingReview>> {
        self.sqlite.pending_reviews().await
    }

    /// Apply a human decision to a queued bug: the feedback record is
    /// persisted first, then the queue entry is removed, so a crash in
    /// between leaves a re-deliverable queue entry rather than a lost
    /// judgment.
    pub async fn complete_review(
        &self,
        bug_id: &str,
        decision: Option<String>,
        rationale: &str,
    ) -> Result<FeedbackRecord> {
        let pending = self
            .sqlite
            .pending_review(bug_id)
            .await?
            .ok_or_else(|| {
                TriageError::Validation(format!("no pending review for bug {bug_id:?}"))
            })?;

        let record = FeedbackRecord::new(
            pending.bug_signature.clone(),
            pending.candidate_features.clone(),
            pending.model_suggestion.clone(),
            decision,
            rationale,
        );

        let record = self.append(record).await?;
        self.sqlite.remove_review(bug_id).await?;
        Ok(record)
    }

    /// Bulk-import records (e.g. restoring an exported history). Returns
    /// the number imported. Stops at the first invalid record; records
    /// appended before it stay, since history is append-only.
    pub async fn import(&self, records: Vec<FeedbackRecord>) -> Result<usize> {
        let mut imported = 0;
        for record in records {
            self.sqlite.append(&record).await?;
            imported += 1;
        }
        info!("Imported {imported} feedback records");
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_review_appends_and_dequeues() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::open(dir.path().join("feedback.db"), None)
            .await
            .unwrap();

        store
            .enqueue_review(PendingReview {
                bug_id: "BUG-3".to_string(),
                bug_signature: "search returns stale results".to_string(),
                candidate_features: vec!["FEAT-1".to_string(), "FEAT-2".to_string()],
                model_suggestion: Some("FEAT-1".to_string()),
                enqueued_at: Utc::now(),
            })
            .await
            .unwrap();

        let record = store
            .complete_review("BUG-3", Some("FEAT-2".to_string()), "index invalidation bug")
            .await
            .unwrap();

        assert_eq!(record.human_decision.as_deref(), Some("FEAT-2"));
        assert_eq!(record.model_suggestion.as_deref(), Some("FEAT-1"));
        assert!(store.pending_reviews().await.unwrap().is_empty());

        let history = store.by_bug("search returns stale results").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, record.id);
    }

    #[tokio::test]
    async fn complete_review_rejects_unknown_bug() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::open(dir.path().join("feedback.db"), None)
            .await
            .unwrap();

        let err = store
            .complete_review("BUG-404", None, "")
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));
    }

    #[tokio::test]
    async fn complete_review_rejects_decision_outside_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::open(dir.path().join("feedback.db"), None)
            .await
            .unwrap();

        store
            .enqueue_review(PendingReview {
                bug_id: "BUG-5".to_string(),
                bug_signature: "upload fails".to_string(),
                candidate_features: vec!["FEAT-1".to_string()],
                model_suggestion: None,
                enqueued_at: Utc::now(),
            })
            .await
            .unwrap();

        let err = store
            .complete_review("BUG-5", Some("FEAT-77".to_string()), "")
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::Validation(_)));

        // Failed validation must leave the queue entry intact
        assert_eq!(store.pending_reviews().await.unwrap().len(), 1);
    }
}
