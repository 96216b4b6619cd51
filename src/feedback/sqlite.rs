//! SQLite-backed persistence for feedback records and the review queue

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{Result, TriageError};

use super::{FeedbackRecord, PendingReview};

/// SQLite-backed feedback store
pub struct SqliteFeedbackStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteFeedbackStore {
    /// Open (or create) the store at the given path
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TriageError::Retrieval(format!("create store directory: {e}")))?;
        }

        let conn = Connection::open(&path)?;

        // WAL keeps concurrent readers off the writer's back
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Append-only feedback history; rowid preserves insertion order
            CREATE TABLE IF NOT EXISTS feedback (
                id TEXT PRIMARY KEY,
                bug_signature TEXT NOT NULL,
                candidate_features TEXT NOT NULL,
                model_suggestion TEXT,
                human_decision TEXT,
                rationale TEXT NOT NULL DEFAULT '',
                embedding BLOB,
                created_at TEXT NOT NULL
            );

            -- Bugs awaiting a human decision; survives restarts
            CREATE TABLE IF NOT EXISTS pending_reviews (
                bug_id TEXT PRIMARY KEY,
                bug_signature TEXT NOT NULL,
                candidate_features TEXT NOT NULL,
                model_suggestion TEXT,
                enqueued_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_feedback_signature ON feedback(bug_signature);
            CREATE INDEX IF NOT EXISTS idx_feedback_created ON feedback(created_at DESC);
        "#,
        )?;

        Ok(())
    }

    /// Append one record. The record is durable before this returns.
    pub async fn append(&self, record: &FeedbackRecord) -> Result<()> {
        record.validate()?;

        let conn = self.conn.lock().await;

        let candidates_json = serde_json::to_string(&record.candidate_features)?;
        let embedding_blob = record.embedding.as_ref().map(|e| embedding_to_blob(e));

        conn.execute(
            r#"INSERT INTO feedback
               (id, bug_signature, candidate_features, model_suggestion, human_decision, rationale, embedding, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                record.id,
                record.bug_signature,
                candidates_json,
                record.model_suggestion,
                record.human_decision,
                record.rationale,
                embedding_blob,
                record.created_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// All records in insertion order
    pub async fn all(&self) -> Result<Vec<FeedbackRecord>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            r#"SELECT id, bug_signature, candidate_features, model_suggestion, human_decision, rationale, embedding, created_at
               FROM feedback ORDER BY rowid ASC"#,
        )?;

        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Records matching a bug signature, most recent first
    pub async fn by_bug(&self, bug_signature: &str) -> Result<Vec<FeedbackRecord>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            r#"SELECT id, bug_signature, candidate_features, model_suggestion, human_decision, rationale, embedding, created_at
               FROM feedback WHERE bug_signature = ?1
               ORDER BY created_at DESC, rowid DESC"#,
        )?;

        let rows = stmt.query_map(params![bug_signature], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM feedback", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Queue a bug for human review. Re-queueing an already-pending bug
    /// refreshes its entry.
    pub async fn enqueue_review(&self, review: &PendingReview) -> Result<()> {
        let conn = self.conn.lock().await;

        let candidates_json = serde_json::to_string(&review.candidate_features)?;
        conn.execute(
            r#"INSERT OR REPLACE INTO pending_reviews
               (bug_id, bug_signature, candidate_features, model_suggestion, enqueued_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                review.bug_id,
                review.bug_signature,
                candidates_json,
                review.model_suggestion,
                review.enqueued_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// All bugs awaiting a decision, oldest first
    pub async fn pending_reviews(&self) -> Result<Vec<PendingReview>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare(
            r#"SELECT bug_id, bug_signature, candidate_features, model_suggestion, enqueued_at
               FROM pending_reviews ORDER BY enqueued_at ASC, bug_id ASC"#,
        )?;

        let rows = stmt.query_map([], |row| {
            let candidates_json: String = row.get(2)?;
            let enqueued_at: String = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                candidates_json,
                row.get::<_, Option<String>>(3)?,
                enqueued_at,
            ))
        })?;

        let mut reviews = Vec::new();
        for row in rows {
            let (bug_id, bug_signature, candidates_json, model_suggestion, enqueued_at) = row?;
            reviews.push(PendingReview {
                bug_id,
                bug_signature,
                candidate_features: serde_json::from_str(&candidates_json)?,
                model_suggestion,
                enqueued_at: parse_timestamp(&enqueued_at)?,
            });
        }
        Ok(reviews)
    }

    /// Look up one queued review
    pub async fn pending_review(&self, bug_id: &str) -> Result<Option<PendingReview>> {
        let conn = self.conn.lock().await;

        let row = conn
            .query_row(
                r#"SELECT bug_id, bug_signature, candidate_features, model_suggestion, enqueued_at
                   FROM pending_reviews WHERE bug_id = ?1"#,
                params![bug_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((bug_id, bug_signature, candidates_json, model_suggestion, enqueued_at)) => {
                Ok(Some(PendingReview {
                    bug_id,
                    bug_signature,
                    candidate_features: serde_json::from_str(&candidates_json)?,
                    model_suggestion,
                    enqueued_at: parse_timestamp(&enqueued_at)?,
                }))
            }
        }
    }

    /// Remove a review entry once its decision has been persisted
    pub async fn remove_review(&self, bug_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM pending_reviews WHERE bug_id = ?1",
            params![bug_id],
        )?;
        Ok(())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeedbackRecord> {
    let candidates_json: String = row.get(2)?;
    let embedding_blob: Option<Vec<u8>> = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(FeedbackRecord {
        id: row.get(0)?,
        bug_signature: row.get(1)?,
        candidate_features: serde_json::from_str(&candidates_json).unwrap_or_default(),
        model_suggestion: row.get(3)?,
        human_decision: row.get(4)?,
        rationale: row.get(5)?,
        embedding: embedding_blob.map(|b| blob_to_embedding(&b)),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TriageError::Retrieval(format!("bad timestamp {raw:?}: {e}")))
}

/// Convert embedding vector to a binary blob
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Convert binary blob to embedding vector
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    let len = blob.len() / 4;
    let mut embedding = Vec::with_capacity(len);
    for i in 0..len {
        let bytes = &blob[i * 4..(i + 1) * 4];
        let val = f32::from_le_bytes(bytes.try_into().unwrap_or([0; 4]));
        embedding.push(val);
    }
    embedding
}
