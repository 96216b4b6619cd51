//! Shared types used across modules
//!
//! This module contains types that are used by multiple modules
//! to avoid circular dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A defect report from the ticket source.
///
/// Immutable once loaded; the core never writes back to the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bug {
    /// Tracker identifier (e.g. "BUG-1042")
    pub id: String,
    /// One-line summary
    pub title: String,
    /// Free-text body, may be empty
    #[serde(default)]
    pub description: String,
    /// Severity as reported by the tracker (free text)
    #[serde(default)]
    pub severity: Option<String>,
    /// Tracker status (free text)
    #[serde(default)]
    pub status: Option<String>,
    /// When the bug was created
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl Bug {
    /// Combined title + description text used for similarity matching
    /// and as the bug signature stored with feedback records.
    pub fn text(&self) -> String {
        if self.description.trim().is_empty() {
            self.title.trim().to_string()
        } else {
            format!("{}\n{}", self.title.trim(), self.description.trim())
        }
    }
}

/// A product feature request a bug may be linked to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    /// Tracker identifier (e.g. "FEAT-7")
    pub id: String,
    /// One-line summary
    pub title: String,
    /// Longer description, optional
    #[serde(default)]
    pub description: Option<String>,
}

/// Terminal status of one classified bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    /// Model chose a feature with confidence at or above the minimum
    Accepted,
    /// Model chose a feature but confidence fell below the minimum;
    /// surfaced for human review, never silently accepted
    LowConfidence,
    /// No usable answer (retrieval/model/parse failure or cancellation)
    Unresolved,
}

impl std::fmt::Display for ClassificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassificationStatus::Accepted => write!(f, "accepted"),
            ClassificationStatus::LowConfidence => write!(f, "low_confidence"),
            ClassificationStatus::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// Why a bug ended up `Unresolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// The feedback store or similarity index could not be read
    RetrievalFailure,
    /// Transport failures exhausted the retry budget
    ModelUnavailable,
    /// The model answer could not be mapped to a candidate feature or "none"
    ParseFailure,
    /// The run deadline expired mid-call
    Cancelled,
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnresolvedReason::RetrievalFailure => write!(f, "retrieval_failure"),
            UnresolvedReason::ModelUnavailable => write!(f, "model_unavailable"),
            UnresolvedReason::ParseFailure => write!(f, "parse_failure"),
            UnresolvedReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of classifying one bug.
///
/// Transient per run; persisting these is the report sink's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub bug_id: String,
    /// Chosen feature ID, or None for the "none" answer and all failures
    pub chosen_feature: Option<String>,
    /// Model-reported certainty in [0, 1]; 0.0 when no answer was produced
    pub confidence: f64,
    /// IDs of the feedback records that informed the prompt, most-weighted first
    pub evidence: Vec<String>,
    pub status: ClassificationStatus,
    /// Machine-readable failure cause, present only for Unresolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unresolved_reason: Option<UnresolvedReason>,
    /// Human-readable explanation of how this status was reached
    pub reason: String,
}

impl ClassificationResult {
    /// Build an `Unresolved` result carrying a failure reason.
    pub fn unresolved(bug_id: &str, why: UnresolvedReason, detail: impl Into<String>) -> Self {
        Self {
            bug_id: bug_id.to_string(),
            chosen_feature: None,
            confidence: 0.0,
            evidence: Vec::new(),
            status: ClassificationStatus::Unresolved,
            unresolved_reason: Some(why),
            reason: detail.into(),
        }
    }
}
