//! Classification engine
//!
//! Drives the end-to-end decision per bug: retrieve similar past feedback,
//! resolve it into guidance, compose the prompt, call the model, and gate
//! the answer on confidence. Every bug ends in exactly one of Accepted,
//! LowConfidence or Unresolved; no single bug's failure aborts the batch.

pub mod llm;

use anyhow::Context;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Config, EngineConfig, IndexConfig, PromptConfig};
use crate::error::Result;
use crate::feedback::{FeedbackRecord, FeedbackStore, PendingReview};
use crate::index::{Embedder, HttpEmbedder, SimilarityIndex};
use crate::prompt::{compose, ClassifyRequest};
use crate::resolve::{resolve, ResolverStrategy};
use crate::types::{
    Bug, ClassificationResult, ClassificationStatus, Feature, UnresolvedReason,
};

pub use llm::{HttpModelClient, ModelAnswer, ModelClient, ModelError};

/// Per-run outcome counts, reported alongside the results
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub accepted: usize,
    pub low_confidence: usize,
    pub unresolved: usize,
}

/// Tally results into a summary
pub fn summarize(results: &[ClassificationResult]) -> RunSummary {
    let mut summary = RunSummary {
        total: results.len(),
        ..Default::default()
    };
    for result in results {
        match result.status {
            ClassificationStatus::Accepted => summary.accepted += 1,
            ClassificationStatus::LowConfidence => summary.low_confidence += 1,
            ClassificationStatus::Unresolved => summary.unresolved += 1,
        }
    }
    summary
}

/// How a model call ultimately failed, after retries
enum CallFailure {
    Unavailable(String),
    Parse(String),
    Cancelled,
}

/// The feedback-augmented relevance classifier
#[derive(Clone)]
pub struct ClassificationEngine {
    store: FeedbackStore,
    index: Arc<SimilarityIndex>,
    model: Arc<dyn ModelClient>,
    engine_cfg: EngineConfig,
    index_cfg: IndexConfig,
    resolver: ResolverStrategy,
    prompt_cfg: PromptConfig,
}

impl ClassificationEngine {
    /// Assemble an engine from already-built collaborators.
    pub fn new(
        store: FeedbackStore,
        index: Arc<SimilarityIndex>,
        model: Arc<dyn ModelClient>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            index,
            model,
            engine_cfg: config.engine.clone(),
            index_cfg: config.index.clone(),
            resolver: config.resolver.strategy,
            prompt_cfg: config.prompt.clone(),
        }
    }

    /// Build the full stack from configuration: feedback store, similarity
    /// index (rebuilt from history), embedder and HTTP model client.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;

        let api_key = config
            .api
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .context("No API key configured; set OPENROUTER_API_KEY")?;

        let embedder: Option<Arc<dyn Embedder>> = if config.embeddings.enabled {
            Some(Arc::new(HttpEmbedder::new(
                config.embeddings.clone(),
                api_key.clone(),
            )?))
        } else {
            None
        };

        let store = FeedbackStore::open(&config.store.database_path, embedder.clone()).await?;
        let index = Arc::new(SimilarityIndex::new(
            store.clone(),
            config.index.strategy,
            embedder,
        ));
        let indexed = index.rebuild().await?;
        info!(
            records = indexed,
            strategy = %index.strategy(),
            "Feedback index ready"
        );

        let model = Arc::new(HttpModelClient::new(&config.api, api_key)?);
        Ok(Self::new(store, index, model, config))
    }

    pub fn store(&self) -> &FeedbackStore {
        &self.store
    }

    pub fn index(&self) -> &Arc<SimilarityIndex> {
        &self.index
    }

    /// Classify one bug against the candidate features.
    ///
    /// Never errors: retrieval, transport and parse failures all fold into
    /// an `Unresolved` result so the surrounding batch keeps going.
    pub async fn classify_bug(
        &self,
        bug: &Bug,
        features: &[Feature],
        deadline: Option<Instant>,
    ) -> ClassificationResult {
        let bug_text = bug.text();

        let pairs = match self
            .index
            .query(&bug_text, self.index_cfg.top_k, self.index_cfg.min_similarity)
            .await
        {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!(bug_id = %bug.id, "Feedback retrieval failed: {e}");
                let result = ClassificationResult::unresolved(
                    &bug.id,
                    UnresolvedReason::RetrievalFailure,
                    format!("could not retrieve similar feedback: {e}"),
                );
                self.flag_for_review(bug, features, None).await;
                return result;
            }
        };
        debug!(bug_id = %bug.id, hits = pairs.len(), "Retrieved similar feedback");

        let guidance = resolve(&pairs, self.resolver);
        let request = compose(bug, features, &guidance, &self.prompt_cfg);
        let evidence = guidance.evidence_ids();

        let answer = match self.call_model(&request, deadline).await {
            Ok(answer) => answer,
            Err(CallFailure::Cancelled) => {
                let result = ClassificationResult::unresolved(
                    &bug.id,
                    UnresolvedReason::Cancelled,
                    "run deadline expired before the model answered",
                );
                self.flag_for_review(bug, features, None).await;
                return result;
            }
            Err(CallFailure::Unavailable(msg)) => {
                let result = ClassificationResult::unresolved(
                    &bug.id,
                    UnresolvedReason::ModelUnavailable,
                    format!("model unavailable after retries: {msg}"),
                );
                self.flag_for_review(bug, features, None).await;
                return result;
            }
            Err(CallFailure::Parse(msg)) => {
                let result = ClassificationResult::unresolved(
                    &bug.id,
                    UnresolvedReason::ParseFailure,
                    format!("model answer was unusable: {msg}"),
                );
                self.flag_for_review(bug, features, None).await;
                return result;
            }
        };

        let chosen = match map_feature(&answer.feature, features) {
            Some(chosen) => chosen,
            None => {
                // The model invented an identifier; guessing a mapping would
                // poison the feedback loop
                let result = ClassificationResult::unresolved(
                    &bug.id,
                    UnresolvedReason::ParseFailure,
                    format!(
                        "model answered {:?}, which matches no candidate feature",
                        answer.feature
                    ),
                );
                self.flag_for_review(bug, features, None).await;
                return result;
            }
        };

        if answer.confidence >= self.engine_cfg.min_confidence {
            info!(
                bug_id = %bug.id,
                feature = chosen.as_deref().unwrap_or("none"),
                confidence = answer.confidence,
                "Accepted classification"
            );
            ClassificationResult {
                bug_id: bug.id.clone(),
                chosen_feature: chosen,
                confidence: answer.confidence,
                evidence,
                status: ClassificationStatus::Accepted,
                unresolved_reason: None,
                reason: if answer.reason.is_empty() {
                    "model answer met the confidence threshold".to_string()
                } else {
                    answer.reason
                },
            }
        } else {
            info!(
                bug_id = %bug.id,
                confidence = answer.confidence,
                threshold = self.engine_cfg.min_confidence,
                "Low-confidence classification, queued for review"
            );
            self.flag_for_review(bug, features, chosen.clone()).await;
            ClassificationResult {
                bug_id: bug.id.clone(),
                chosen_feature: chosen,
                confidence: answer.confidence,
                evidence,
                status: ClassificationStatus::LowConfidence,
                unresolved_reason: None,
                reason: format!(
                    "confidence {:.2} below minimum {:.2}; awaiting human review",
                    answer.confidence, self.engine_cfg.min_confidence
                ),
            }
        }
    }

    /// Classify a batch with bounded concurrency, preserving input order in
    /// the returned results. `on_result` fires as each bug completes.
    pub async fn classify_batch<F>(
        &self,
        bugs: &[Bug],
        features: &[Feature],
        mut on_result: F,
    ) -> Vec<ClassificationResult>
    where
        F: FnMut(&ClassificationResult),
    {
        let deadline = self
            .engine_cfg
            .run_deadline_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let semaphore = Arc::new(Semaphore::new(self.engine_cfg.concurrency));
        let features: Arc<Vec<Feature>> = Arc::new(features.to_vec());

        let mut tasks = JoinSet::new();
        for (position, bug) in bugs.iter().cloned().enumerate() {
            let engine = self.clone();
            let features = Arc::clone(&features);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = engine.classify_bug(&bug, &features, deadline).await;
                (position, result)
            });
        }

        let mut slots: Vec<Option<ClassificationResult>> = vec![None; bugs.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, result)) => {
                    on_result(&result);
                    slots[position] = Some(result);
                }
                Err(e) => warn!("Classification worker failed: {e}"),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.unwrap_or_else(|| {
                    ClassificationResult::unresolved(
                        &bugs[position].id,
                        UnresolvedReason::RetrievalFailure,
                        "classification worker died before producing a result",
                    )
                })
            })
            .collect()
    }

    /// Human-review callback: persist the reviewer's decision for a queued
    /// bug. Agreement and disagreement with the model are both recorded.
    pub async fn record_review(
        &self,
        bug_id: &str,
        decision: Option<String>,
        rationale: &str,
    ) -> Result<FeedbackRecord> {
        self.store.complete_review(bug_id, decision, rationale).await
    }

    /// Call the model with bounded retries, exponential backoff and an
    /// optional overall deadline. Parse failures are surfaced immediately;
    /// retrying them would burn quota for the same outcome.
    async fn call_model(
        &self,
        request: &ClassifyRequest,
        deadline: Option<Instant>,
    ) -> std::result::Result<ModelAnswer, CallFailure> {
        let mut attempt: u32 = 0;
        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(CallFailure::Cancelled);
                }
            }

            let call = self.model.classify(request);
            let outcome = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(CallFailure::Cancelled),
                },
                None => call.await,
            };

            match outcome {
                Ok(answer) => return Ok(answer),
                Err(ModelError::Answer(msg)) => return Err(CallFailure::Parse(msg)),
                Err(e) if e.is_retryable() && attempt < self.engine_cfg.max_retries => {
                    let delay = backoff_delay(attempt, self.engine_cfg.retry_base_ms);
                    warn!(
                        bug_id = %request.bug_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Model call failed, retrying: {e}"
                    );
                    match deadline {
                        Some(deadline) => {
                            tokio::time::sleep_until((Instant::now() + delay).min(deadline)).await
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                    attempt += 1;
                }
                Err(e) => return Err(CallFailure::Unavailable(e.to_string())),
            }
        }
    }

    /// Queue a bug for human review; the queue survives restarts. Failures
    /// here are logged, not propagated: the classification result already
    /// tells the caller everything it needs.
    async fn flag_for_review(
        &self,
        bug: &Bug,
        features: &[Feature],
        model_suggestion: Option<String>,
    ) {
        let review = PendingReview {
            bug_id: bug.id.clone(),
            bug_signature: bug.text(),
            candidate_features: features.iter().map(|f| f.id.clone()).collect(),
            model_suggestion,
            enqueued_at: chrono::Utc::now(),
        };
        if let Err(e) = self.store.enqueue_review(review).await {
            warn!(bug_id = %bug.id, "Could not queue bug for review: {e}");
        }
    }
}

/// Map a raw model answer onto the candidate set: the "none" sentinel, an
/// exact candidate ID (case-insensitive), or an ID with a trailing label
/// echo. Anything else is unmappable.
fn map_feature(raw: &str, features: &[Feature]) -> Option<Option<String>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("none") {
        return Some(None);
    }

    let find = |needle: &str| {
        features
            .iter()
            .find(|f| f.id.eq_ignore_ascii_case(needle))
            .map(|f| f.id.clone())
    };

    if let Some(id) = find(raw) {
        return Some(Some(id));
    }
    // Models sometimes echo the label: "FEAT-1 (User login)"
    if let Some(first) = raw.split_whitespace().next() {
        if let Some(id) = find(first) {
            return Some(Some(id));
        }
    }
    None
}

fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(6));
    let jitter = if base_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=base_ms / 2)
    };
    Duration::from_millis(exp.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_none_and_candidate_ids() {
        let features = vec![
            Feature {
                id: "FEAT-1".to_string(),
                title: "Login".to_string(),
                description: None,
            },
            Feature {
                id: "FEAT-2".to_string(),
                title: "Export".to_string(),
                description: None,
            },
        ];

        assert_eq!(map_feature("none", &features), Some(None));
        assert_eq!(map_feature("NONE", &features), Some(None));
        assert_eq!(
            map_feature("FEAT-2", &features),
            Some(Some("FEAT-2".to_string()))
        );
        assert_eq!(
            map_feature("feat-1", &features),
            Some(Some("FEAT-1".to_string()))
        );
        assert_eq!(
            map_feature("FEAT-1 (User login)", &features),
            Some(Some("FEAT-1".to_string()))
        );
        assert_eq!(map_feature("FEAT-99", &features), None);
        assert_eq!(map_feature("no idea", &features), None);
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let first = backoff_delay(0, 100);
        let third = backoff_delay(2, 100);
        assert!(first >= Duration::from_millis(100));
        assert!(third >= Duration::from_millis(400));
    }

    #[test]
    fn summarize_counts_statuses() {
        let results = vec![
            ClassificationResult {
                bug_id: "B1".to_string(),
                chosen_feature: Some("F1".to_string()),
                confidence: 0.9,
                evidence: vec![],
                status: ClassificationStatus::Accepted,
                unresolved_reason: None,
                reason: String::new(),
            },
            ClassificationResult::unresolved(
                "B2",
                UnresolvedReason::ModelUnavailable,
                "down",
            ),
        ];
        let summary = summarize(&results);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.low_confidence, 0);
    }
}
