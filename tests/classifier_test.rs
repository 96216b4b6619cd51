//! End-to-end classification tests against a scripted model client:
//! retry exhaustion, confidence gating, idempotence, and the
//! human-review feedback loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use buglink::config::Config;
use buglink::engine::{ClassificationEngine, ModelAnswer, ModelClient, ModelError};
use buglink::feedback::{FeedbackRecord, FeedbackStore};
use buglink::index::{IndexStrategy, SimilarityIndex};
use buglink::prompt::ClassifyRequest;
use buglink::types::{Bug, ClassificationStatus, Feature, UnresolvedReason};

#[derive(Clone)]
enum Script {
    Answer(ModelAnswer),
    Transport,
    Slow(ModelAnswer, Duration),
}

/// Scripted model: responds per bug ID and records every request it sees.
struct StubModel {
    scripts: HashMap<String, Script>,
    requests: Mutex<Vec<ClassifyRequest>>,
}

impl StubModel {
    fn new(scripts: Vec<(&str, Script)>) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts
                .into_iter()
                .map(|(id, s)| (id.to_string(), s))
                .collect(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls_for(&self, bug_id: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.bug_id == bug_id)
            .count()
    }

    fn last_request_for(&self, bug_id: &str) -> Option<ClassifyRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.bug_id == bug_id)
            .cloned()
    }
}

#[async_trait]
impl ModelClient for StubModel {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ModelAnswer, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.scripts.get(&request.bug_id) {
            Some(Script::Answer(answer)) => Ok(answer.clone()),
            Some(Script::Transport) => {
                Err(ModelError::Transport("connection timed out".to_string()))
            }
            Some(Script::Slow(answer, delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(answer.clone())
            }
            None => Err(ModelError::Api(format!(
                "no script for bug {}",
                request.bug_id
            ))),
        }
    }
}

fn answer(feature: &str, confidence: f64) -> ModelAnswer {
    ModelAnswer {
        feature: feature.to_string(),
        confidence,
        reason: "matching crash signature".to_string(),
    }
}

fn bug(id: &str, title: &str) -> Bug {
    Bug {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
        severity: None,
        status: None,
        created: None,
    }
}

fn features() -> Vec<Feature> {
    vec![
        Feature {
            id: "FEAT-1".to_string(),
            title: "User login".to_string(),
            description: Some("Authentication and session handling".to_string()),
        },
        Feature {
            id: "FEAT-2".to_string(),
            title: "Data export".to_string(),
            description: None,
        },
    ]
}

struct Harness {
    engine: ClassificationEngine,
    store: FeedbackStore,
    _dir: tempfile::TempDir,
}

async fn harness(model: Arc<StubModel>, seed: Vec<FeedbackRecord>) -> Harness {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.store.database_path = dir.path().join("feedback.db");
    config.engine.retry_base_ms = 1;
    config.index.min_similarity = 0.5;

    let store = FeedbackStore::open(&config.store.database_path, None)
        .await
        .unwrap();
    for record in seed {
        store.append(record).await.unwrap();
    }

    let index = Arc::new(SimilarityIndex::new(
        store.clone(),
        IndexStrategy::Lexical,
        None,
    ));
    index.rebuild().await.unwrap();

    let engine = ClassificationEngine::new(store.clone(), index, model, &config);
    Harness {
        engine,
        store,
        _dir: dir,
    }
}

#[tokio::test]
async fn transport_failures_exhaust_retries_without_stopping_the_batch() {
    let model = StubModel::new(vec![
        ("BUG-1", Script::Transport),
        ("BUG-2", Script::Answer(answer("FEAT-2", 0.9))),
    ]);
    let h = harness(model.clone(), vec![]).await;

    let bugs = vec![bug("BUG-1", "login crashes"), bug("BUG-2", "export empty")];
    let results = h.engine.classify_batch(&bugs, &features(), |_| {}).await;

    assert_eq!(results[0].status, ClassificationStatus::Unresolved);
    assert_eq!(
        results[0].unresolved_reason,
        Some(UnresolvedReason::ModelUnavailable)
    );
    // Retry bound of 2 means exactly three attempts
    assert_eq!(model.calls_for("BUG-1"), 3);

    // The other bug still went through
    assert_eq!(results[1].status, ClassificationStatus::Accepted);
    assert_eq!(results[1].chosen_feature.as_deref(), Some("FEAT-2"));
}

#[tokio::test]
async fn low_confidence_is_flagged_not_recorded() {
    let model = StubModel::new(vec![("BUG-1", Script::Answer(answer("FEAT-1", 0.55)))]);
    let h = harness(model, vec![]).await;

    let result = h
        .engine
        .classify_bug(&bug("BUG-1", "login crashes"), &features(), None)
        .await;

    assert_eq!(result.status, ClassificationStatus::LowConfidence);
    assert_eq!(result.chosen_feature.as_deref(), Some("FEAT-1"));

    // No feedback is auto-created below the threshold
    assert_eq!(h.store.count().await.unwrap(), 0);

    // The bug waits in the review queue instead
    let pending = h.store.pending_reviews().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].bug_id, "BUG-1");
    assert_eq!(pending[0].model_suggestion.as_deref(), Some("FEAT-1"));
}

#[tokio::test]
async fn review_decision_closes_the_loop() {
    let model = StubModel::new(vec![("BUG-1", Script::Answer(answer("FEAT-1", 0.55)))]);
    let h = harness(model, vec![]).await;

    h.engine
        .classify_bug(&bug("BUG-1", "login crashes"), &features(), None)
        .await;

    // The human disagrees with the model; that is still training signal
    let record = h
        .engine
        .record_review("BUG-1", Some("FEAT-2".to_string()), "actually an export issue")
        .await
        .unwrap();

    assert_eq!(record.model_suggestion.as_deref(), Some("FEAT-1"));
    assert_eq!(record.human_decision.as_deref(), Some("FEAT-2"));
    assert_eq!(h.store.count().await.unwrap(), 1);
    assert!(h.store.pending_reviews().await.unwrap().is_empty());
}

#[tokio::test]
async fn classification_is_idempotent_for_frozen_store() {
    let seed = vec![FeedbackRecord::new(
        "login crashes",
        vec!["FEAT-1".to_string(), "FEAT-2".to_string()],
        Some("FEAT-1".to_string()),
        Some("FEAT-1".to_string()),
        "confirmed by reviewer",
    )];
    let model = StubModel::new(vec![("BUG-1", Script::Answer(answer("FEAT-1", 0.9)))]);
    let h = harness(model, seed).await;

    let b = bug("BUG-1", "login crashes");
    let first = h.engine.classify_bug(&b, &features(), None).await;
    let second = h.engine.classify_bug(&b, &features(), None).await;

    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
    assert_eq!(first.evidence.len(), 1);
}

#[tokio::test]
async fn empty_store_produces_prompt_without_exemplars() {
    let model = StubModel::new(vec![("BUG-1", Script::Answer(answer("FEAT-1", 0.9)))]);
    let h = harness(model.clone(), vec![]).await;

    let result = h
        .engine
        .classify_bug(&bug("BUG-1", "login crashes"), &features(), None)
        .await;

    assert_eq!(result.status, ClassificationStatus::Accepted);
    assert!(result.evidence.is_empty());

    let request = model.last_request_for("BUG-1").unwrap();
    assert!(request.exemplars.is_empty());
    assert_eq!(request.candidates.len(), 2);
}

#[tokio::test]
async fn seeded_store_feeds_exemplars_and_evidence() {
    let seed = vec![FeedbackRecord::new(
        "login crashes",
        vec!["FEAT-1".to_string(), "FEAT-2".to_string()],
        None,
        Some("FEAT-1".to_string()),
        "session token expiry",
    )];
    let model = StubModel::new(vec![("BUG-1", Script::Answer(answer("FEAT-1", 0.9)))]);
    let h = harness(model.clone(), seed).await;

    let result = h
        .engine
        .classify_bug(&bug("BUG-1", "login crashes"), &features(), None)
        .await;

    assert_eq!(result.evidence.len(), 1);
    let request = model.last_request_for("BUG-1").unwrap();
    assert_eq!(request.exemplars.len(), 1);
    assert_eq!(request.exemplars[0].decision.as_deref(), Some("FEAT-1"));
}

#[tokio::test]
async fn unknown_feature_answer_is_a_parse_failure() {
    let model = StubModel::new(vec![("BUG-1", Script::Answer(answer("FEAT-404", 0.95)))]);
    let h = harness(model.clone(), vec![]).await;

    let result = h
        .engine
        .classify_bug(&bug("BUG-1", "login crashes"), &features(), None)
        .await;

    assert_eq!(result.status, ClassificationStatus::Unresolved);
    assert_eq!(
        result.unresolved_reason,
        Some(UnresolvedReason::ParseFailure)
    );
    // Parse failures are never retried
    assert_eq!(model.calls_for("BUG-1"), 1);
}

#[tokio::test]
async fn confident_none_answer_is_accepted() {
    let model = StubModel::new(vec![("BUG-1", Script::Answer(answer("none", 0.9)))]);
    let h = harness(model, vec![]).await;

    let result = h
        .engine
        .classify_bug(&bug("BUG-1", "cosmic ray bit flip"), &features(), None)
        .await;

    assert_eq!(result.status, ClassificationStatus::Accepted);
    assert_eq!(result.chosen_feature, None);
}

#[tokio::test]
async fn deadline_expiry_cancels_instead_of_accepting() {
    let model = StubModel::new(vec![(
        "BUG-1",
        Script::Slow(answer("FEAT-1", 0.99), Duration::from_secs(5)),
    )]);
    let h = harness(model, vec![]).await;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(20);
    let result = h
        .engine
        .classify_bug(&bug("BUG-1", "login crashes"), &features(), Some(deadline))
        .await;

    assert_eq!(result.status, ClassificationStatus::Unresolved);
    assert_eq!(result.unresolved_reason, Some(UnresolvedReason::Cancelled));
}
