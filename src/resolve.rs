//! Conflict resolver
//!
//! Retrieved feedback records may disagree about where a similar-looking
//! bug belongs. This module reduces a set of `(record, similarity)` pairs
//! to one ranked guidance list. Pure function of its inputs, so repeated
//! classification of the same bug stays reproducible.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::TriageError;
use crate::feedback::FeedbackRecord;

/// How contradictory past corrections are reconciled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverStrategy {
    /// Endorsement count wins, ties broken by summed similarity
    Majority,
    /// The single most recent record wins outright
    Latest,
    /// Summed similarity per feature, normalized to sum to 1 across all
    /// endorsed features plus the explicit "none" bucket
    #[default]
    Weighted,
}

impl FromStr for ResolverStrategy {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "majority" => Ok(ResolverStrategy::Majority),
            "latest" => Ok(ResolverStrategy::Latest),
            "weighted" => Ok(ResolverStrategy::Weighted),
            other => Err(TriageError::Config(format!(
                "unknown resolver strategy {other:?} (expected \"majority\", \"latest\" or \"weighted\")"
            ))),
        }
    }
}

impl std::fmt::Display for ResolverStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolverStrategy::Majority => write!(f, "majority"),
            ResolverStrategy::Latest => write!(f, "latest"),
            ResolverStrategy::Weighted => write!(f, "weighted"),
        }
    }
}

/// One endorsed target with its weight and supporting records
#[derive(Debug, Clone)]
pub struct GuidanceEntry {
    /// Feature ID, or None for the explicit "none" bucket
    pub target: Option<String>,
    pub weight: f64,
    /// Supporting records with their similarity scores, strongest first
    pub supporters: Vec<(FeedbackRecord, f64)>,
}

/// Ranked guidance derived from similar past feedback, heaviest first.
/// Empty when there is no prior guidance.
#[derive(Debug, Clone, Default)]
pub struct Guidance {
    pub entries: Vec<GuidanceEntry>,
}

impl Guidance {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// IDs of every supporting record, entry order then similarity order,
    /// deduplicated
    pub fn evidence_ids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut ids = Vec::new();
        for entry in &self.entries {
            for (record, _) in &entry.supporters {
                if seen.insert(record.id.clone()) {
                    ids.push(record.id.clone());
                }
            }
        }
        ids
    }
}

struct Bucket {
    count: usize,
    summed_similarity: f64,
    supporters: Vec<(FeedbackRecord, f64)>,
}

/// Reduce retrieved feedback to a single ranked guidance list.
///
/// Never fails: an empty input yields empty guidance, meaning "no prior
/// guidance". Deterministic: ties are broken by summed similarity, then
/// by target ID, with the "none" bucket ordered after named features.
pub fn resolve(pairs: &[(FeedbackRecord, f64)], strategy: ResolverStrategy) -> Guidance {
    if pairs.is_empty() {
        return Guidance::default();
    }

    match strategy {
        ResolverStrategy::Latest => resolve_latest(pairs),
        ResolverStrategy::Majority => resolve_buckets(pairs, false),
        ResolverStrategy::Weighted => resolve_buckets(pairs, true),
    }
}

fn resolve_latest(pairs: &[(FeedbackRecord, f64)]) -> Guidance {
    let mut ordered: Vec<&(FeedbackRecord, f64)> = pairs.iter().collect();
    ordered.sort_by(|(ra, sa), (rb, sb)| {
        rb.created_at
            .cmp(&ra.created_at)
            .then_with(|| sb.partial_cmp(sa).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| ra.id.cmp(&rb.id))
    });

    let (record, similarity) = ordered[0];
    Guidance {
        entries: vec![GuidanceEntry {
            target: record.human_decision.clone(),
            weight: 1.0,
            supporters: vec![(record.clone(), *similarity)],
        }],
    }
}

fn resolve_buckets(pairs: &[(FeedbackRecord, f64)], weighted: bool) -> Guidance {
    // BTreeMap keyed by target keeps grouping deterministic
    let mut buckets: BTreeMap<Option<String>, Bucket> = BTreeMap::new();

    for (record, similarity) in pairs {
        let bucket = buckets
            .entry(record.human_decision.clone())
            .or_insert_with(|| Bucket {
                count: 0,
                summed_similarity: 0.0,
                supporters: Vec::new(),
            });
        bucket.count += 1;
        bucket.summed_similarity += similarity;
        bucket.supporters.push((record.clone(), *similarity));
    }

    if weighted {
        // The "none" bucket is part of the normalized distribution even
        // when nothing endorses it
        buckets.entry(None).or_insert_with(|| Bucket {
            count: 0,
            summed_similarity: 0.0,
            supporters: Vec::new(),
        });
    }

    let total: f64 = buckets.values().map(|b| b.summed_similarity).sum();

    let mut entries: Vec<GuidanceEntry> = buckets
        .into_iter()
        .map(|(target, mut bucket)| {
            bucket.supporters.sort_by(|(ra, sa), (rb, sb)| {
                sb.partial_cmp(sa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| rb.created_at.cmp(&ra.created_at))
                    .then_with(|| ra.id.cmp(&rb.id))
            });
            let weight = if weighted {
                if total > 0.0 {
                    bucket.summed_similarity / total
                } else {
                    0.0
                }
            } else {
                bucket.count as f64
            };
            GuidanceEntry {
                target,
                weight,
                supporters: bucket.supporters,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        let sum = |e: &GuidanceEntry| e.supporters.iter().map(|(_, s)| s).sum::<f64>();
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                sum(b)
                    .partial_cmp(&sum(a))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| match (&a.target, &b.target) {
                (Some(ta), Some(tb)) => ta.cmp(tb),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
    });

    Guidance { entries }
}
