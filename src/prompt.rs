//! Prompt composer
//!
//! Renders the classification request from a bug, its candidate features,
//! and resolved guidance. Deterministic: the same inputs always produce the
//! same request, which keeps re-classification reproducible. Candidate
//! ordering follows the input feature list, not guidance weight, so prior
//! corrections cannot leak positional bias into unrelated features.

use serde::Serialize;

use crate::config::PromptConfig;
use crate::index::lexical;
use crate::resolve::Guidance;
use crate::types::{Bug, Feature};

/// A candidate feature as presented to the model. IDs always travel with
/// their human-readable labels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateFeature {
    pub id: String,
    pub label: String,
    pub description: Option<String>,
}

/// One illustrative past correction rendered into the prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exemplar {
    /// The past bug's text
    pub bug_text: String,
    /// Feature ID the human chose, or None for "none"
    pub decision: Option<String>,
    /// Label for the decision, so the model never sees a bare ID
    pub decision_label: String,
    pub rationale: String,
    /// Guidance weight of the entry this exemplar came from
    pub weight: f64,
}

/// The structured classification request handed to the model client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifyRequest {
    pub bug_id: String,
    pub bug_text: String,
    /// Salient terms extracted from the bug text
    pub keywords: Vec<String>,
    /// Candidate features in input order
    pub candidates: Vec<CandidateFeature>,
    /// Past corrections, most-weighted first, bounded by `max_examples`
    pub exemplars: Vec<Exemplar>,
}

/// Build the classification request. Pure function of its inputs.
pub fn compose(
    bug: &Bug,
    features: &[Feature],
    guidance: &Guidance,
    opts: &PromptConfig,
) -> ClassifyRequest {
    let candidates: Vec<CandidateFeature> = features
        .iter()
        .map(|f| CandidateFeature {
            id: f.id.clone(),
            label: f.title.clone(),
            description: f.description.clone(),
        })
        .collect();

    let mut exemplars = Vec::new();
    'entries: for entry in &guidance.entries {
        // Entries below the floor would only dilute the prompt
        if entry.weight < opts.min_example_weight {
            continue;
        }
        for (record, _similarity) in &entry.supporters {
            if exemplars.len() >= opts.max_examples {
                break 'entries;
            }
            let decision_label = match &entry.target {
                // A decision naming a feature that no longer exists among
                // the candidates is unusable guidance, skip it
                Some(id) => match features.iter().find(|f| &f.id == id) {
                    Some(feature) => feature.title.clone(),
                    None => continue,
                },
                None => "none".to_string(),
            };
            exemplars.push(Exemplar {
                bug_text: record.bug_signature.clone(),
                decision: entry.target.clone(),
                decision_label,
                rationale: record.rationale.clone(),
                weight: entry.weight,
            });
        }
    }

    ClassifyRequest {
        bug_id: bug.id.clone(),
        bug_text: bug.text(),
        keywords: lexical::keywords(&bug.text(), opts.max_keywords),
        candidates,
        exemplars,
    }
}

impl ClassifyRequest {
    /// System prompt framing the classification task
    pub fn system_prompt() -> &'static str {
        "You are a software defect triage expert. Match a bug report to the \
         single most relevant feature request from the provided candidate \
         list, or answer \"none\" when no candidate fits. Answer strictly in \
         the requested format."
    }

    /// Render the user message. Deterministic for a fixed request.
    pub fn user_message(&self) -> String {
        let mut out = String::new();

        out.push_str("Bug report:\n");
        out.push_str(&self.bug_text);
        out.push('\n');

        if !self.keywords.is_empty() {
            out.push_str("\nSalient terms: ");
            out.push_str(&self.keywords.join(", "));
            out.push('\n');
        }

        out.push_str("\nCandidate features:\n");
        for candidate in &self.candidates {
            match &candidate.description {
                Some(desc) => out.push_str(&format!(
                    "- {} ({}): {}\n",
                    candidate.id, candidate.label, desc
                )),
                None => out.push_str(&format!("- {} ({})\n", candidate.id, candidate.label)),
            }
        }

        if !self.exemplars.is_empty() {
            out.push_str(
                "\nPast human decisions on similar bugs, most relevant first:\n",
            );
            for exemplar in &self.exemplars {
                let decision = match &exemplar.decision {
                    Some(id) => format!("{} ({})", id, exemplar.decision_label),
                    None => "none".to_string(),
                };
                if exemplar.rationale.is_empty() {
                    out.push_str(&format!(
                        "- Bug \"{}\" was assigned to {decision}.\n",
                        exemplar.bug_text.replace('\n', " "),
                    ));
                } else {
                    out.push_str(&format!(
                        "- Bug \"{}\" was assigned to {decision}. Reviewer note: {}\n",
                        exemplar.bug_text.replace('\n', " "),
                        exemplar.rationale,
                    ));
                }
            }
        }

        out.push_str(
            "\nAnswer in exactly this format:\n\
             feature: <candidate feature ID, or none>\n\
             confidence: <number between 0 and 1>\n\
             reason: <at most three sentences>\n",
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::FeedbackRecord;
    use crate::resolve::{resolve, ResolverStrategy};

    fn bug() -> Bug {
        Bug {
            id: "BUG-1".to_string(),
            title: "Login page crashes".to_string(),
            description: "Clicking submit on the login page crashes the app".to_string(),
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
                description: Some("Authentication flow".to_string()),
            },
            Feature {
                id: "FEAT-2".to_string(),
                title: "Data export".to_string(),
                description: None,
            },
        ]
    }

    fn feedback(decision: Option<&str>, signature: &str) -> FeedbackRecord {
        FeedbackRecord::new(
            signature,
            vec!["FEAT-1".to_string(), "FEAT-2".to_string(), "FEAT-9".to_string()],
            None,
            decision.map(|d| d.to_string()),
            "seen this before",
        )
    }

    #[test]
    fn empty_guidance_yields_zero_exemplars() {
        let request = compose(&bug(), &features(), &Guidance::default(), &PromptConfig::default());
        assert!(request.exemplars.is_empty());
        assert!(!request.user_message().contains("Past human decisions"));
    }

    #[test]
    fn candidate_order_follows_input_not_guidance() {
        // Guidance strongly favors FEAT-2, candidates must stay in input order
        let pairs = vec![(feedback(Some("FEAT-2"), "export breaks"), 0.9)];
        let guidance = resolve(&pairs, ResolverStrategy::Weighted);

        let request = compose(&bug(), &features(), &guidance, &PromptConfig::default());
        assert_eq!(request.candidates[0].id, "FEAT-1");
        assert_eq!(request.candidates[1].id, "FEAT-2");
    }

    #[test]
    fn exemplars_capped_and_heaviest_first() {
        let pairs = vec![
            (feedback(Some("FEAT-1"), "login hangs"), 0.9),
            (feedback(Some("FEAT-1"), "login blank screen"), 0.8),
            (feedback(Some("FEAT-2"), "export empty"), 0.3),
        ];
        let guidance = resolve(&pairs, ResolverStrategy::Weighted);

        let opts = PromptConfig {
            max_examples: 2,
            ..Default::default()
        };
        let request = compose(&bug(), &features(), &guidance, &opts);

        assert_eq!(request.exemplars.len(), 2);
        assert_eq!(request.exemplars[0].decision.as_deref(), Some("FEAT-1"));
        assert_eq!(request.exemplars[1].decision.as_deref(), Some("FEAT-1"));
    }

    #[test]
    fn low_weight_entries_are_dropped() {
        let pairs = vec![
            (feedback(Some("FEAT-1"), "login hangs"), 0.95),
            (feedback(Some("FEAT-2"), "export empty"), 0.01),
        ];
        let guidance = resolve(&pairs, ResolverStrategy::Weighted);

        let opts = PromptConfig {
            min_example_weight: 0.1,
            ..Default::default()
        };
        let request = compose(&bug(), &features(), &guidance, &opts);

        assert!(request
            .exemplars
            .iter()
            .all(|e| e.decision.as_deref() != Some("FEAT-2")));
    }

    #[test]
    fn decisions_for_vanished_features_are_skipped() {
        // FEAT-9 was a valid candidate when the feedback was recorded but
        // is absent from the current feature list
        let pairs = vec![(feedback(Some("FEAT-9"), "old layout bug"), 0.9)];
        let guidance = resolve(&pairs, ResolverStrategy::Weighted);

        let request = compose(&bug(), &features(), &guidance, &PromptConfig::default());
        assert!(request.exemplars.is_empty());
    }

    #[test]
    fn rendered_message_pairs_ids_with_labels() {
        let pairs = vec![(feedback(Some("FEAT-1"), "login hangs"), 0.9)];
        let guidance = resolve(&pairs, ResolverStrategy::Weighted);

        let request = compose(&bug(), &features(), &guidance, &PromptConfig::default());
        let message = request.user_message();

        assert!(message.contains("- FEAT-1 (User login): Authentication flow"));
        assert!(message.contains("assigned to FEAT-1 (User login)"));
        assert!(message.contains("feature: <candidate feature ID, or none>"));
    }

    #[test]
    fn composition_is_deterministic() {
        let pairs = vec![
            (feedback(Some("FEAT-1"), "login hangs"), 0.9),
            (feedback(None, "gibberish report"), 0.4),
        ];
        let guidance = resolve(&pairs, ResolverStrategy::Weighted);

        let a = compose(&bug(), &features(), &guidance, &PromptConfig::default());
        let b = compose(&bug(), &features(), &guidance, &PromptConfig::default());
        assert_eq!(a, b);
        assert_eq!(a.user_message(), b.user_message());
    }

    #[test]
    fn keywords_come_from_bug_text() {
        let request = compose(&bug(), &features(), &Guidance::default(), &PromptConfig::default());
        assert!(request.keywords.contains(&"login".to_string()));
        assert!(request.user_message().contains("Salient terms"));
    }
}
