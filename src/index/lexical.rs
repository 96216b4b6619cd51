//! Lexical similarity: token-set Jaccard plus keyword extraction
//!
//! No external dependency and lower recall than embeddings, but always
//! available. Tokenization is shared with the prompt composer's keyword
//! extraction so both see the same terms.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
        "if", "in", "into", "is", "it", "its", "no", "not", "of", "on", "or", "that", "the",
        "their", "then", "there", "these", "this", "to", "was", "we", "were", "when", "which",
        "while", "with", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Lowercased alphanumeric tokens of at least two characters
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Token-set Jaccard similarity in [0, 1]
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(b).count();
    let union = a.union(b).count();

    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Most frequent non-stopword tokens, deterministically ordered
/// (count descending, then alphabetically).
pub fn keywords(text: &str, max: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
    {
        if STOPWORDS.contains(token.as_str()) {
            continue;
        }
        *counts.entry(token).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(max);
    ranked.into_iter().map(|(token, _)| token).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_score_one() {
        let a = tokenize("login page crashes on submit");
        let b = tokenize("login page crashes on submit");
        assert!((jaccard(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_texts_score_zero() {
        let a = tokenize("login crashes");
        let b = tokenize("export timeout");
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn empty_text_scores_zero() {
        let a = tokenize("");
        let b = tokenize("anything here");
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn tokenize_splits_punctuation_and_lowercases() {
        let tokens = tokenize("Login-Page: crashes! (again)");
        assert!(tokens.contains("login"));
        assert!(tokens.contains("page"));
        assert!(tokens.contains("crashes"));
        assert!(tokens.contains("again"));
    }

    #[test]
    fn keywords_filter_stopwords_and_rank_by_count() {
        let text = "the export export export fails when the csv csv file is large";
        let kws = keywords(text, 3);
        assert_eq!(kws[0], "export");
        assert_eq!(kws[1], "csv");
        assert!(!kws.contains(&"the".to_string()));
    }

    #[test]
    fn keywords_are_deterministic_on_ties() {
        let kws1 = keywords("alpha beta gamma", 3);
        let kws2 = keywords("gamma beta alpha", 3);
        assert_eq!(kws1, kws2);
        assert_eq!(kws1, vec!["alpha", "beta", "gamma"]);
    }
}
