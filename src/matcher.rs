//
// matcher.rs
// Dicom-Anonymizer-rs
//
// Scores how likely two normalized names denote the same person, tolerating typos, swapped and missing words.
//
// Thales Matheus Mendonça Santos - November 2025

use serde::{Deserialize, Serialize};

/// How the character-level and word-level signals are merged into one score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCombination {
    /// Either signal alone may carry the match.
    #[default]
    Max,
    /// `char_weight * char + (1 - char_weight) * word`.
    Weighted { char_weight: f64 },
}

/// Normalized Levenshtein similarity of two strings, counted in characters.
pub fn normalized_levenshtein(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - strsim::levenshtein(a, b) as f64 / longest as f64
}

/// Similarity of the space-joined names.
pub fn char_similarity(a: &[String], b: &[String]) -> f64 {
    normalized_levenshtein(&a.join(" "), &b.join(" "))
}

/// Similarity of one pair of words: exact, a single-letter initial, or within
/// the typo tolerance. Longer prefixes ("jon" / "jonathan") get no credit of
/// their own and are scored by edit distance like any other pair.
fn word_pair_score(a: &str, b: &str, tolerance: f64) -> f64 {
    if a == b {
        return 1.0;
    }
    let initial = |short: &str, long: &str| short.len() == 1 && long.starts_with(short);
    if initial(a, b) || initial(b, a) {
        return 1.0;
    }
    let score = normalized_levenshtein(a, b);
    if 1.0 - score <= tolerance {
        score
    } else {
        0.0
    }
}

/// Greedy Jaccard-like overlap from `a` into `b`, each word of `b` used once.
fn directed_word_overlap(a: &[String], b: &[String], tolerance: f64) -> f64 {
    let mut used = vec![false; b.len()];
    let mut matched = 0.0;
    for word in a {
        let mut best: Option<(usize, f64)> = None;
        for (idx, other) in b.iter().enumerate() {
            if used[idx] {
                continue;
            }
            let score = word_pair_score(word, other, tolerance);
            if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }
        if let Some((idx, score)) = best {
            used[idx] = true;
            matched += score;
        }
    }
    2.0 * matched / (a.len() + b.len()) as f64
}

/// Word-level similarity, insensitive to word order and rewarding near-equal words.
///
/// Computed from both directions and the larger kept, which makes it symmetric.
pub fn word_similarity(a: &[String], b: &[String], tolerance: f64) -> f64 {
    if a.is_empty() || b.is_empty() {
        return if a.is_empty() && b.is_empty() { 1.0 } else { 0.0 };
    }
    let forward = directed_word_overlap(a, b, tolerance);
    let backward = directed_word_overlap(b, a, tolerance);
    forward.max(backward).clamp(0.0, 1.0)
}

/// Scoring parameters shared by every comparison of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NameMatcher {
    pub combination: ScoreCombination,
    pub token_tolerance: f64,
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self {
            combination: ScoreCombination::Max,
            token_tolerance: 0.34,
        }
    }
}

impl NameMatcher {
    pub fn new(combination: ScoreCombination, token_tolerance: f64) -> Self {
        Self {
            combination,
            token_tolerance,
        }
    }

    /// Score in [0, 1]. Two empty names score 1, one empty name scores 0.
    pub fn similarity(&self, candidate: &[String], reference: &[String]) -> f64 {
        if candidate.is_empty() || reference.is_empty() {
            return if candidate.is_empty() && reference.is_empty() {
                1.0
            } else {
                0.0
            };
        }
        let chars = char_similarity(candidate, reference);
        let words = word_similarity(candidate, reference, self.token_tolerance);
        let score = match self.combination {
            ScoreCombination::Max => chars.max(words),
            ScoreCombination::Weighted { char_weight } => {
                char_weight * chars + (1.0 - char_weight) * words
            }
        };
        score.clamp(0.0, 1.0)
    }
}

/// Default-matcher shorthand.
pub fn similarity(candidate: &[String], reference: &[String]) -> f64 {
    NameMatcher::default().similarity(candidate, reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::normalize;

    fn sim(a: &str, b: &str) -> f64 {
        similarity(&normalize(a), &normalize(b))
    }

    #[test]
    fn identical_names_score_one() {
        assert_eq!(sim("John Smith", "JOHN^SMITH"), 1.0);
        assert_eq!(sim("Ana", "ana"), 1.0);
    }

    #[test]
    fn score_is_symmetric() {
        let pairs = [
            ("John Smith", "Smith Jon"),
            ("Maria Garcia", "Maria Garcia-Lopez"),
            ("Jean Pierre Dupont", "Dupont Jean"),
            ("abc", "xyz"),
            ("Lee", "Li Lee"),
        ];
        let weighted = NameMatcher::new(ScoreCombination::Weighted { char_weight: 0.3 }, 0.34);
        for (a, b) in pairs {
            let (na, nb) = (normalize(a), normalize(b));
            assert_eq!(similarity(&na, &nb), similarity(&nb, &na), "{a} / {b}");
            assert_eq!(weighted.similarity(&na, &nb), weighted.similarity(&nb, &na));
        }
    }

    #[test]
    fn swapped_order_with_typo_passes_default_threshold() {
        let score = sim("John Smith", "Smith Jon");
        assert!(score > 0.8, "score {score}");
    }

    #[test]
    fn missing_or_extra_words_still_score_high() {
        assert!(sim("Maria Garcia", "Maria Garcia-Lopez") >= 0.8);
        assert!(sim("Jean Pierre Dupont", "Jean Dupont") >= 0.8);
    }

    #[test]
    fn unrelated_names_score_low() {
        assert!(sim("John Smith", "Alice Wong") < 0.5);
    }

    #[test]
    fn empty_inputs_follow_degenerate_rules() {
        assert_eq!(sim("", ""), 1.0);
        assert_eq!(sim("", "John"), 0.0);
        assert_eq!(sim("^^", "John"), 0.0);
    }

    #[test]
    fn word_typos_contribute_partially() {
        let exact = word_similarity(&normalize("john smith"), &normalize("john smith"), 0.34);
        let typo = word_similarity(&normalize("john smith"), &normalize("johm smith"), 0.34);
        assert_eq!(exact, 1.0);
        assert!(typo > 0.7 && typo < 1.0, "typo {typo}");
        let strict = word_similarity(&normalize("john smith"), &normalize("johm smith"), 0.0);
        assert!((strict - 0.5).abs() < 1e-9);
    }

    #[test]
    fn initials_match_but_longer_prefixes_do_not() {
        assert_eq!(sim("J Smith", "John Smith"), 1.0);
        let prefix = sim("Jon Smith", "Jonathan Smithers");
        assert!(prefix < 0.8, "prefix {prefix}");
    }

    #[test]
    fn weighted_combination_stays_bounded() {
        let matcher = NameMatcher::new(ScoreCombination::Weighted { char_weight: 1.0 }, 0.34);
        let score = matcher.similarity(&normalize("John Smith"), &normalize("Smith John"));
        assert!((0.0..=1.0).contains(&score));
        assert!(score < 1.0);
    }
}
