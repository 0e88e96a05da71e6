//
// resolver.rs
// Dicom-Anonymizer-rs
//
// Picks the demographics record a session belongs to, or none, under threshold, tie-break and ambiguity rules.
//
// Thales Matheus Mendonça Santos - November 2025

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::container::FieldPath;
use crate::demographics::DemographicsTable;
use crate::error::{AnonymizeError, Result};
use crate::matcher::NameMatcher;
use crate::names::{normalize, sorted_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
    Unmatched,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Fuzzy => "fuzzy",
            MatchKind::Unmatched => "unmatched",
        }
    }
}

/// Whether one session resolves to a single record or to every record above threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    #[default]
    OneToOne,
    OneToMany,
}

/// What an ambiguous session resolves to once the ambiguity has been reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    #[default]
    Unmatched,
    FirstRow,
}

/// A patient name read from one field of one session file.
#[derive(Debug, Clone, PartialEq)]
pub struct NameCandidate {
    pub raw_text: String,
    pub normalized_tokens: Vec<String>,
    pub file: String,
    pub source_field: FieldPath,
}

impl NameCandidate {
    pub fn new(raw_text: &str, file: &str, source_field: FieldPath) -> Self {
        Self {
            raw_text: raw_text.to_string(),
            normalized_tokens: normalize(raw_text),
            file: file.to_string(),
            source_field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub session_id: String,
    /// Best record, `None` when unmatched.
    pub record: Option<usize>,
    /// Every accepted record, best first. Longer than one only under one-to-many.
    pub records: Vec<usize>,
    pub score: f64,
    pub match_kind: MatchKind,
}

impl MatchResult {
    fn unmatched(session_id: &str, score: f64) -> Self {
        Self {
            session_id: session_id.to_string(),
            record: None,
            records: Vec::new(),
            score,
            match_kind: MatchKind::Unmatched,
        }
    }

    /// The `NoMatch` report for an unmatched result.
    pub fn no_match(&self) -> Option<AnonymizeError> {
        (self.match_kind == MatchKind::Unmatched).then(|| AnonymizeError::NoMatch {
            session_id: self.session_id.clone(),
            best_score: self.score,
        })
    }
}

/// The name that stands for a session: the spelling seen in most files,
/// the earliest one on ties.
pub fn select_candidate(candidates: &[NameCandidate]) -> Option<&NameCandidate> {
    let mut tallies: Vec<(String, usize, usize)> = Vec::new();
    for (idx, candidate) in candidates.iter().enumerate() {
        if candidate.normalized_tokens.is_empty() {
            continue;
        }
        let key = sorted_key(&candidate.normalized_tokens);
        match tallies.iter_mut().find(|(k, _, _)| k == &key) {
            Some(entry) => entry.1 += 1,
            None => tallies.push((key, 1, idx)),
        }
    }
    let mut best: Option<(usize, usize)> = None;
    for (_, count, first) in &tallies {
        if best.map_or(true, |(c, _)| *count > c) {
            best = Some((*count, *first));
        }
    }
    best.and_then(|(_, idx)| candidates.get(idx))
}

/// Group names that denote the same person, in the order given.
///
/// Each name is compared with the representatives chosen so far and joins
/// the first one scoring at least `threshold`; otherwise it becomes a new
/// representative. Returns the representative index for every name.
pub fn disambiguate(names: &[Vec<String>], matcher: &NameMatcher, threshold: f64) -> Vec<usize> {
    let mut representatives: Vec<usize> = Vec::new();
    let mut assigned = Vec::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        let found = representatives
            .iter()
            .copied()
            .find(|&rep| matcher.similarity(name, &names[rep]) >= threshold);
        match found {
            Some(rep) => assigned.push(rep),
            None => {
                representatives.push(idx);
                assigned.push(idx);
            }
        }
    }
    assigned
}

/// Scores session names against a demographics table.
///
/// Holds the normalized table so every session is scored against the same
/// read-only data; resolving never changes the resolver.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    references: Vec<Vec<String>>,
    keys: Vec<String>,
    /// Representative row of each row; typo duplicates in the table share one.
    groups: Vec<usize>,
    matcher: NameMatcher,
    threshold: f64,
    epsilon: f64,
    policy: MatchPolicy,
}

impl IdentityResolver {
    pub fn new(
        table: &DemographicsTable,
        matcher: NameMatcher,
        threshold: f64,
        epsilon: f64,
        policy: MatchPolicy,
    ) -> Self {
        let references: Vec<Vec<String>> =
            table.records.iter().map(|r| normalize(&r.raw_name)).collect();
        let keys = references.iter().map(|tokens| sorted_key(tokens)).collect();
        let groups = disambiguate(&references, &matcher, threshold);
        Self {
            references,
            keys,
            groups,
            matcher,
            threshold,
            epsilon,
            policy,
        }
    }

    /// The row standing for every row that names the same person as `row`.
    pub fn representative(&self, row: usize) -> usize {
        self.groups.get(row).copied().unwrap_or(row)
    }

    /// Score of `candidate` against every row, in row order.
    pub fn scores(&self, candidate: &[String]) -> Vec<f64> {
        self.references
            .iter()
            .map(|reference| self.matcher.similarity(candidate, reference))
            .collect()
    }

    /// Resolve one session. Raises `AmbiguousMatch` when a record of another
    /// person scores within epsilon of the best and both clear the threshold.
    /// Rows merged as typo duplicates of the best row are not rivals.
    pub fn resolve(&self, session_id: &str, candidate: &[String]) -> Result<MatchResult> {
        if candidate.is_empty() || self.references.is_empty() {
            return Ok(MatchResult::unmatched(session_id, 0.0));
        }
        let scores = self.scores(candidate);

        // Strictly greater keeps the earliest row on equal scores.
        let mut best = 0;
        for (row, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = row;
            }
        }
        let best_score = scores[best];
        debug!(session_id, best_row = best, best_score, "scored session name");

        if best_score < self.threshold {
            return Ok(MatchResult::unmatched(session_id, best_score));
        }

        let mut accepted: Vec<usize> = (0..scores.len())
            .filter(|&row| scores[row] >= self.threshold)
            .collect();
        accepted.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

        let records = match self.policy {
            MatchPolicy::OneToMany => accepted,
            MatchPolicy::OneToOne => {
                let rivals: Vec<usize> = accepted
                    .iter()
                    .copied()
                    .filter(|&row| row != best && self.keys[row] != self.keys[best])
                    .filter(|&row| self.groups[row] != self.groups[best])
                    .filter(|&row| best_score - scores[row] <= self.epsilon)
                    .collect();
                if !rivals.is_empty() {
                    let mut candidates = vec![(best, best_score)];
                    candidates.extend(rivals.into_iter().map(|row| (row, scores[row])));
                    return Err(AnonymizeError::AmbiguousMatch {
                        session_id: session_id.to_string(),
                        candidates,
                    });
                }
                vec![best]
            }
        };

        let match_kind = if self.keys[best] == sorted_key(candidate) {
            MatchKind::Exact
        } else {
            MatchKind::Fuzzy
        };
        Ok(MatchResult {
            session_id: session_id.to_string(),
            record: Some(best),
            records,
            score: best_score,
            match_kind,
        })
    }

    /// Resolve and settle ambiguity by `policy`. The raised condition, if
    /// any, is returned alongside for reporting.
    pub fn resolve_with_policy(
        &self,
        session_id: &str,
        candidate: &[String],
        policy: AmbiguityPolicy,
    ) -> (MatchResult, Option<AnonymizeError>) {
        match self.resolve(session_id, candidate) {
            Ok(result) => {
                let issue = result.no_match();
                (result, issue)
            }
            Err(AnonymizeError::AmbiguousMatch {
                session_id: reported,
                candidates,
            }) => {
                let (best, score) = candidates.first().copied().unwrap_or((0, 0.0));
                let result = match policy {
                    AmbiguityPolicy::Unmatched => MatchResult::unmatched(session_id, score),
                    AmbiguityPolicy::FirstRow => MatchResult {
                        session_id: session_id.to_string(),
                        record: Some(best),
                        records: vec![best],
                        score,
                        match_kind: MatchKind::Fuzzy,
                    },
                };
                let issue = AnonymizeError::AmbiguousMatch {
                    session_id: reported,
                    candidates,
                };
                (result, Some(issue))
            }
            Err(other) => (MatchResult::unmatched(session_id, 0.0), Some(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(names: &[&str]) -> DemographicsTable {
        let mut csv = String::from("name;age\n");
        for (idx, name) in names.iter().enumerate() {
            csv.push_str(&format!("{};{}\n", name, 40 + idx));
        }
        DemographicsTable::from_reader(csv.as_bytes(), b';', "name").unwrap()
    }

    fn resolver(names: &[&str], policy: MatchPolicy) -> IdentityResolver {
        IdentityResolver::new(&table(names), NameMatcher::default(), 0.8, 0.02, policy)
    }

    #[test]
    fn exact_and_reordered_names_resolve() {
        let r = resolver(&["Alice Wong", "John Smith"], MatchPolicy::OneToOne);
        let exact = r.resolve("S1", &normalize("SMITH^JOHN")).unwrap();
        assert_eq!(exact.record, Some(1));
        assert_eq!(exact.match_kind, MatchKind::Exact);

        let fuzzy = r.resolve("S2", &normalize("Smith Jon")).unwrap();
        assert_eq!(fuzzy.record, Some(1));
        assert_eq!(fuzzy.match_kind, MatchKind::Fuzzy);
        assert!(fuzzy.score > 0.8);
    }

    #[test]
    fn below_threshold_is_unmatched_and_reported() {
        let r = resolver(&["Alice Wong"], MatchPolicy::OneToOne);
        let result = r.resolve("S1", &normalize("John Smith")).unwrap();
        assert_eq!(result.match_kind, MatchKind::Unmatched);
        assert!(result.record.is_none());
        assert!(matches!(result.no_match(), Some(AnonymizeError::NoMatch { .. })));
    }

    #[test]
    fn extra_surname_matches_or_reports_without_panicking() {
        let r = resolver(&["Maria Garcia"], MatchPolicy::OneToOne);
        let result = r.resolve("S1", &normalize("Maria Garcia-Lopez")).unwrap();
        assert!(result.record == Some(0) || result.match_kind == MatchKind::Unmatched);
    }

    #[test]
    fn equal_names_pick_the_earliest_row() {
        let r = resolver(&["John Smith", "Alice Wong", "john smith"], MatchPolicy::OneToOne);
        let result = r.resolve("S1", &normalize("John Smith")).unwrap();
        assert_eq!(result.record, Some(0));
    }

    #[test]
    fn close_rivals_raise_ambiguous_match() {
        let r = resolver(&["Anne Lee", "Ann Lea"], MatchPolicy::OneToOne);
        let err = r.resolve("S1", &normalize("Ann Lee")).unwrap_err();
        match err {
            AnonymizeError::AmbiguousMatch { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
                assert_eq!(candidates[0].0, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ambiguity_policy_decides_the_outcome() {
        let r = resolver(&["Anne Lee", "Ann Lea"], MatchPolicy::OneToOne);
        let (unmatched, issue) =
            r.resolve_with_policy("S1", &normalize("Ann Lee"), AmbiguityPolicy::Unmatched);
        assert_eq!(unmatched.match_kind, MatchKind::Unmatched);
        assert!(matches!(issue, Some(AnonymizeError::AmbiguousMatch { .. })));

        let (first, _) =
            r.resolve_with_policy("S1", &normalize("Ann Lee"), AmbiguityPolicy::FirstRow);
        assert_eq!(first.record, Some(0));
    }

    #[test]
    fn typo_duplicate_rows_are_merged_not_ambiguous() {
        let r = resolver(&["Jon Smith", "Joan Smith", "Alice Wong"], MatchPolicy::OneToOne);
        assert_eq!(r.representative(1), 0);
        assert_eq!(r.representative(2), 2);
        let result = r.resolve("S1", &normalize("John Smith")).unwrap();
        assert_eq!(result.record, Some(0));
        assert_eq!(result.match_kind, MatchKind::Fuzzy);
    }

    #[test]
    fn exact_row_beats_a_longer_prefix_row() {
        let r = resolver(&["Jonathan Smithers", "Jon Smith"], MatchPolicy::OneToOne);
        let result = r.resolve("S1", &normalize("Jon Smith")).unwrap();
        assert_eq!(result.record, Some(1));
        assert_eq!(result.match_kind, MatchKind::Exact);
    }

    #[test]
    fn one_to_many_keeps_every_record_above_threshold() {
        let r = resolver(&["Jon Smith", "Alice Wong", "Joan Smith"], MatchPolicy::OneToMany);
        let result = r.resolve("S1", &normalize("John Smith")).unwrap();
        assert_eq!(result.records.len(), 2);
        assert!(result.records.contains(&0) && result.records.contains(&2));
        assert!(!result.records.contains(&1));
    }

    #[test]
    fn empty_inputs_resolve_unmatched() {
        let r = resolver(&["John Smith"], MatchPolicy::OneToOne);
        assert_eq!(r.resolve("S1", &[]).unwrap().match_kind, MatchKind::Unmatched);
        let empty = resolver(&[], MatchPolicy::OneToOne);
        assert_eq!(
            empty.resolve("S1", &normalize("John")).unwrap().match_kind,
            MatchKind::Unmatched
        );
    }

    #[test]
    fn selects_most_frequent_spelling() {
        let path = FieldPath::root(dicom_core::Tag(0x0010, 0x0010));
        let candidates = vec![
            NameCandidate::new("SMITH^J", "1.dcm", path.clone()),
            NameCandidate::new("SMITH^JOHN", "2.dcm", path.clone()),
            NameCandidate::new("John Smith", "3.dcm", path.clone()),
            NameCandidate::new("", "4.dcm", path),
        ];
        let selected = select_candidate(&candidates).unwrap();
        assert_eq!(selected.file, "2.dcm");
    }

    #[test]
    fn disambiguation_groups_typos_and_swaps() {
        let names: Vec<Vec<String>> = ["John Smith", "Alice Wong", "Smith Jon", "Wong Alice"]
            .iter()
            .map(|n| normalize(n))
            .collect();
        let groups = disambiguate(&names, &NameMatcher::default(), 0.8);
        assert_eq!(groups, vec![0, 1, 0, 1]);
    }
}
