//
// scanner.rs
// Dicom-Anonymizer-rs
//
// Finds every field of a container holding one of a patient's name variants, whatever the field is called.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeSet;

use regex::Regex;

use crate::container::{FieldPath, FieldValue, MetadataContainer};
use crate::names::{normalize, FoldedText};

/// One searchable spelling of a name.
#[derive(Debug, Clone)]
struct Variant {
    canonical: String,
    pattern: Regex,
}

/// Compiled set of spellings under which a patient's name may appear.
///
/// Built from one or more raw names: each contributes its full token
/// sequence, the reversed order, the last-name-first rotation, and every
/// word of at least `min_token_len` letters on its own. Words are matched
/// across any run of separators (`^`, spaces, commas, nothing at all), and
/// a hit only counts when it is word-bounded on both sides.
#[derive(Debug, Clone)]
pub struct NameVariants {
    variants: Vec<Variant>,
}

impl NameVariants {
    pub fn new<S: AsRef<str>>(names: &[S], min_token_len: usize) -> Self {
        let mut spellings: BTreeSet<Vec<String>> = BTreeSet::new();
        for name in names {
            let tokens = normalize(name.as_ref());
            if tokens.is_empty() {
                continue;
            }
            spellings.insert(tokens.clone());
            if tokens.len() > 1 {
                let mut reversed = tokens.clone();
                reversed.reverse();
                spellings.insert(reversed);

                let mut last_first = tokens.clone();
                last_first.rotate_right(1);
                spellings.insert(last_first);
            }
            for token in &tokens {
                let digits_only = token.bytes().all(|b| b.is_ascii_digit());
                if token.len() >= min_token_len && !digits_only {
                    spellings.insert(vec![token.clone()]);
                }
            }
        }

        let mut variants: Vec<Variant> = spellings
            .into_iter()
            .filter_map(|tokens| {
                let pattern = tokens
                    .iter()
                    .map(|t| regex::escape(t))
                    .collect::<Vec<_>>()
                    .join("[^a-z0-9]*");
                Regex::new(&pattern).ok().map(|pattern| Variant {
                    canonical: tokens.join(" "),
                    pattern,
                })
            })
            .collect();
        // Longest spellings first so full names are preferred over single words.
        variants.sort_by(|a, b| {
            b.canonical
                .len()
                .cmp(&a.canonical.len())
                .then_with(|| a.canonical.cmp(&b.canonical))
        });
        Self { variants }
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// The canonical spellings, longest first.
    pub fn spellings(&self) -> Vec<&str> {
        self.variants.iter().map(|v| v.canonical.as_str()).collect()
    }

    /// Word-bounded occurrences in folded text, as merged folded byte ranges.
    fn folded_hits(&self, folded: &FoldedText) -> Vec<(usize, usize)> {
        let mut hits: Vec<(usize, usize)> = Vec::new();
        for variant in &self.variants {
            let mut pos = 0;
            while pos < folded.text.len() {
                let Some(m) = variant.pattern.find_at(&folded.text, pos) else {
                    break;
                };
                if folded.is_word_bounded(m.start(), m.end()) {
                    hits.push((m.start(), m.end()));
                    pos = m.end();
                } else {
                    pos = m.start() + 1;
                }
            }
        }
        merge_ranges(hits)
    }

    /// Raw byte ranges of every occurrence inside a text value.
    pub fn find_in_text(&self, raw: &str) -> Vec<(usize, usize)> {
        let folded = FoldedText::from_text(raw);
        self.folded_hits(&folded)
            .into_iter()
            .filter_map(|(start, end)| folded.raw_range(start, end))
            .collect()
    }

    /// Byte ranges of every occurrence inside an opaque byte value.
    ///
    /// The bytes are folded twice, as UTF-8 and as Latin-1, since private
    /// blobs carry either; the hits of both readings are merged.
    pub fn find_in_bytes(&self, raw: &[u8]) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        for folded in [FoldedText::from_utf8_bytes(raw), FoldedText::from_latin1(raw)] {
            ranges.extend(
                self.folded_hits(&folded)
                    .into_iter()
                    .filter_map(|(start, end)| folded.raw_range(start, end)),
            );
        }
        merge_ranges(ranges)
    }

    /// Whether any occurrence exists in the value.
    pub fn occurs_in(&self, value: &FieldValue) -> bool {
        match value {
            FieldValue::Text(values) => values.iter().any(|v| !self.find_in_text(v).is_empty()),
            FieldValue::Bytes(bytes) => !self.find_in_bytes(bytes).is_empty(),
        }
    }
}

fn merge_ranges(mut ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    ranges.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Every field path of `container` where a name variant occurs.
pub fn scan<C: MetadataContainer + ?Sized>(container: &C, variants: &NameVariants) -> Vec<FieldPath> {
    if variants.is_empty() {
        return Vec::new();
    }
    container
        .fields()
        .into_iter()
        .filter(|field| variants.occurs_in(&field.value))
        .map(|field| field.path)
        .collect()
}
