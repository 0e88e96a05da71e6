//
// names.rs
// Dicom-Anonymizer-rs
//
// Canonicalizes raw name strings into comparable lower-case ASCII tokens and folds field text for scanning.
//
// Thales Matheus Mendonça Santos - November 2025

use deunicode::{deunicode, deunicode_char};

/// Split a raw name into lower-case, accent-free tokens.
///
/// Every character outside `[a-z0-9]` after transliteration is a separator, so
/// the DICOM component separator `^`, hyphens, commas and whitespace all split
/// words. The result may be empty; the function never fails.
pub fn normalize(text: &str) -> Vec<String> {
    deunicode(text)
        .to_ascii_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalized tokens joined by single spaces.
pub fn canonical_name(text: &str) -> String {
    normalize(text).join(" ")
}

/// Order-insensitive form of a name: its tokens sorted, joined by spaces.
pub fn sorted_key(tokens: &[String]) -> String {
    let mut sorted: Vec<&str> = tokens.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(" ")
}

/// Field text folded the same way `normalize` folds names, with a map back to
/// the raw byte ranges each folded byte came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldedText {
    pub text: String,
    spans: Vec<(usize, usize)>,
}

impl FoldedText {
    /// Fold UTF-8 text; spans are byte ranges in `raw`.
    pub fn from_text(raw: &str) -> Self {
        Self::fold(
            raw.char_indices()
                .map(|(offset, ch)| (offset, offset + ch.len_utf8(), ch)),
        )
    }

    /// Fold a byte buffer read as Latin-1; spans are byte ranges in `raw`.
    pub fn from_latin1(raw: &[u8]) -> Self {
        Self::fold(
            raw.iter()
                .enumerate()
                .map(|(offset, byte)| (offset, offset + 1, *byte as char)),
        )
    }

    /// Fold a byte buffer read as UTF-8; bytes that do not decode are read as
    /// Latin-1. Spans are byte ranges in `raw`, so a multi-byte character maps
    /// back onto all of its bytes.
    pub fn from_utf8_bytes(raw: &[u8]) -> Self {
        let mut chars = Vec::with_capacity(raw.len());
        let mut pos = 0;
        while pos < raw.len() {
            let decoded = (2..=4)
                .filter(|width| raw[pos] >= 0x80 && pos + width <= raw.len())
                .find_map(|width| {
                    std::str::from_utf8(&raw[pos..pos + width])
                        .ok()
                        .and_then(|s| s.chars().next())
                        .map(|ch| (width, ch))
                });
            let (width, ch) = decoded.unwrap_or((1, raw[pos] as char));
            chars.push((pos, pos + width, ch));
            pos += width;
        }
        Self::fold(chars.into_iter())
    }

    fn fold(chars: impl Iterator<Item = (usize, usize, char)>) -> Self {
        let mut text = String::new();
        let mut spans: Vec<(usize, usize)> = Vec::new();
        for (start, end, ch) in chars {
            let replacement = if ch.is_ascii() {
                None
            } else {
                deunicode_char(ch)
            };
            match replacement {
                Some("") => {
                    // Marks with no ASCII form stick to the preceding character.
                    if let Some(last) = spans.last_mut() {
                        last.1 = end;
                    }
                }
                Some(ascii) => {
                    for byte in ascii.bytes() {
                        text.push(byte.to_ascii_lowercase() as char);
                        spans.push((start, end));
                    }
                }
                None => {
                    // Unknown non-ASCII characters fold to a separator.
                    let folded = if ch.is_ascii() {
                        ch.to_ascii_lowercase()
                    } else {
                        ' '
                    };
                    text.push(folded);
                    spans.push((start, end));
                }
            }
        }
        Self { text, spans }
    }

    /// Map a folded byte range back onto the raw byte range it covers.
    pub fn raw_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        if start >= end || end > self.spans.len() {
            return None;
        }
        Some((self.spans[start].0, self.spans[end - 1].1))
    }

    /// Whether the folded text has a word boundary on both sides of `start..end`.
    pub fn is_word_bounded(&self, start: usize, end: usize) -> bool {
        let bytes = self.text.as_bytes();
        let before = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();
        before && after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_dicom_person_name_components() {
        assert_eq!(normalize("DOE^JOHN^^MR"), vec!["doe", "john", "mr"]);
    }

    #[test]
    fn strips_accents_and_punctuation() {
        assert_eq!(normalize("  Rajaé  CHATILA|"), vec!["rajae", "chatila"]);
        assert_eq!(normalize("Müller-Lüdenscheidt, Jürgen"), vec!["muller", "ludenscheidt", "jurgen"]);
    }

    #[test]
    fn empty_and_separator_only_inputs_give_no_tokens() {
        assert!(normalize("").is_empty());
        assert!(normalize(" ^^ -- ,").is_empty());
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "DOE^JOHN",
            "José  María García-López",
            "Øster, Åse",
            "smith jon",
            "O'Brien  III",
            "",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once.join(" ")), once, "input {sample:?}");
        }
    }

    #[test]
    fn sorted_key_ignores_word_order() {
        let a = normalize("rajaé chatila");
        let b = normalize("chatila  rajae|");
        assert_eq!(sorted_key(&a), sorted_key(&b));
    }

    #[test]
    fn folded_text_maps_back_to_raw_ranges() {
        let raw = "Dr. José^Pérez";
        let folded = FoldedText::from_text(raw);
        assert_eq!(folded.text, "dr. jose^perez");
        let start = folded.text.find("jose").unwrap();
        let (raw_start, raw_end) = folded.raw_range(start, start + 4).unwrap();
        assert_eq!(&raw[raw_start..raw_end], "José");
    }

    #[test]
    fn latin1_bytes_fold_like_text() {
        let raw = b"CSA:DOE^J\xc9R\xd4ME\0";
        let folded = FoldedText::from_latin1(raw);
        assert!(folded.text.starts_with("csa:doe^jerome"));
        assert_eq!(folded.raw_range(4, 7), Some((4, 7)));
    }

    #[test]
    fn utf8_bytes_fold_per_character() {
        let raw = "CSA José^Pérez ".as_bytes();
        let folded = FoldedText::from_utf8_bytes(raw);
        assert_eq!(folded.text, "csa jose^perez ");
        let start = folded.text.find("jose").unwrap();
        let (raw_start, raw_end) = folded.raw_range(start, start + 10).unwrap();
        assert_eq!(&raw[raw_start..raw_end], "José^Pérez".as_bytes());

        // A stray Latin-1 byte does not derail decoding of the rest.
        let mixed = FoldedText::from_utf8_bytes(b"J\xc9R\xd4ME");
        assert_eq!(mixed.text, "jerome");
    }

    #[test]
    fn word_boundaries_respect_alphanumerics() {
        let folded = FoldedText::from_text("x-ray smithers smith");
        let inner = folded.text.find("ray").unwrap();
        assert!(folded.is_word_bounded(inner, inner + 3));
        let prefix = folded.text.find("smith").unwrap();
        assert!(!folded.is_word_bounded(prefix, prefix + 5));
        let last = folded.text.rfind("smith").unwrap();
        assert!(folded.is_word_bounded(last, last + 5));
    }
}
