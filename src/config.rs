//
// config.rs
// Dicom-Anonymizer-rs
//
// Run options with their defaults, JSON loading and validation.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use dicom_core::dictionary::{DataDictionary, TagRange};
use dicom_core::Tag;
use dicom_dictionary_std::StandardDataDictionary;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::identity::{IdMinter, IdentityKeyPolicy};
use crate::matcher::{NameMatcher, ScoreCombination};
use crate::resolver::{AmbiguityPolicy, MatchPolicy};
use crate::scrub::ScrubPlan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizerConfig {
    pub similarity_threshold: f64,
    pub ambiguity_epsilon: f64,
    pub combination: ScoreCombination,
    pub token_tolerance: f64,
    pub match_policy: MatchPolicy,
    pub ambiguity_policy: AmbiguityPolicy,
    pub identity_key: IdentityKeyPolicy,
    /// Session id to explicit identity key.
    pub identity_overrides: BTreeMap<String, String>,
    pub anon_prefix: String,
    pub anon_salt: Option<String>,
    pub anon_length: usize,
    pub extra_fields_to_clear: Vec<String>,
    pub remove_private_tags: bool,
    pub min_token_len: usize,
    pub drop_columns: Vec<String>,
    pub name_column: String,
    pub csv_delimiter: char,
}

impl Default for AnonymizerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            ambiguity_epsilon: 0.02,
            combination: ScoreCombination::Max,
            token_tolerance: 0.34,
            match_policy: MatchPolicy::OneToOne,
            ambiguity_policy: AmbiguityPolicy::Unmatched,
            identity_key: IdentityKeyPolicy::NormalizedName,
            identity_overrides: BTreeMap::new(),
            anon_prefix: "subj_".into(),
            anon_salt: None,
            anon_length: 8,
            extra_fields_to_clear: Vec::new(),
            remove_private_tags: false,
            min_token_len: 3,
            drop_columns: vec!["report_path".into(), "alt_names".into()],
            name_column: "name".into(),
            csv_delimiter: ';',
        }
    }
}

fn unit_range(name: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, value })
    }
}

/// Parse `GGGG,EEEE`, `(GGGG,EEEE)`, `GGGGEEEE` or a dictionary keyword.
pub fn parse_tag(text: &str) -> std::result::Result<Tag, ConfigError> {
    let trimmed = text.trim();
    let hex: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | ','))
        .collect();
    if hex.len() == 8 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        let group = u16::from_str_radix(&hex[..4], 16);
        let element = u16::from_str_radix(&hex[4..], 16);
        if let (Ok(group), Ok(element)) = (group, element) {
            return Ok(Tag(group, element));
        }
    }
    match StandardDataDictionary.by_name(trimmed).map(|entry| entry.tag) {
        Some(TagRange::Single(tag)) => Ok(tag),
        _ => Err(ConfigError::UnknownField(text.to_string())),
    }
}

impl AnonymizerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        unit_range("similarity_threshold", self.similarity_threshold)?;
        unit_range("ambiguity_epsilon", self.ambiguity_epsilon)?;
        unit_range("token_tolerance", self.token_tolerance)?;
        if let ScoreCombination::Weighted { char_weight } = self.combination {
            unit_range("char_weight", char_weight)?;
        }
        if self.anon_length == 0 && self.identity_key == IdentityKeyPolicy::NormalizedName {
            return Err(ConfigError::ZeroLength);
        }
        if !self.csv_delimiter.is_ascii() {
            return Err(ConfigError::InvalidDelimiter(self.csv_delimiter.to_string()));
        }
        for field in &self.extra_fields_to_clear {
            parse_tag(field)?;
        }
        Ok(())
    }

    pub fn delimiter(&self) -> u8 {
        // Checked ASCII by `validate`.
        self.csv_delimiter as u8
    }

    pub fn matcher(&self) -> NameMatcher {
        NameMatcher::new(self.combination, self.token_tolerance)
    }

    pub fn minter(&self) -> IdMinter {
        IdMinter {
            policy: self.identity_key,
            prefix: self.anon_prefix.clone(),
            salt: self.anon_salt.clone(),
            length: self.anon_length,
        }
    }

    pub fn scrub_plan(&self) -> std::result::Result<ScrubPlan, ConfigError> {
        let extra = self
            .extra_fields_to_clear
            .iter()
            .map(|field| parse_tag(field))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut plan = ScrubPlan::default().with_extra_fields(extra);
        plan.remove_private = self.remove_private_tags;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AnonymizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.delimiter(), b';');
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: AnonymizerConfig = serde_json::from_str(
            r#"{"similarity_threshold": 0.7, "combination": {"weighted": {"char_weight": 0.4}},
                "identity_key": "discovery_order", "extra_fields_to_clear": ["InstitutionName", "0008,1040"]}"#,
        )
        .unwrap();
        assert_eq!(config.similarity_threshold, 0.7);
        assert_eq!(config.combination, ScoreCombination::Weighted { char_weight: 0.4 });
        assert_eq!(config.identity_key, IdentityKeyPolicy::DiscoveryOrder);
        assert_eq!(config.anon_prefix, "subj_");
        let plan = config.scrub_plan().unwrap();
        assert!(plan.clear_fields.contains(&Tag(0x0008, 0x0080)));
        assert!(plan.clear_fields.contains(&Tag(0x0008, 0x1040)));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let config = AnonymizerConfig {
            similarity_threshold: 1.5,
            ..AnonymizerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { name: "similarity_threshold", .. })
        ));

        let config = AnonymizerConfig {
            anon_length: 0,
            ..AnonymizerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroLength));
    }

    #[test]
    fn rejects_unknown_fields_to_clear() {
        let config = AnonymizerConfig {
            extra_fields_to_clear: vec!["NotADicomKeyword".into()],
            ..AnonymizerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownField("NotADicomKeyword".into()))
        );
    }

    #[test]
    fn parses_tag_notations() {
        assert_eq!(parse_tag("(0010,1040)").unwrap(), Tag(0x0010, 0x1040));
        assert_eq!(parse_tag("00101040").unwrap(), Tag(0x0010, 0x1040));
        assert_eq!(parse_tag("PatientAddress").unwrap(), Tag(0x0010, 0x1040));
    }
}
