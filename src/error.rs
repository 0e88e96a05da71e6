//
// error.rs
// Dicom-Anonymizer-rs
//
// Typed error conditions raised by matching, scrubbing and identity assignment.
//
// Thales Matheus Mendonça Santos - November 2025

use thiserror::Error;

use crate::container::FieldPath;

/// Result type for anonymizer operations
pub type Result<T> = std::result::Result<T, AnonymizeError>;

/// Error types for anonymizer operations
#[derive(Error, Debug)]
pub enum AnonymizeError {
    /// Two demographics records scored within the ambiguity epsilon of each other.
    #[error("ambiguous match for session {session_id}: {}", format_candidates(.candidates))]
    AmbiguousMatch {
        session_id: String,
        candidates: Vec<(usize, f64)>,
    },

    /// Best demographics score stayed below the configured threshold.
    #[error("no demographics match for session {session_id} (best score {best_score:.3})")]
    NoMatch { session_id: String, best_score: f64 },

    /// A name variant survived the scrub and was found again by verification.
    #[error("residual identity in session {session_id}, file {file}, field {field_path}")]
    ResidualIdentity {
        session_id: String,
        file: String,
        field_path: FieldPath,
    },

    /// A metadata file could not be parsed by the container layer.
    #[error("malformed container in session {session_id}, file {file}: {reason}")]
    MalformedContainer {
        session_id: String,
        file: String,
        reason: String,
    },

    /// Two different identity keys produced the same shortened id.
    #[error("anonymized id {anon_id} is shared by {first:?} and {second:?}; raise anon_length or change the salt")]
    IdCollision {
        anon_id: String,
        first: String,
        second: String,
    },

    /// Session holds no readable patient name to anonymize against.
    #[error("session {0} has no readable patient name")]
    NoNameCandidate(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnonymizeError {
    /// Integrity violations withhold a session's output; everything else is reported.
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(
            self,
            AnonymizeError::ResidualIdentity { .. }
                | AnonymizeError::MalformedContainer { .. }
                | AnonymizeError::IdCollision { .. }
                | AnonymizeError::NoNameCandidate(_)
                | AnonymizeError::Container(_)
                | AnonymizeError::Io(_)
        )
    }
}

fn format_candidates(candidates: &[(usize, f64)]) -> String {
    candidates
        .iter()
        .map(|(row, score)| format!("row {} ({:.3})", row, score))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must lie in [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("anon_length must be greater than zero for hashed identity keys")]
    ZeroLength,

    #[error("unknown DICOM field {0:?}")]
    UnknownField(String),

    #[error("csv_delimiter must be a single ASCII character, got {0:?}")]
    InvalidDelimiter(String),

    #[error("demographics table has no {0:?} column")]
    MissingColumn(String),
}

/// Failures of the key-path store contract.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContainerError {
    #[error("field {0} does not exist")]
    MissingField(FieldPath),

    #[error("field {0} does not hold a writable value")]
    NotWritable(FieldPath),

    #[error("value for field {path} cannot be encoded: {reason}")]
    Encoding { path: FieldPath, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_message_lists_rows() {
        let err = AnonymizeError::AmbiguousMatch {
            session_id: "S01".into(),
            candidates: vec![(0, 0.9), (3, 0.895)],
        };
        let text = err.to_string();
        assert!(text.contains("row 0 (0.900)"));
        assert!(text.contains("row 3 (0.895)"));
        assert!(!err.is_fatal_for_session());
    }

    #[test]
    fn residual_identity_is_fatal() {
        let err = AnonymizeError::ResidualIdentity {
            session_id: "S01".into(),
            file: "a.dcm".into(),
            field_path: FieldPath::root(dicom_core::Tag(0x0010, 0x0010)),
        };
        assert!(err.is_fatal_for_session());
        assert!(err.to_string().contains("00100010"));
    }
}
