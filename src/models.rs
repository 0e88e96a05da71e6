//
// models.rs
// Dicom-Anonymizer-rs
//
// Defines the serializable rows and summaries produced by an anonymization run.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Header of a row type written as CSV, in field order. Written explicitly
/// so an artifact with no rows still carries its header.
pub trait CsvColumns {
    const COLUMNS: &'static [&'static str];
}

/// One line of the id to original-name mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMappingRow {
    pub id: String,
    pub name: String,
}

/// A session whose name found no demographics record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingRow {
    pub name: String,
    pub id: String,
    pub session: String,
}

/// An unmatched identity with its name left out, for sharing alongside the data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MissingIdRow {
    pub id: String,
}

/// Covariates kept from the session metadata. Never scrubbed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Covariates {
    pub birth_date: Option<String>,
    pub sex: Option<String>,
    pub age: Option<String>,
    pub study_date: Option<String>,
    /// Whole years between birth and study date.
    pub age_at_scan: Option<u32>,
}

/// Covariates of one anonymized session, keyed by its anonymized id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CovariateRow {
    pub id: String,
    pub folder: String,
    pub birth_date: String,
    pub sex: String,
    pub age: String,
    pub study_date: String,
    pub age_at_scan: String,
}

/// Final state of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Anonymized {
        anon_id: String,
        output_dir: PathBuf,
        files_written: usize,
        fields_scrubbed: usize,
    },
    /// Output withheld; nothing from this session reached the output directory.
    Failed { reason: String },
}

/// Flat per-session row for `sessions_status.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatusRow {
    pub session: String,
    pub status: String,
    pub anon_id: String,
    pub match_kind: String,
    pub score: String,
    pub output_dir: String,
    pub files_written: usize,
    pub fields_scrubbed: usize,
    pub error: String,
}

/// Something the operator should look at after the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunIssue {
    pub session: String,
    pub kind: IssueKind,
    /// Whether the session's output was withheld because of it.
    pub fatal: bool,
    pub message: String,
}

impl CsvColumns for IdMappingRow {
    const COLUMNS: &'static [&'static str] = &["id", "name"];
}

impl CsvColumns for MissingRow {
    const COLUMNS: &'static [&'static str] = &["name", "id", "session"];
}

impl CsvColumns for MissingIdRow {
    const COLUMNS: &'static [&'static str] = &["id"];
}

impl CsvColumns for CovariateRow {
    const COLUMNS: &'static [&'static str] =
        &["id", "folder", "birth_date", "sex", "age", "study_date", "age_at_scan"];
}

impl CsvColumns for SessionStatusRow {
    const COLUMNS: &'static [&'static str] = &[
        "session",
        "status",
        "anon_id",
        "match_kind",
        "score",
        "output_dir",
        "files_written",
        "fields_scrubbed",
        "error",
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    AmbiguousMatch,
    NoMatch,
    ResidualIdentity,
    MalformedContainer,
    Failed,
}

/// Counts and issues written to `run_summary.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub sessions: usize,
    pub anonymized: usize,
    pub failed: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub ambiguous: usize,
    pub identities: usize,
    pub issues: Vec<RunIssue>,
}
