//
// output.rs
// Dicom-Anonymizer-rs
//
// Turns per-session results into the run's artifacts; failed sessions only ever reach the status list.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::{BTreeMap, BTreeSet};

use crate::demographics::DemographicsTable;
use crate::error::AnonymizeError;
use crate::identity::AnonymizedIdentity;
use crate::models::{
    CovariateRow, Covariates, IdMappingRow, IssueKind, MissingIdRow, MissingRow, RunIssue, RunSummary,
    SessionOutcome, SessionStatusRow,
};
use crate::resolver::{MatchKind, MatchResult};
use crate::scrub::ScrubRecord;

/// Everything known about one session once processing has ended.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    /// Raw name the session was resolved with; empty if none was readable.
    pub name: String,
    pub match_result: Option<MatchResult>,
    pub identity: Option<AnonymizedIdentity>,
    pub covariates: Covariates,
    pub outcome: SessionOutcome,
    pub issues: Vec<RunIssue>,
    /// One per flagged field; empty for withheld sessions.
    pub scrub_records: Vec<ScrubRecord>,
}

impl RunIssue {
    pub fn from_error(session: &str, err: &AnonymizeError) -> Self {
        let kind = match err {
            AnonymizeError::AmbiguousMatch { .. } => IssueKind::AmbiguousMatch,
            AnonymizeError::NoMatch { .. } => IssueKind::NoMatch,
            AnonymizeError::ResidualIdentity { .. } => IssueKind::ResidualIdentity,
            AnonymizeError::MalformedContainer { .. } => IssueKind::MalformedContainer,
            _ => IssueKind::Failed,
        };
        Self {
            session: session.to_string(),
            kind,
            fatal: err.is_fatal_for_session(),
            message: err.to_string(),
        }
    }
}

/// Header plus rows, ready for a CSV writer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutputs {
    pub id_mapping: Vec<IdMappingRow>,
    pub shortened: Table,
    pub anonymized: Table,
    pub missing: Vec<MissingRow>,
    /// Ids of `missing`, sorted and deduplicated, without names.
    pub missing_ids: Vec<MissingIdRow>,
    pub covariates: Vec<CovariateRow>,
    pub scrub_records: Vec<ScrubRecord>,
    pub statuses: Vec<SessionStatusRow>,
    pub summary: RunSummary,
}

/// Single-writer collector of session reports.
pub struct OutputAggregator<'a> {
    table: &'a DemographicsTable,
    drop_columns: Vec<String>,
    prior_mapping: Vec<IdMappingRow>,
    reports: Vec<SessionReport>,
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

impl<'a> OutputAggregator<'a> {
    /// `prior_mapping` is the mapping of an earlier run; its rows are carried forward.
    pub fn new(
        table: &'a DemographicsTable,
        drop_columns: &[String],
        prior_mapping: Vec<IdMappingRow>,
    ) -> Self {
        Self {
            table,
            drop_columns: drop_columns.to_vec(),
            prior_mapping,
            reports: Vec::new(),
        }
    }

    pub fn add(&mut self, report: SessionReport) {
        self.reports.push(report);
    }

    pub fn finish(mut self) -> RunOutputs {
        self.reports.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        let mut mapping: BTreeMap<String, String> = self
            .prior_mapping
            .iter()
            .map(|row| (row.id.clone(), row.name.clone()))
            .collect();
        // Row index to the anon id of the first successful session resolved to it.
        let mut matched_rows: BTreeMap<usize, String> = BTreeMap::new();
        let mut missing = Vec::new();
        let mut covariates = Vec::new();
        let mut scrub_records = Vec::new();
        let mut statuses = Vec::new();
        let mut summary = RunSummary {
            sessions: self.reports.len(),
            ..RunSummary::default()
        };
        let mut identities: BTreeSet<String> = BTreeSet::new();

        for report in &self.reports {
            summary.issues.extend(report.issues.iter().cloned());
            let kind = report
                .match_result
                .as_ref()
                .map_or(MatchKind::Unmatched, |m| m.match_kind);
            if kind == MatchKind::Unmatched {
                summary.unmatched += 1;
            } else {
                summary.matched += 1;
            }

            statuses.push(status_row(report, kind));

            let (SessionOutcome::Anonymized { output_dir, .. }, Some(identity)) =
                (&report.outcome, &report.identity)
            else {
                summary.failed += 1;
                continue;
            };
            summary.anonymized += 1;
            scrub_records.extend(report.scrub_records.iter().cloned());
            identities.insert(identity.anon_id.clone());
            mapping
                .entry(identity.anon_id.clone())
                .or_insert_with(|| identity.original_name.clone());

            match &report.match_result {
                Some(result) if result.match_kind != MatchKind::Unmatched => {
                    for row in &result.records {
                        matched_rows
                            .entry(*row)
                            .or_insert_with(|| identity.anon_id.clone());
                    }
                }
                _ => missing.push(MissingRow {
                    name: report.name.clone(),
                    id: identity.anon_id.clone(),
                    session: report.session_id.clone(),
                }),
            }

            let folder = output_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let c = &report.covariates;
            covariates.push(CovariateRow {
                id: identity.anon_id.clone(),
                folder,
                birth_date: opt(&c.birth_date),
                sex: opt(&c.sex),
                age: opt(&c.age),
                study_date: opt(&c.study_date),
                age_at_scan: c.age_at_scan.map(|a| a.to_string()).unwrap_or_default(),
            });
        }
        summary.ambiguous = summary
            .issues
            .iter()
            .filter(|issue| issue.kind == IssueKind::AmbiguousMatch)
            .count();
        summary.identities = identities.len();

        let missing_ids: Vec<MissingIdRow> = missing
            .iter()
            .map(|row| MissingIdRow { id: row.id.clone() })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let (shortened, anonymized) = self.demographics_tables(&matched_rows);
        RunOutputs {
            id_mapping: mapping
                .into_iter()
                .map(|(id, name)| IdMappingRow { id, name })
                .collect(),
            shortened,
            anonymized,
            missing,
            missing_ids,
            covariates,
            scrub_records,
            statuses,
            summary,
        }
    }

    fn demographics_tables(&self, matched_rows: &BTreeMap<usize, String>) -> (Table, Table) {
        let mut shortened = Table {
            columns: self.table.columns.clone(),
            rows: Vec::new(),
        };
        let keep: Vec<usize> = self
            .table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| !self.drop_columns.contains(column))
            .map(|(idx, _)| idx)
            .collect();
        let mut anonymized = Table {
            columns: keep.iter().map(|&idx| self.table.columns[idx].clone()).collect(),
            rows: Vec::new(),
        };

        for (&row, anon_id) in matched_rows {
            if let Some(values) = self.table.row_values(row, None) {
                shortened.rows.push(values);
            }
            if let Some(values) = self.table.row_values(row, Some(anon_id)) {
                anonymized
                    .rows
                    .push(keep.iter().map(|&idx| values[idx].clone()).collect());
            }
        }
        (shortened, anonymized)
    }
}

fn status_row(report: &SessionReport, kind: MatchKind) -> SessionStatusRow {
    let score = report
        .match_result
        .as_ref()
        .map(|m| format!("{:.3}", m.score))
        .unwrap_or_default();
    let anon_id = report
        .identity
        .as_ref()
        .map(|i| i.anon_id.clone())
        .unwrap_or_default();
    match &report.outcome {
        SessionOutcome::Anonymized {
            output_dir,
            files_written,
            fields_scrubbed,
            ..
        } => SessionStatusRow {
            session: report.session_id.clone(),
            status: "anonymized".into(),
            anon_id,
            match_kind: kind.as_str().into(),
            score,
            output_dir: output_dir.display().to_string(),
            files_written: *files_written,
            fields_scrubbed: *fields_scrubbed,
            error: String::new(),
        },
        SessionOutcome::Failed { reason } => SessionStatusRow {
            session: report.session_id.clone(),
            status: "failed".into(),
            anon_id,
            match_kind: kind.as_str().into(),
            score,
            output_dir: String::new(),
            files_written: 0,
            fields_scrubbed: 0,
            error: reason.clone(),
        },
    }
}
