//
// pipeline.rs
// Dicom-Anonymizer-rs
//
// End-to-end run: discover sessions, resolve names, register identities, scrub and write in parallel, aggregate.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dicom_object::open_file;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::AnonymizerConfig;
use crate::demographics::DemographicsTable;
use crate::discovery::{discover_sessions, ImagingSession};
use crate::error::AnonymizeError;
use crate::identity::{identity_key, AnonymizedIdentity, IdentityRegistry};
use crate::metadata::{extract_covariates, merge_covariates, name_candidates};
use crate::models::{Covariates, RunIssue, SessionOutcome};
use crate::names::normalize;
use crate::output::{OutputAggregator, RunOutputs, SessionReport};
use crate::report::{read_id_mapping, write_outputs, ID_MAPPING_FILE};
use crate::resolver::{disambiguate, select_candidate, IdentityResolver, MatchResult, NameCandidate};
use crate::scanner::NameVariants;
use crate::scrub::{scrub_container, scrub_text, ScrubPlan, ScrubRecord};

/// Sessions are assembled here and moved into place only once verified.
pub const STAGING_DIR: &str = ".staging";
/// Marks which input session an output folder was written from.
pub const SOURCE_MARKER: &str = ".anon_source";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub demographics: PathBuf,
    /// Mapping of an earlier run; defaults to the one in `output`.
    pub mapping: Option<PathBuf>,
}

/// A session after name extraction and matching, before any identity is assigned.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub session: ImagingSession,
    /// Representative raw name; empty when none could be read.
    pub name: String,
    pub candidates: Vec<NameCandidate>,
    pub covariates: Covariates,
    pub match_result: Option<MatchResult>,
    pub issues: Vec<RunIssue>,
    /// Why the session cannot be anonymized, if it cannot.
    pub failure: Option<String>,
}

struct PlannedSession {
    resolved: ResolvedSession,
    identity: AnonymizedIdentity,
    variants: NameVariants,
    folder: String,
    marker: String,
}

/// An identity from an earlier run, as unmatched names are compared against it.
struct KnownIdentity {
    key: String,
    name: String,
    tokens: Vec<String>,
}

fn read_session(session: &ImagingSession) -> crate::error::Result<(Vec<NameCandidate>, Covariates)> {
    let mut candidates = Vec::new();
    let mut covariates = Covariates::default();
    for rel in &session.files {
        let file = rel.display().to_string();
        let obj = open_file(session.root.join(rel)).map_err(|err| AnonymizeError::MalformedContainer {
            session_id: session.session_id.clone(),
            file: file.clone(),
            reason: err.to_string(),
        })?;
        candidates.extend(name_candidates(&obj, &file));
        covariates = merge_covariates(covariates, &extract_covariates(&obj));
    }
    Ok((candidates, covariates))
}

fn resolve_session(
    session: ImagingSession,
    resolver: &IdentityResolver,
    config: &AnonymizerConfig,
) -> ResolvedSession {
    let session_id = session.session_id.clone();
    let mut resolved = ResolvedSession {
        session,
        name: String::new(),
        candidates: Vec::new(),
        covariates: Covariates::default(),
        match_result: None,
        issues: Vec::new(),
        failure: None,
    };

    let (candidates, covariates) = match read_session(&resolved.session) {
        Ok(read) => read,
        Err(err) => {
            warn!(session = %session_id, error = %err, "session could not be read");
            resolved.issues.push(RunIssue::from_error(&session_id, &err));
            resolved.failure = Some(err.to_string());
            return resolved;
        }
    };
    resolved.covariates = covariates;

    let Some(selected) = select_candidate(&candidates).cloned() else {
        let err = AnonymizeError::NoNameCandidate(session_id.clone());
        warn!(session = %session_id, "no patient name found");
        resolved.issues.push(RunIssue::from_error(&session_id, &err));
        resolved.failure = Some(err.to_string());
        resolved.candidates = candidates;
        return resolved;
    };
    resolved.candidates = candidates;
    resolved.name = selected.raw_text.clone();

    let (result, issue) =
        resolver.resolve_with_policy(&session_id, &selected.normalized_tokens, config.ambiguity_policy);
    debug!(
        session = %session_id,
        name = %selected.raw_text,
        kind = result.match_kind.as_str(),
        score = result.score,
        "resolved session"
    );
    if let Some(issue) = issue {
        if matches!(issue, AnonymizeError::AmbiguousMatch { .. }) {
            warn!(session = %session_id, error = %issue, "ambiguous demographics match");
        }
        resolved.issues.push(RunIssue::from_error(&session_id, &issue));
    }
    resolved.match_result = Some(result);
    resolved
}

/// Read every session and match it against the demographics. Parallel, order preserving.
pub fn resolve_sessions(
    sessions: Vec<ImagingSession>,
    resolver: &IdentityResolver,
    config: &AnonymizerConfig,
) -> Vec<ResolvedSession> {
    sessions
        .into_par_iter()
        .map(|session| resolve_session(session, resolver, config))
        .collect()
}

fn is_unmatched(resolved: &ResolvedSession) -> bool {
    resolved
        .match_result
        .as_ref()
        .map_or(true, |m| m.record.is_none())
}

/// Best identity of an earlier run scoring at least the threshold against `name`.
/// The first in key order wins a tie.
fn claim_known<'k>(
    name: &[String],
    known: &'k [KnownIdentity],
    config: &AnonymizerConfig,
) -> Option<&'k KnownIdentity> {
    let matcher = config.matcher();
    let mut best: Option<(&KnownIdentity, f64)> = None;
    for identity in known {
        let score = matcher.similarity(name, &identity.tokens);
        if score >= config.similarity_threshold && best.map_or(true, |(_, s)| score > s) {
            best = Some((identity, score));
        }
    }
    best.map(|(identity, _)| identity)
}

/// Identity key and display name of each session, index-aligned with `resolved`.
///
/// Matched sessions take the name of their record's representative row.
/// Unmatched names first claim an identity of an earlier run they denote;
/// the rest are grouped among themselves so fuzzy-equal names share a key.
fn identity_keys(
    resolved: &[ResolvedSession],
    table: &DemographicsTable,
    resolver: &IdentityResolver,
    known: &[KnownIdentity],
    config: &AnonymizerConfig,
) -> Vec<Option<(String, String)>> {
    let mut claimed: BTreeMap<usize, (String, String)> = BTreeMap::new();
    let unmatched: Vec<usize> = resolved
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            r.failure.is_none()
                && is_unmatched(r)
                && !config.identity_overrides.contains_key(&r.session.session_id)
        })
        .map(|(idx, _)| idx)
        .filter(|&idx| {
            let tokens = normalize(&resolved[idx].name);
            match claim_known(&tokens, known, config) {
                Some(identity) => {
                    claimed.insert(idx, (identity.key.clone(), identity.name.clone()));
                    false
                }
                None => true,
            }
        })
        .collect();
    let names: Vec<Vec<String>> = unmatched.iter().map(|&idx| normalize(&resolved[idx].name)).collect();
    let groups = disambiguate(&names, &config.matcher(), config.similarity_threshold);
    let representative: BTreeMap<usize, usize> = unmatched
        .iter()
        .zip(groups)
        .map(|(&idx, group)| (idx, unmatched[group]))
        .collect();

    resolved
        .iter()
        .enumerate()
        .map(|(idx, r)| {
            if r.failure.is_some() {
                return None;
            }
            if let Some(explicit) = config.identity_overrides.get(&r.session.session_id) {
                let key = identity_key(explicit);
                let key = if key.is_empty() { explicit.trim().to_string() } else { key };
                return Some((key, explicit.clone()));
            }
            let row = r.match_result.as_ref().and_then(|m| m.record);
            if let Some(record) = row.and_then(|row| table.get(resolver.representative(row))) {
                return Some((identity_key(&record.raw_name), record.raw_name.clone()));
            }
            if let Some(known) = claimed.get(&idx) {
                return Some(known.clone());
            }
            let name = &resolved[*representative.get(&idx)?].name;
            Some((identity_key(name), name.clone()))
        })
        .collect()
}

fn source_marker(anon_id: &str, session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(anon_id.as_bytes());
    hasher.update(b"/");
    hasher.update(session_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// `<anon_id>`, then `<anon_id>_s2`, `_s3`, ..., skipping names taken in this
/// run or holding another session's output from an earlier run.
fn choose_folder(out: &Path, anon_id: &str, marker: &str, taken: &mut BTreeSet<String>) -> String {
    let mut n = 1;
    loop {
        let name = if n == 1 {
            anon_id.to_string()
        } else {
            format!("{}_s{}", anon_id, n)
        };
        n += 1;
        if taken.contains(&name) {
            continue;
        }
        let dir = out.join(&name);
        if dir.exists() {
            let ours = fs::read_to_string(dir.join(SOURCE_MARKER))
                .map(|found| found.trim() == marker)
                .unwrap_or(false);
            if !ours {
                continue;
            }
        }
        taken.insert(name.clone());
        return name;
    }
}

fn failed_report(resolved: ResolvedSession, identity: Option<AnonymizedIdentity>, reason: String) -> SessionReport {
    SessionReport {
        session_id: resolved.session.session_id,
        name: resolved.name,
        match_result: resolved.match_result,
        identity,
        covariates: resolved.covariates,
        outcome: SessionOutcome::Failed { reason },
        issues: resolved.issues,
        scrub_records: Vec::new(),
    }
}

/// Single-writer step: mint identities in session order and pick output folders.
fn plan_sessions(
    resolved: Vec<ResolvedSession>,
    table: &DemographicsTable,
    resolver: &IdentityResolver,
    config: &AnonymizerConfig,
    registry: &mut IdentityRegistry,
    out: &Path,
) -> (Vec<PlannedSession>, Vec<SessionReport>) {
    let known: Vec<KnownIdentity> = registry
        .identities()
        .map(|identity| KnownIdentity {
            key: identity.key.clone(),
            name: identity.original_name.clone(),
            tokens: normalize(&identity.original_name),
        })
        .collect();
    let keys = identity_keys(&resolved, table, resolver, &known, config);
    let mut planned = Vec::new();
    let mut failed = Vec::new();
    let mut taken = BTreeSet::new();

    for (mut session, key) in resolved.into_iter().zip(keys) {
        let Some((key, original_name)) = key else {
            let reason = session.failure.clone().unwrap_or_default();
            failed.push(failed_report(session, None, reason));
            continue;
        };
        let record = session.match_result.as_ref().and_then(|m| m.record);
        let identity = match registry.register(&key, &original_name, record) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(session = %session.session.session_id, error = %err, "identity not assigned");
                session.issues.push(RunIssue::from_error(&session.session.session_id, &err));
                failed.push(failed_report(session, None, err.to_string()));
                continue;
            }
        };

        let mut names: Vec<String> = session.candidates.iter().map(|c| c.raw_text.clone()).collect();
        if !config.identity_overrides.contains_key(&session.session.session_id) {
            names.push(identity.original_name.clone());
        }
        if let Some(result) = &session.match_result {
            names.extend(
                result
                    .records
                    .iter()
                    .filter_map(|&row| table.get(row))
                    .map(|r| r.raw_name.clone()),
            );
        }
        let variants = NameVariants::new(&names, config.min_token_len);
        let marker = source_marker(&identity.anon_id, &session.session.session_id);
        let folder = choose_folder(out, &identity.anon_id, &marker, &mut taken);
        planned.push(PlannedSession {
            resolved: session,
            identity,
            variants,
            folder,
            marker,
        });
    }
    (planned, failed)
}

/// Output path of a session file, each component scrubbed of the name.
/// A component left without content becomes the anonymized id.
pub fn anonymize_relative_path(rel: &Path, variants: &NameVariants, anon_id: &str) -> PathBuf {
    rel.components()
        .map(|component| {
            let text = component.as_os_str().to_string_lossy();
            let cleaned = scrub_text(&text, variants);
            let has_content = cleaned.chars().any(|c| c.is_ascii_alphanumeric());
            if !has_content || !variants.find_in_text(&cleaned).is_empty() {
                anon_id.to_string()
            } else if cleaned.starts_with('.') {
                format!("{}{}", anon_id, cleaned)
            } else {
                cleaned
            }
        })
        .collect()
}

fn unique_path(path: PathBuf, used: &mut BTreeSet<PathBuf>) -> PathBuf {
    if used.insert(path.clone()) {
        return path;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut n = 2;
    loop {
        let candidate = path.with_file_name(format!("{}_{}", n, name));
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Every name of the run, for scrubbing output paths.
fn run_name_variants(planned: &[PlannedSession], min_token_len: usize) -> NameVariants {
    let names: Vec<&str> = planned
        .iter()
        .flat_map(|plan| {
            plan.resolved
                .candidates
                .iter()
                .map(|c| c.raw_text.as_str())
                .chain(std::iter::once(plan.identity.original_name.as_str()))
        })
        .collect();
    NameVariants::new(&names, min_token_len)
}

fn fill_staging(
    plan: &PlannedSession,
    staging: &Path,
    scrub_plan: &ScrubPlan,
    path_variants: &NameVariants,
) -> crate::error::Result<Vec<ScrubRecord>> {
    let session = &plan.resolved.session;
    let anon_id = &plan.identity.anon_id;
    let mut used = BTreeSet::new();
    let mut all_records = Vec::new();

    for rel in &session.files {
        let file = rel.display().to_string();
        let mut obj = open_file(session.root.join(rel)).map_err(|err| AnonymizeError::MalformedContainer {
            session_id: session.session_id.clone(),
            file: file.clone(),
            reason: err.to_string(),
        })?;
        let records = scrub_container(
            &session.session_id,
            &file,
            &mut obj,
            &plan.variants,
            anon_id,
            scrub_plan,
        )?;

        let target_rel = unique_path(anonymize_relative_path(rel, path_variants, anon_id), &mut used);
        let target = staging.join(&target_rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        obj.write_to_file(&target)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;

        let shown = target_rel.display().to_string();
        all_records.extend(records.into_iter().map(|mut record| {
            record.session_id = plan.folder.clone();
            record.file = shown.clone();
            record
        }));
    }
    fs::write(staging.join(SOURCE_MARKER), &plan.marker)?;
    Ok(all_records)
}

/// Scrub and write one session; nothing lands in `out` unless every file verified clean.
fn write_session(
    plan: &PlannedSession,
    out: &Path,
    scrub_plan: &ScrubPlan,
    path_variants: &NameVariants,
) -> crate::error::Result<Vec<ScrubRecord>> {
    let staging = out.join(STAGING_DIR).join(&plan.folder);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    match fill_staging(plan, &staging, scrub_plan, path_variants) {
        Ok(records) => {
            let target = out.join(&plan.folder);
            if target.exists() {
                fs::remove_dir_all(&target)?;
            }
            fs::rename(&staging, &target)?;
            Ok(records)
        }
        Err(err) => {
            let _ = fs::remove_dir_all(&staging);
            Err(err)
        }
    }
}

fn finish_session(
    plan: PlannedSession,
    out: &Path,
    scrub_plan: &ScrubPlan,
    path_variants: &NameVariants,
) -> SessionReport {
    match write_session(&plan, out, scrub_plan, path_variants) {
        Ok(records) => {
            let fields_scrubbed = records.iter().filter(|r| r.original_substring_removed).count();
            info!(
                anon_id = %plan.identity.anon_id,
                folder = %plan.folder,
                files = plan.resolved.session.files.len(),
                fields_scrubbed,
                "anonymized session"
            );
            SessionReport {
                session_id: plan.resolved.session.session_id.clone(),
                name: plan.resolved.name,
                match_result: plan.resolved.match_result,
                covariates: plan.resolved.covariates,
                outcome: SessionOutcome::Anonymized {
                    anon_id: plan.identity.anon_id.clone(),
                    output_dir: out.join(&plan.folder),
                    files_written: plan.resolved.session.files.len(),
                    fields_scrubbed,
                },
                issues: plan.resolved.issues,
                identity: Some(plan.identity),
                scrub_records: records,
            }
        }
        Err(err) => {
            warn!(
                session = %plan.resolved.session.session_id,
                error = %err,
                "session withheld"
            );
            let mut resolved = plan.resolved;
            resolved
                .issues
                .push(RunIssue::from_error(&resolved.session.session_id, &err));
            failed_report(resolved, Some(plan.identity), err.to_string())
        }
    }
}

fn load_inputs(
    options: &RunOptions,
    config: &AnonymizerConfig,
) -> Result<(DemographicsTable, Vec<ImagingSession>)> {
    config.validate().context("Invalid configuration")?;
    let table = DemographicsTable::from_path(&options.demographics, config.delimiter(), &config.name_column)
        .context("Failed to load demographics table")?;
    let sessions = discover_sessions(&options.input).context("Failed to list input sessions")?;
    info!(sessions = sessions.len(), records = table.len(), "inputs loaded");
    Ok((table, sessions))
}

/// Resolve every session without writing anything.
pub fn preview(options: &RunOptions, config: &AnonymizerConfig) -> Result<Vec<ResolvedSession>> {
    let (table, sessions) = load_inputs(options, config)?;
    let resolver = IdentityResolver::new(
        &table,
        config.matcher(),
        config.similarity_threshold,
        config.ambiguity_epsilon,
        config.match_policy,
    );
    Ok(resolve_sessions(sessions, &resolver, config))
}

pub fn run(options: &RunOptions, config: &AnonymizerConfig) -> Result<RunOutputs> {
    let (table, sessions) = load_inputs(options, config)?;
    let resolver = IdentityResolver::new(
        &table,
        config.matcher(),
        config.similarity_threshold,
        config.ambiguity_epsilon,
        config.match_policy,
    );
    let resolved = resolve_sessions(sessions, &resolver, config);

    let mapping_path = options
        .mapping
        .clone()
        .unwrap_or_else(|| options.output.join(ID_MAPPING_FILE));
    let prior = read_id_mapping(&mapping_path, config.delimiter())
        .with_context(|| format!("Failed to read id mapping {}", mapping_path.display()))?;
    if !prior.is_empty() {
        info!(identities = prior.len(), "resuming from previous id mapping");
    }
    let mut registry = IdentityRegistry::with_mapping(config.minter(), &prior)?;

    fs::create_dir_all(&options.output).context("Failed to create output directory")?;
    let (planned, mut reports) =
        plan_sessions(resolved, &table, &resolver, config, &mut registry, &options.output);
    let scrub_plan = config.scrub_plan()?;
    let path_variants = run_name_variants(&planned, config.min_token_len);

    let written: Vec<SessionReport> = planned
        .into_par_iter()
        .map(|plan| finish_session(plan, &options.output, &scrub_plan, &path_variants))
        .collect();
    reports.extend(written);
    // Only leftovers of withheld sessions could remain; the directory itself is scratch.
    let _ = fs::remove_dir_all(options.output.join(STAGING_DIR));

    let mut aggregator = OutputAggregator::new(&table, &config.drop_columns, prior);
    for report in reports {
        aggregator.add(report);
    }
    let outputs = aggregator.finish();
    write_outputs(&options.output, &outputs, config.delimiter()).context("Failed to write run artifacts")?;

    let summary = &outputs.summary;
    info!(
        sessions = summary.sessions,
        anonymized = summary.anonymized,
        failed = summary.failed,
        unmatched = summary.unmatched,
        identities = summary.identities,
        "run complete"
    );
    Ok(outputs)
}
