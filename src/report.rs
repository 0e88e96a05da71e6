//
// report.rs
// Dicom-Anonymizer-rs
//
// Writes the run artifacts as delimited tables plus a JSON summary, and reads back a previous id mapping.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::{self, File};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::models::{CsvColumns, IdMappingRow, RunSummary};
use crate::output::{RunOutputs, Table};

pub const ID_MAPPING_FILE: &str = "idtoname.csv";
pub const SHORTENED_FILE: &str = "demographics_shortened.csv";
pub const ANONYMIZED_FILE: &str = "demographics_anonymized.csv";
pub const MISSING_FILE: &str = "missing_demo.csv";
pub const MISSING_IDS_FILE: &str = "missing_demo_anonymized.csv";
pub const COVARIATES_FILE: &str = "covariates.csv";
pub const SCRUB_RECORDS_FILE: &str = "scrub_records.csv";
pub const STATUS_FILE: &str = "sessions_status.csv";
pub const SUMMARY_FILE: &str = "run_summary.json";

fn writer(path: &Path, delimiter: u8) -> Result<csv::Writer<File>> {
    Ok(csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_path(path)?)
}

/// Serialize `rows` under the row type's header, written even when `rows` is empty.
pub fn write_rows<T: Serialize + CsvColumns>(path: &Path, rows: &[T], delimiter: u8) -> Result<()> {
    let mut wtr = writer(path, delimiter)?;
    wtr.write_record(T::COLUMNS)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_table(path: &Path, table: &Table, delimiter: u8) -> Result<()> {
    let mut wtr = writer(path, delimiter)?;
    wtr.write_record(&table.columns)?;
    for row in &table.rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json)?;
    Ok(())
}

/// Mapping written by an earlier run, or nothing if there is none.
pub fn read_id_mapping(path: &Path, delimiter: u8) -> Result<Vec<IdMappingRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut rows = Vec::new();
    for row in rdr.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

pub fn write_outputs(dir: &Path, outputs: &RunOutputs, delimiter: u8) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_rows(&dir.join(ID_MAPPING_FILE), &outputs.id_mapping, delimiter)?;
    write_table(&dir.join(SHORTENED_FILE), &outputs.shortened, delimiter)?;
    write_table(&dir.join(ANONYMIZED_FILE), &outputs.anonymized, delimiter)?;
    write_rows(&dir.join(MISSING_FILE), &outputs.missing, delimiter)?;
    write_rows(&dir.join(MISSING_IDS_FILE), &outputs.missing_ids, delimiter)?;
    write_rows(&dir.join(COVARIATES_FILE), &outputs.covariates, delimiter)?;
    write_rows(&dir.join(SCRUB_RECORDS_FILE), &outputs.scrub_records, delimiter)?;
    write_rows(&dir.join(STATUS_FILE), &outputs.statuses, delimiter)?;
    write_summary(&dir.join(SUMMARY_FILE), &outputs.summary)?;
    info!(dir = %dir.display(), "wrote run artifacts");
    Ok(())
}
