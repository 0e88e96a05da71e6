//
// demographics.rs
// Dicom-Anonymizer-rs
//
// Loads the demographics table the sessions are matched against.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::info;

use crate::error::{ConfigError, Result};

/// One row of the table. Identity is the row position, not the name.
#[derive(Debug, Clone, PartialEq)]
pub struct DemographicsRecord {
    pub raw_name: String,
    /// Every other column, in table order.
    pub other_fields: Vec<(String, String)>,
}

impl DemographicsRecord {
    pub fn field(&self, column: &str) -> Option<&str> {
        self.other_fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemographicsTable {
    pub columns: Vec<String>,
    pub name_column: String,
    pub records: Vec<DemographicsRecord>,
}

impl DemographicsTable {
    pub fn from_path(path: &Path, delimiter: u8, name_column: &str) -> Result<Self> {
        let file = File::open(path)?;
        let table = Self::from_reader(file, delimiter, name_column)?;
        info!(
            path = %path.display(),
            records = table.records.len(),
            "loaded demographics"
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8, name_column: &str) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let name_idx = columns
            .iter()
            .position(|c| c == name_column)
            .ok_or_else(|| ConfigError::MissingColumn(name_column.to_string()))?;

        let mut records = Vec::new();
        for row in rdr.records() {
            let row = row?;
            let raw_name = row.get(name_idx).unwrap_or_default().to_string();
            let other_fields = columns
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != name_idx)
                .map(|(idx, column)| (column.clone(), row.get(idx).unwrap_or_default().to_string()))
                .collect();
            records.push(DemographicsRecord {
                raw_name,
                other_fields,
            });
        }

        Ok(Self {
            columns,
            name_column: name_column.to_string(),
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&DemographicsRecord> {
        self.records.get(row)
    }

    /// Values of a row in column order, with the name replaced when given.
    pub fn row_values(&self, row: usize, name_override: Option<&str>) -> Option<Vec<String>> {
        let record = self.records.get(row)?;
        Some(
            self.columns
                .iter()
                .map(|column| {
                    if column == &self.name_column {
                        name_override.unwrap_or(&record.raw_name).to_string()
                    } else {
                        record.field(column).unwrap_or_default().to_string()
                    }
                })
                .collect(),
        )
    }
}
