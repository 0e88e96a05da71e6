//
// lib.rs
// Dicom-Anonymizer-rs
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

// Matching core, scrub engine, and the collaborators that feed and drain them.
pub mod cli;
pub mod config;
pub mod container;
pub mod demographics;
pub mod dicom_access;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod inspect;
pub mod matcher;
pub mod metadata;
pub mod models;
pub mod names;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod scrub;

pub use cli::{run as run_cli, Cli, Commands};
pub use config::AnonymizerConfig;
pub use error::{AnonymizeError, Result};
pub use pipeline::{run, RunOptions};
