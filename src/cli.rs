//
// cli.rs
// Dicom-Anonymizer-rs
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the corresponding modules.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::config::AnonymizerConfig;
use crate::identity::IdentityKeyPolicy;
use crate::inspect;
use crate::names::canonical_name;
use crate::pipeline::{self, RunOptions};
use crate::resolver::{MatchKind, MatchPolicy};

/// Command-line interface glue code: defines the available verbs and dispatches to modules.
#[derive(Parser)]
#[command(name = "dicom-anonymizer")]
#[command(about = "Match DICOM sessions to demographics and scrub patient names", long_about = None)]
pub struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub threshold: Option<f64>,
    #[arg(long)]
    pub epsilon: Option<f64>,
    #[arg(long, value_enum)]
    pub identity_key: Option<KeyPolicy>,
    #[arg(long)]
    pub one_to_many: bool,
    #[arg(long)]
    pub salt: Option<String>,
    #[arg(long)]
    pub prefix: Option<String>,
    #[arg(long)]
    pub length: Option<usize>,
    /// Extra field to clear (keyword or GGGG,EEEE); repeatable
    #[arg(long = "clear")]
    pub clear: Vec<String>,
    #[arg(long)]
    pub remove_private: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Anonymize every session under INPUT into OUTPUT
    Run {
        input: PathBuf,
        output: PathBuf,
        #[arg(short, long)]
        demographics: PathBuf,
        /// Id mapping of an earlier run (defaults to OUTPUT/idtoname.csv)
        #[arg(long)]
        mapping: Option<PathBuf>,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Show how each session resolves against the demographics, writing nothing
    Names {
        input: PathBuf,
        #[arg(short, long)]
        demographics: PathBuf,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// List the fields of one file that hold a name
    Inspect {
        file: PathBuf,
        /// Name to look for; repeatable
        #[arg(short, long = "name", required = true)]
        names: Vec<String>,
        #[arg(long, default_value_t = 3)]
        min_token_len: usize,
        #[arg(long, default_value_t = 64)]
        max_value_len: usize,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum KeyPolicy {
    NormalizedName,
    DiscoveryOrder,
}

impl From<KeyPolicy> for IdentityKeyPolicy {
    fn from(value: KeyPolicy) -> Self {
        match value {
            KeyPolicy::NormalizedName => IdentityKeyPolicy::NormalizedName,
            KeyPolicy::DiscoveryOrder => IdentityKeyPolicy::DiscoveryOrder,
        }
    }
}

impl ConfigArgs {
    /// File configuration (or defaults) with command-line values on top.
    pub fn resolve(self) -> anyhow::Result<AnonymizerConfig> {
        let mut config = match &self.config {
            Some(path) => AnonymizerConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => AnonymizerConfig::default(),
        };
        if let Some(threshold) = self.threshold {
            config.similarity_threshold = threshold;
        }
        if let Some(epsilon) = self.epsilon {
            config.ambiguity_epsilon = epsilon;
        }
        if let Some(policy) = self.identity_key {
            config.identity_key = policy.into();
        }
        if self.one_to_many {
            config.match_policy = MatchPolicy::OneToMany;
        }
        if let Some(salt) = self.salt {
            config.anon_salt = Some(salt);
        }
        if let Some(prefix) = self.prefix {
            config.anon_prefix = prefix;
        }
        if let Some(length) = self.length {
            config.anon_length = length;
        }
        config.extra_fields_to_clear.extend(self.clear);
        if self.remove_private {
            config.remove_private_tags = true;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,dicom_anonymizer=debug"
    } else {
        "warn,dicom_anonymizer=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub fn run() -> anyhow::Result<()> {
    // Parse the raw CLI arguments once and dispatch to a subcommand handler.
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            input,
            output,
            demographics,
            mapping,
            config,
        } => {
            let config = config.resolve()?;
            let options = RunOptions {
                input,
                output,
                demographics,
                mapping,
            };
            let outputs = pipeline::run(&options, &config)?;
            let summary = &outputs.summary;
            println!(
                "Sessions: {} | anonymized: {} | withheld: {} | unmatched: {} | identities: {}",
                summary.sessions,
                summary.anonymized,
                summary.failed,
                summary.unmatched,
                summary.identities
            );
            for issue in &summary.issues {
                println!("  {:?}: {}", issue.kind, issue.message);
            }
            if summary.failed > 0 {
                bail!("{} session(s) were withheld", summary.failed);
            }
        }
        Commands::Names {
            input,
            demographics,
            config,
        } => {
            let config = config.resolve()?;
            let options = RunOptions {
                input,
                output: PathBuf::new(),
                demographics,
                mapping: None,
            };
            for session in pipeline::preview(&options, &config)? {
                let (kind, score, record) = match &session.match_result {
                    Some(m) => (
                        m.match_kind,
                        format!("{:.3}", m.score),
                        m.record.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
                    ),
                    None => (MatchKind::Unmatched, "-".into(), "-".into()),
                };
                println!(
                    "{} | {} ({}) | {} | score {} | row {}",
                    session.session.session_id,
                    session.name,
                    canonical_name(&session.name),
                    kind.as_str(),
                    score,
                    record
                );
                if let Some(reason) = &session.failure {
                    println!("  failed: {}", reason);
                }
            }
        }
        Commands::Inspect {
            file,
            names,
            min_token_len,
            max_value_len,
        } => {
            let hits = inspect::inspect_file(&file, &names, min_token_len, max_value_len)?;
            print!("{}", inspect::render_hits(&hits));
        }
    }

    Ok(())
}
