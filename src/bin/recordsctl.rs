use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use recordsync::{
    config::{ConfigError, RecordsConfig},
    error::RecordsError,
    runtime::{repository::RecordsRepository, request::ReadContext},
    telemetry::init_tracing,
    types::RevisionColumnKind,
};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "recordsctl")]
#[command(about = "Operate the records dual-storage migration", long_about = None)]
struct Args {
    /// TOML configuration file.
    #[arg(long, short = 'c', default_value = "records.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and print the resolved mode
    CheckConfig,
    /// Create the legacy and v2 tables if missing
    InitSchema {
        /// Store the legacy revision as BIGINT epoch milliseconds
        #[arg(long)]
        epoch_millis: bool,
    },
    /// Print the current revision
    Head,
    /// Compare the legacy record set with v2
    Audit {
        #[arg(long)]
        requester: Option<String>,
    },
    /// Copy the legacy record set into v2
    Backfill,
    /// Copy v2 rows back into the legacy records column
    Mirror,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("{}", .0.payload())]
    Records(#[from] RecordsError),
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("info");
    let args = Args::parse();
    match run(args).await {
        Ok(out) => {
            println!("{out}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &Path) -> Result<RecordsConfig, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = RecordsConfig::from_toml_str(&text)?;
    config.flags.apply_env(std::env::vars());
    Ok(config)
}

async fn run(args: Args) -> Result<String, CliError> {
    let config = load_config(&args.config)?;
    let repo = RecordsRepository::new(&config)?;

    let out: Value = match args.command {
        Command::CheckConfig => {
            let mode = repo.mode();
            json!({
                "legacyTable": repo.tables().legacy.to_string(),
                "v2Table": repo.tables().v2.to_string(),
                "stateRowId": repo.tables().state_row_id,
                "phase": mode.phase,
                "auditReads": mode.audit_reads,
                "databaseConfigured": config.database_path.is_some(),
            })
        }
        Command::InitSchema { epoch_millis } => {
            let requested = if epoch_millis {
                RevisionColumnKind::EpochMillis
            } else {
                RevisionColumnKind::Timestamptz
            };
            let kind = repo.install_schema(requested).await?;
            json!({ "revisionColumn": kind, "requested": requested })
        }
        Command::Head => {
            json!({ "updatedAt": repo.get_stored_records_head_revision().await? })
        }
        Command::Audit { requester } => {
            let legacy = repo.get_stored_records_from_legacy().await?;
            let ctx = ReadContext {
                requester: requester.or_else(|| Some("recordsctl".to_string())),
            };
            repo.dual_read_compare(legacy.records, &ctx).await?.to_payload()
        }
        Command::Backfill => repo.backfill_v2_from_legacy().await?.to_payload(),
        Command::Mirror => json!({ "mirrored": repo.mirror_v2_to_legacy().await? }),
    };
    Ok(serde_json::to_string_pretty(&out)?)
}
