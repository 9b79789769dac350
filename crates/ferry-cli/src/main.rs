//! Ferry CLI: upload local files to object storage and delete them again.
//!
//! Storage is configured through the environment (see `FerryConfig`): STORAGE_BACKEND,
//! S3_BUCKET, S3_REGION, LOCAL_STORAGE_PATH and friends, or a `.env` file.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ferry_cli::{delete_summary, describe_session_event, init_tracing, upload_summary};
use ferry_core::{FerryConfig, ManagedFile, ManagedFileValidator, RawSource};
use ferry_services::{BatchRunner, SessionError};
use ferry_storage::create_transport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "ferry", about = "Managed file uploads to object storage")]
struct Cli {
    /// Emit logs and results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and upload files as one session
    Upload {
        /// Upload directory (key prefix); defaults to UPLOAD_DIR
        #[arg(long)]
        dir: Option<String>,
        /// Store the objects with a public-read ACL
        #[arg(long)]
        public: bool,
        /// Storage class for the uploaded objects
        #[arg(long)]
        storage_class: Option<String>,
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Delete previously uploaded objects by key
    Delete {
        /// Object keys
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize report")?;
    println!("{}", out);
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = FerryConfig::from_env().context("Failed to load configuration")?;
    config.validate()?;

    let transport = create_transport(&config)
        .await
        .context("Failed to create storage transport")?;
    let validator = Arc::new(ManagedFileValidator::from_config(&config));
    let mut runner = BatchRunner::new(transport, validator, &config);

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling transfers");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Upload {
            dir,
            public,
            storage_class,
            files,
        } => {
            if let Some(dir) = dir {
                runner = runner.with_upload_dir(dir);
            }
            if public {
                runner = runner.with_public(true);
            }
            if storage_class.is_some() {
                runner = runner.with_storage_class(storage_class);
            }

            let mut sources = Vec::with_capacity(files.len());
            for path in &files {
                let source = RawSource::from_path(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                sources.push(source);
            }

            let printer = (!cli.json).then(|| spawn_progress_printer(&runner));
            let result = runner.upload(sources).await;
            drop(runner);
            if let Some(printer) = printer {
                let _ = printer.await;
            }

            match result {
                Ok(report) => {
                    if cli.json {
                        print_json(&report)?;
                    } else {
                        print_lines(upload_summary(&report));
                    }
                }
                Err(SessionError::UploadsFailed { failed, total, report }) => {
                    if cli.json {
                        print_json(&report)?;
                    } else {
                        print_lines(upload_summary(&report));
                    }
                    anyhow::bail!("{} of {} uploads failed", failed, total);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Delete { keys } => {
            let files = keys
                .iter()
                .map(|key| ManagedFile::from_stored(key, key.clone()))
                .collect::<Result<Vec<_>, _>>()?;

            match runner.delete(files).await {
                Ok(report) => {
                    if cli.json {
                        print_json(&report)?;
                    } else {
                        print_lines(delete_summary(&report));
                    }
                }
                Err(SessionError::DeletesFailed { failed, total, report }) => {
                    if cli.json {
                        print_json(&report)?;
                    } else {
                        print_lines(delete_summary(&report));
                    }
                    anyhow::bail!("{} of {} deletes failed", failed, total);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

/// Print session events to stderr until the runner is dropped.
fn spawn_progress_printer(runner: &BatchRunner) -> tokio::task::JoinHandle<()> {
    let mut events = runner.subscribe_session();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => eprintln!("{}", describe_session_event(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
