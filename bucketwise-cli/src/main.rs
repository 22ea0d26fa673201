//! `bucketwise`: provision or tear down an S3 bucket with bounded retries.
//!
//! ```text
//! bucketwise provision my-bucket --region eu-west-2 --max-attempts 3
//! bucketwise --endpoint http://localhost:4566 --preset local-stack teardown my-bucket --ignore-missing
//! ```
//!
//! Set `RUST_LOG` to adjust verbosity (default `info`).

use anyhow::{Context, Result};
use bucketwise::s3::{S3Backend, S3Settings};
use bucketwise::telemetry::{LogSink, MemorySink, MulticastSink, ProvisionEvent};
use bucketwise::{CancellationToken, Profile, Provisioner};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bucketwise", version, about = "Resilient S3 bucket provisioning")]
struct Cli {
    /// Region the bucket is created in.
    #[arg(long, env = "BUCKETWISE_REGION", default_value = "eu-west-2", global = true)]
    region: String,

    /// AWS shared-config profile.
    #[arg(long, env = "BUCKETWISE_PROFILE", global = true)]
    profile: Option<String>,

    /// S3-compatible endpoint (LocalStack, MinIO, a proxy). Uses path-style addressing.
    #[arg(long, env = "BUCKETWISE_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Timeout and backoff preset: local-stack, integration or production.
    #[arg(long, env = "BUCKETWISE_PRESET", default_value = "production", global = true)]
    preset: Profile,

    /// Total attempts, overriding the preset.
    #[arg(long, env = "BUCKETWISE_MAX_ATTEMPTS", global = true)]
    max_attempts: Option<usize>,

    /// Per-attempt deadline in seconds, overriding the preset.
    #[arg(long, global = true)]
    attempt_timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the bucket and wait until it is visible.
    Provision { name: String },
    /// Delete the bucket.
    Teardown {
        name: String,
        /// Succeed when the bucket does not exist.
        #[arg(long)]
        ignore_missing: bool,
    },
}

/// Events are logged as they happen and kept for the failure summary.
type CliSink = MulticastSink<LogSink, MemorySink>;

impl Cli {
    fn provisioner(&self, events: &MemorySink) -> Result<Provisioner<CliSink>> {
        let mut builder = self.preset.builder();
        if let Some(attempts) = self.max_attempts {
            builder = builder.max_attempts(attempts);
        }
        if let Some(secs) = self.attempt_timeout {
            builder = builder.attempt_timeout(Duration::from_secs(secs));
        }
        builder
            .with_sink(MulticastSink::new(LogSink, events.clone()))
            .build()
            .context("invalid provisioning options")
    }

    fn s3_settings(&self) -> S3Settings {
        S3Settings {
            region: Some(self.region.clone()),
            profile: self.profile.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let events = MemorySink::new();
    let provisioner = cli.provisioner(&events)?;
    let backend = S3Backend::load(&cli.s3_settings()).await;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    match &cli.command {
        Command::Provision { name } => {
            let provisioned = provisioner
                .provision_with_cancel(
                    &backend,
                    name,
                    &cli.region,
                    provisioner.max_attempts(),
                    &cancel,
                )
                .await;
            if provisioned.is_err() {
                print_failed_attempts(&events);
            }
            let report = provisioned.with_context(|| format!("could not provision bucket {name}"))?;
            println!(
                "{} ready in {} after {} attempt(s){}",
                report.bucket,
                cli.region,
                report.attempts.len(),
                if report.adopted() { " (already existed)" } else { "" }
            );
        }
        Command::Teardown { name, ignore_missing } => {
            let deleted = provisioner.teardown_with_cancel(&backend, name, &cancel).await;
            match deleted {
                Err(e) if e.is_not_found() && *ignore_missing => println!("{name} already absent"),
                other => {
                    other.with_context(|| format!("could not delete bucket {name}"))?;
                    println!("{name} deleted");
                }
            }
        }
    }
    Ok(())
}

fn failed_attempts(events: &MemorySink) -> Vec<String> {
    events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ProvisionEvent::AttemptFailed { attempt, stage, error, .. } => {
                Some(format!("attempt {attempt} ({stage}): {error}"))
            }
            _ => None,
        })
        .collect()
}

fn print_failed_attempts(events: &MemorySink) {
    for line in failed_attempts(events) {
        eprintln!("  {line}");
    }
}
