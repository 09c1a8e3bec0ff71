//! `flock-worker`
//!
//! Runs one of Flock's book data pipelines. `populate` and `recommend` consume their SQS queues
//! (or a single message passed on the command line), `sync` and `refresh` are meant to be
//! started by a schedule and exit when their batch is done.
use crate::cli::{Cli, Command, QueueArgs};
use crate::errors::WorkerError;
use crate::queue::{Job, Queue, QueueConfig};
use anyhow::{Context as _, Error};
use clap::Parser as _;
use flock_core::covers::storage::S3ObjectStore;
use flock_core::database::Store;
use flock_core::database::queries::Db;
use flock_core::pipeline::{RefreshPipeline, Services, SyncPipeline};
use flock_core::providers::http::ReqwestFetcher;
use flock_core::subjects::SubjectTable;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Flags and environment settings
mod cli;
/// Error types
mod errors;
/// Queue polling
mod queue;

#[allow(
    clippy::print_stderr,
    reason = "Tracing might not be available here if run_safe() failed before its initialization"
)]
fn main() -> ExitCode {
    let env_file = dotenvy::dotenv();
    let cli = Cli::parse();
    if let Err(error) = init_tracing(cli.log_json) {
        eprintln!("Failed to set up logging! Error: {error}");
        return ExitCode::FAILURE;
    }
    // Deployed environments pass settings directly
    if let Err(error) = env_file {
        tracing::debug!(%error, "no .env file loaded");
    }
    match run_safe(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn run_safe(cli: Cli) -> Result<(), Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<(), Error> {
    let subjects = match &cli.subjects {
        Some(path) => SubjectTable::load(path)
            .with_context(|| format!("Failed to load subjects from {}", path.display()))?,
        None => SubjectTable::builtin().map_err(WorkerError::from)?,
    };
    let fetch = Arc::new(ReqwestFetcher::new().map_err(WorkerError::from)?);
    let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let objects = Arc::new(S3ObjectStore::new(
        aws_sdk_s3::Client::new(&aws),
        cli.images_bucket.clone(),
    ));
    let db = Arc::new(
        Db::init(&cli.database_url, cli.database_max_connections)
            .await
            .map_err(WorkerError::from)?,
    );
    let services = Services::new(
        fetch,
        Arc::clone(&db) as Arc<dyn Store>,
        objects,
        Arc::new(subjects),
        &cli.pipeline_settings(),
    );

    let outcome = dispatch(&cli.command, &services, &aws).await;
    db.close().await;
    outcome
}

async fn dispatch(
    command: &Command,
    services: &Services,
    aws: &aws_config::SdkConfig,
) -> Result<(), Error> {
    match command {
        Command::Populate(args) => consume(Job::Populate, args, services, aws).await,
        Command::Recommend(args) => consume(Job::Recommend, args, services, aws).await,
        Command::Sync => {
            let report = SyncPipeline::new(services).run().await;
            queue::log_report("sync", &report);
            finished(report.aborted)
        }
        Command::Refresh => {
            let report = RefreshPipeline::new(services).run().await;
            queue::log_report("refresh", &report);
            finished(report.aborted)
        }
    }
}

fn finished(aborted: Option<String>) -> Result<(), Error> {
    match aborted {
        None => Ok(()),
        Some(reason) => Err(WorkerError::Aborted(reason).into()),
    }
}

async fn consume(
    job: Job,
    args: &QueueArgs,
    services: &Services,
    aws: &aws_config::SdkConfig,
) -> Result<(), Error> {
    if let Some(body) = &args.message {
        let report = job
            .handle(services, body)
            .await
            .map_err(WorkerError::from)?;
        queue::log_report(job.name(), &report);
        return finished(report.aborted);
    }

    let url = args
        .queue_url
        .clone()
        .context("Either --queue-url or --message is required")?;
    let queue = Queue::new(
        aws_sdk_sqs::Client::new(aws),
        QueueConfig {
            url,
            visibility_timeout: args.visibility_timeout,
            wait_time_seconds: QueueArgs::WAIT_SECONDS,
            max_messages: 1,
        },
    );
    queue::poll(&queue, job, services).await?;
    Ok(())
}
