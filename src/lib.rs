pub mod append;
pub mod cli;
pub mod client;
pub mod ingress;
pub mod models;
pub mod server;
pub mod storage;

use append::AppendEngine;
use cli::{ ClientArgs, Cli, Command, DrainArgs, ServeArgs, SubmitArgs };
use client::queue::{ DrainOutcome, FileQueueStore, RetryQueue };
use client::{ HttpSubmitter, UploadOutcome, Uploader };
use log::{ error, info, warn };
use models::conversation::ConversationPayload;
use server::Server;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(cli: Cli) -> Result<(), Box<dyn Error + Send + Sync>> {
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Submit(args) => submit(args).await,
        Command::Drain(args) => drain(args).await,
    }
}

fn set_or_unset(value: &Option<String>) -> &'static str {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => "set",
        _ => "unset",
    }
}

async fn serve(args: ServeArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("API Key: {}", set_or_unset(&args.api_key));
    info!("Rate Limit (req/s): {}", args.rate_limit_per_second);
    info!("Store Type: {}", args.store_type);
    info!("Dataset Repo: {}", args.hf_repo_id.as_deref().unwrap_or("-"));
    info!("Dataset Branch: {}", args.hf_branch);
    info!("Hub Endpoint: {}", args.hf_endpoint);
    info!("HF Token: {}", set_or_unset(&args.hf_token));
    info!("Log Path: {}", args.data_path);
    info!("Store Timeout (s): {}", args.store_timeout_secs);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let store = storage::initialize_object_store(&args)?;
    let engine = Arc::new(AppendEngine::new(store, args.data_path.clone()));
    let server = Server::new(engine, args);
    server.run().await?;

    Ok(())
}

async fn uploader(args: &ClientArgs) -> Result<Uploader, Box<dyn Error + Send + Sync>> {
    let submitter = HttpSubmitter::new(
        &args.endpoint,
        args.api_key.as_deref(),
        Duration::from_secs(args.timeout_secs)
    )?;
    info!("Submitting to {}", submitter.url());
    let queue = RetryQueue::open(Box::new(FileQueueStore::new(&args.queue_path))).await?;
    Ok(Uploader::new(Arc::new(submitter), Arc::new(queue)))
}

async fn submit(args: SubmitArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let uploader = uploader(&args.client).await?;
    let mut queued = 0;

    for path in &args.files {
        let payload: ConversationPayload = match tokio::fs::read(path).await {
            Ok(bytes) =>
                match serde_json::from_slice(&bytes) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Skipping {}: not a conversation payload: {}", path.display(), e);
                        continue;
                    }
                }
            Err(e) => {
                error!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        match uploader.upload(payload).await? {
            UploadOutcome::Accepted(_) => {}
            UploadOutcome::Queued { reason } => {
                queued += 1;
                warn!("{} queued for retry: {}", path.display(), reason);
            }
        }
    }

    info!(
        "Submitted {} file(s), {} queued this run, {} waiting in {}",
        args.files.len(),
        queued,
        uploader.queue().len().await,
        args.client.queue_path.display()
    );
    Ok(())
}

async fn drain(args: DrainArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let uploader = uploader(&args.client).await?;
    if uploader.queue().is_empty().await {
        info!("Retry queue is empty");
        return Ok(());
    }
    match uploader.drain().await? {
        DrainOutcome::Finished(report) if report.interrupted => {
            warn!("Drain stopped early, {} conversation(s) still queued", report.remaining);
        }
        DrainOutcome::Finished(_) => {}
        DrainOutcome::AlreadyDraining => warn!("Another drain is already running"),
    }
    Ok(())
}
