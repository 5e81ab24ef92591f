mod huggingface;
mod memory;

pub use huggingface::HuggingFaceStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use futures::stream::BoxStream;
use log::info;
use serde::Deserialize;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use crate::cli::ServeArgs;

/// One entry of the remote revision history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Revision {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("store responded with status {status}: {message}")]
    Http {
        status: u16,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed store response: {0}")]
    Malformed(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Maps a failed HTTP response onto an error kind.
    ///
    /// Status codes decide first. For other client errors the message text is
    /// inspected, since the Hub reports stale parent commits as plain 400s on
    /// some deployments. Server errors are never reclassified: a 5xx read
    /// must not pass for a missing log.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            404 => StoreError::NotFound(message),
            409 | 412 => StoreError::Conflict(message),
            401 | 403 => StoreError::Http { status, message },
            400..=499 if mentions_conflict(&message) => StoreError::Conflict(message),
            400..=499 if mentions_missing(&message) => StoreError::NotFound(message),
            _ => StoreError::Http { status, message },
        }
    }
}

fn mentions_conflict(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["outdated", "conflict", "behind"].iter().any(|m| lower.contains(m))
}

fn mentions_missing(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["not found", "404", "does not exist"].iter().any(|m| lower.contains(m))
}

/// Remote storage holding the shared log.
///
/// Writes are compare-and-swap: `write_object` must fail with
/// [`StoreError::Conflict`] when `parent` is no longer the head revision.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Revision history, newest first. Pages are fetched as the stream is polled.
    fn list_revisions(&self) -> BoxStream<'_, Result<Revision, StoreError>>;

    async fn read_object(
        &self,
        path: &str,
        revision: Option<&str>
    ) -> Result<Vec<u8>, StoreError>;

    /// Replaces the object at `path` and returns the id of the new revision.
    async fn write_object(
        &self,
        path: &str,
        content: Vec<u8>,
        parent: Option<&str>,
        summary: &str
    ) -> Result<String, StoreError>;

    fn describe(&self) -> String;
}

pub fn create_object_store(
    args: &ServeArgs
) -> Result<Arc<dyn ObjectStore>, Box<dyn Error + Send + Sync>> {
    match args.store_type.to_lowercase().as_str() {
        "huggingface" | "hf" => {
            let token = args.hf_token
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .ok_or("HF_TOKEN is required when STORE_TYPE=huggingface")?;
            let repo_id = args.hf_repo_id
                .as_deref()
                .filter(|r| !r.trim().is_empty())
                .ok_or("HF_REPO_ID is required when STORE_TYPE=huggingface")?;
            let store = HuggingFaceStore::new(
                &args.hf_endpoint,
                repo_id,
                &args.hf_branch,
                token,
                Duration::from_secs(args.store_timeout_secs)
            )?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryObjectStore::new())),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported store type: {}", args.store_type)
                    )
                )
            ),
    }
}

pub fn initialize_object_store(
    args: &ServeArgs
) -> Result<Arc<dyn ObjectStore>, Box<dyn Error + Send + Sync>> {
    let store = create_object_store(args)?;
    info!("Conversations will be appended to '{}' in {}", args.data_path, store.describe());
    Ok(store)
}
