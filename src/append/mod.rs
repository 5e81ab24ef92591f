use crate::models::conversation::EnrichedConversation;
use crate::storage::{ ObjectStore, StoreError };
use futures::TryStreamExt;
use log::{ debug, info, warn };
use std::sync::Arc;
use thiserror::Error;

/// Total write attempts for one append, counting the first.
pub const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum AppendError {
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to read the head revision: {0}")]
    Revisions(#[source] StoreError),
    #[error("failed to read the log: {0}")]
    Read(#[source] StoreError),
    #[error("failed to write the log: {0}")]
    Write(#[source] StoreError),
    #[error("gave up after {attempts} conflicting writes: {last}")]
    ConflictsExhausted {
        attempts: usize,
        #[source]
        last: StoreError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub attempts: usize,
    pub parent: Option<String>,
    pub revision: String,
}

/// Appends records to the shared log with compare-and-swap writes.
///
/// Each attempt reads the head revision, reads the log at that revision,
/// appends one line and writes the result back with the head as the expected
/// parent. Only conflicts are retried; every other failure ends the append.
pub struct AppendEngine {
    store: Arc<dyn ObjectStore>,
    path: String,
}

impl AppendEngine {
    pub fn new(store: Arc<dyn ObjectStore>, path: impl Into<String>) -> Self {
        Self { store, path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn append(&self, record: &EnrichedConversation) -> Result<AppendReceipt, AppendError> {
        let line = record.to_log_line()?;
        let summary = format!("Append conversation {}", record.conversation_id());
        let mut attempt = 0;

        loop {
            attempt += 1;
            let parent = self.head().await?;
            let mut content = self.read_log(parent.as_deref()).await?;
            let base_len = content.len();
            content.extend_from_slice(line.as_bytes());
            debug!(
                "Append attempt {}/{} for {}: base {:?}, {} existing bytes",
                attempt,
                MAX_ATTEMPTS,
                record.conversation_id(),
                parent,
                base_len
            );

            match self.store.write_object(&self.path, content, parent.as_deref(), &summary).await {
                Ok(revision) => {
                    info!(
                        "Appended {} to {} as revision {} (attempt {})",
                        record.conversation_id(),
                        self.path,
                        revision,
                        attempt
                    );
                    return Ok(AppendReceipt { attempts: attempt, parent, revision });
                }
                Err(e) if e.is_conflict() && attempt < MAX_ATTEMPTS => {
                    warn!("Upload conflict (attempt {}/{}), retrying: {}", attempt, MAX_ATTEMPTS, e);
                }
                Err(e) if e.is_conflict() => {
                    return Err(AppendError::ConflictsExhausted { attempts: attempt, last: e });
                }
                Err(e) => {
                    return Err(AppendError::Write(e));
                }
            }
        }
    }

    async fn head(&self) -> Result<Option<String>, AppendError> {
        let head = self.store.list_revisions().try_next().await.map_err(AppendError::Revisions)?;
        Ok(head.map(|r| r.id))
    }

    async fn read_log(&self, revision: Option<&str>) -> Result<Vec<u8>, AppendError> {
        match self.store.read_object(&self.path, revision).await {
            Ok(content) => Ok(content),
            Err(e) if e.is_not_found() => {
                debug!("{} does not exist yet, starting a new log", self.path);
                Ok(Vec::new())
            }
            Err(e) => Err(AppendError::Read(e)),
        }
    }
}
