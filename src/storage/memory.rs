use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{ self, BoxStream, StreamExt };
use std::collections::{ HashMap, VecDeque };
use std::sync::{ Mutex, MutexGuard, PoisonError };
use uuid::Uuid;
use super::{ ObjectStore, Revision, StoreError };

type Snapshot = HashMap<String, Vec<u8>>;

/// Revisions kept by default, head included.
pub const RETAINED_REVISIONS: usize = 8;

/// Process-local store with the same compare-and-swap contract as the Hub.
///
/// Every write creates a new revision holding a full snapshot, so reads at an
/// older revision see the content as it was then. Only the newest revisions
/// are kept; reading at a pruned one fails like an unknown revision.
pub struct MemoryObjectStore {
    history: Mutex<VecDeque<(Revision, Snapshot)>>,
    retained: usize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::with_retention(RETAINED_REVISIONS)
    }

    pub fn with_retention(retained: usize) -> Self {
        let initial = (new_revision("initial commit"), Snapshot::new());
        Self { history: Mutex::new(VecDeque::from([initial])), retained: retained.max(1) }
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<(Revision, Snapshot)>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Content of `path` at the head revision.
    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.history()
            .back()
            .and_then(|(_, snapshot)| snapshot.get(path).cloned())
    }

    /// Revisions currently retained, head included.
    pub fn revision_count(&self) -> usize {
        self.history().len()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

fn new_revision(title: &str) -> Revision {
    Revision {
        id: Uuid::new_v4().simple().to_string(),
        title: title.to_string(),
        date: Some(Utc::now().to_rfc3339()),
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn list_revisions(&self) -> BoxStream<'_, Result<Revision, StoreError>> {
        let revisions: Vec<_> = self.history()
            .iter()
            .rev()
            .map(|(revision, _)| Ok(revision.clone()))
            .collect();
        stream::iter(revisions).boxed()
    }

    async fn read_object(
        &self,
        path: &str,
        revision: Option<&str>
    ) -> Result<Vec<u8>, StoreError> {
        let history = self.history();
        let snapshot = match revision {
            Some(id) =>
                history
                    .iter()
                    .find(|(r, _)| r.id == id)
                    .map(|(_, s)| s)
                    .ok_or_else(|| StoreError::Http {
                        status: 404,
                        message: format!("unknown revision {}", id),
                    })?,
            None =>
                match history.back() {
                    Some((_, s)) => s,
                    None => return Err(StoreError::NotFound(path.to_string())),
                }
        };
        snapshot
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn write_object(
        &self,
        path: &str,
        content: Vec<u8>,
        parent: Option<&str>,
        summary: &str
    ) -> Result<String, StoreError> {
        let mut history = self.history();
        let head = history.back().map(|(r, _)| r.id.as_str());
        if parent != head {
            return Err(
                StoreError::Conflict(
                    format!("parent {:?} is behind head {:?}", parent, head)
                )
            );
        }
        let mut snapshot = history
            .back()
            .map(|(_, s)| s.clone())
            .unwrap_or_default();
        snapshot.insert(path.to_string(), content);
        let revision = new_revision(summary);
        let id = revision.id.clone();
        history.push_back((revision, snapshot));
        while history.len() > self.retained {
            history.pop_front();
        }
        Ok(id)
    }

    fn describe(&self) -> String {
        "in-memory store".to_string()
    }
}
