use async_trait::async_trait;
use log::{ debug, info, warn };
use serde::{ Serialize, Deserialize };
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{ AtomicBool, Ordering };
use thiserror::Error;
use tokio::sync::Mutex;
use crate::models::conversation::ConversationPayload;
use super::Submitter;

pub const MAX_QUEUED: usize = 100;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue file IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue file JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Local persistence for the queue contents.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn load(&self) -> Result<Vec<ConversationPayload>, QueueError>;
    async fn save(&self, entries: &[ConversationPayload]) -> Result<(), QueueError>;
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QueueFile {
    #[serde(default)]
    retry_queue: Vec<ConversationPayload>,
}

/// Keeps the queue as a single `retryQueue` entry in a JSON file.
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn load(&self) -> Result<Vec<ConversationPayload>, QueueError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice::<QueueFile>(&bytes)?.retry_queue),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, entries: &[ConversationPayload]) -> Result<(), QueueError> {
        let file = QueueFile { retry_queue: entries.to_vec() };
        let json = serde_json::to_vec_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub resubmitted: usize,
    pub rejected: usize,
    pub remaining: usize,
    /// Draining stopped at a transient failure before reaching the end.
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Finished(DrainReport),
    AlreadyDraining,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A queued payload tagged with its position in push order.
///
/// Sequence numbers let a drain walk the queue even when identical payloads
/// are queued twice or pushes evict entries underneath it.
struct Pending {
    seq: u64,
    payload: ConversationPayload,
}

struct Entries {
    items: VecDeque<Pending>,
    next_seq: u64,
}

impl Entries {
    fn new(payloads: Vec<ConversationPayload>) -> Self {
        let mut entries = Self { items: VecDeque::with_capacity(payloads.len()), next_seq: 0 };
        for payload in payloads {
            entries.push_back(payload);
        }
        entries
    }

    fn push_back(&mut self, payload: ConversationPayload) {
        self.items.push_back(Pending { seq: self.next_seq, payload });
        self.next_seq += 1;
    }

    /// First entry pushed after `seq`, or the front when `seq` is `None`.
    fn after(&self, seq: Option<u64>) -> Option<&Pending> {
        self.items.iter().find(|p| seq.map_or(true, |s| p.seq > s))
    }

    fn remove(&mut self, seq: u64) -> bool {
        match self.items.iter().position(|p| p.seq == seq) {
            Some(i) => self.items.remove(i).is_some(),
            None => false,
        }
    }

    fn payloads(&self) -> Vec<ConversationPayload> {
        self.items.iter().map(|p| p.payload.clone()).collect()
    }
}

/// Bounded FIFO of payloads waiting to be resubmitted.
///
/// Full queues evict their oldest entry. Every mutation is written through to
/// the `QueueStore` before it returns.
pub struct RetryQueue {
    store: Box<dyn QueueStore>,
    entries: Mutex<Entries>,
    capacity: usize,
    draining: AtomicBool,
}

impl RetryQueue {
    pub async fn open(store: Box<dyn QueueStore>) -> Result<Self, QueueError> {
        Self::with_capacity(store, MAX_QUEUED).await
    }

    pub async fn with_capacity(store: Box<dyn QueueStore>, capacity: usize) -> Result<Self, QueueError> {
        let mut loaded = store.load().await?;
        if loaded.len() > capacity {
            loaded.drain(..loaded.len() - capacity);
        }
        debug!("Loaded retry queue with {} entries", loaded.len());
        Ok(Self {
            store,
            entries: Mutex::new(Entries::new(loaded)),
            capacity,
            draining: AtomicBool::new(false),
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<ConversationPayload> {
        self.entries.lock().await.payloads()
    }

    /// Adds a payload at the back and returns the entry evicted to make room, if any.
    pub async fn push(&self, payload: ConversationPayload) -> Result<Option<ConversationPayload>, QueueError> {
        let mut entries = self.entries.lock().await;
        entries.push_back(payload);
        let evicted = if entries.items.len() > self.capacity {
            entries.items.pop_front().map(|p| p.payload)
        } else {
            None
        };
        if let Some(old) = &evicted {
            warn!("Retry queue full, dropped oldest conversation {}", old.conversation_id);
        }
        self.persist(&entries).await?;
        info!("Queued for retry ({} in queue)", entries.items.len());
        Ok(evicted)
    }

    /// Resubmits queued payloads in order.
    ///
    /// Accepted payloads are removed. Clean rejections stay queued and the
    /// drain moves on. A transient failure stops the drain and leaves that
    /// payload and everything behind it in place. Only one drain runs at a
    /// time; a second caller gets `AlreadyDraining`.
    ///
    /// Each entry is submitted at most once per drain, including entries
    /// pushed while the drain runs.
    pub async fn drain(&self, submitter: &dyn Submitter) -> Result<DrainOutcome, QueueError> {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            debug!("Retry queue drain already in progress");
            return Ok(DrainOutcome::AlreadyDraining);
        };

        let mut report = DrainReport::default();
        let mut last_seen = None;

        loop {
            let next = self.entries
                .lock().await
                .after(last_seen)
                .map(|p| (p.seq, p.payload.clone()));
            let Some((seq, payload)) = next else {
                break;
            };
            last_seen = Some(seq);

            match submitter.submit(&payload).await {
                Ok(_) => {
                    let mut entries = self.entries.lock().await;
                    if entries.remove(seq) {
                        self.persist(&entries).await?;
                    } else {
                        debug!("Resubmitted {} was evicted during the drain", payload.conversation_id);
                    }
                    report.resubmitted += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!("Stopping retry queue drain at {}: {}", payload.conversation_id, e);
                    report.interrupted = true;
                    break;
                }
                Err(e) => {
                    warn!("Queued conversation {} rejected again: {}", payload.conversation_id, e);
                    report.rejected += 1;
                }
            }
        }

        report.remaining = self.len().await;
        info!(
            "Retry queue drained: {} resubmitted, {} rejected, {} remaining",
            report.resubmitted,
            report.rejected,
            report.remaining
        );
        Ok(DrainOutcome::Finished(report))
    }

    async fn persist(&self, entries: &Entries) -> Result<(), QueueError> {
        self.store.save(&entries.payloads()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SubmitError;
    use crate::models::api::Accepted;
    use crate::models::conversation::{ Message, Platform, Role };
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    fn payload(id: &str) -> ConversationPayload {
        ConversationPayload {
            conversation_id: id.into(),
            platform: Platform::Grok,
            model: None,
            turns: vec![Message { role: Role::User, content: "q".into() }],
            captured_at: "2026-01-01T00:00:00Z".into(),
            extension_version: "1.0.0".into(),
        }
    }

    #[derive(Default)]
    struct MemoryQueueStore {
        saved: Arc<StdMutex<Vec<ConversationPayload>>>,
    }

    #[async_trait]
    impl QueueStore for MemoryQueueStore {
        async fn load(&self) -> Result<Vec<ConversationPayload>, QueueError> {
            Ok(self.saved.lock().unwrap().clone())
        }

        async fn save(&self, entries: &[ConversationPayload]) -> Result<(), QueueError> {
            *self.saved.lock().unwrap() = entries.to_vec();
            Ok(())
        }
    }

    enum Answer {
        Accept,
        Reject,
        Offline,
    }

    /// Answers per conversation id; unknown ids are accepted.
    #[derive(Default)]
    struct ScriptedSubmitter {
        answers: HashMap<String, Answer>,
        seen: StdMutex<Vec<String>>,
    }

    impl ScriptedSubmitter {
        fn answer(mut self, id: &str, answer: Answer) -> Self {
            self.answers.insert(id.into(), answer);
            self
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Submitter for ScriptedSubmitter {
        async fn submit(&self, payload: &ConversationPayload) -> Result<Accepted, SubmitError> {
            self.seen.lock().unwrap().push(payload.conversation_id.clone());
            match self.answers.get(&payload.conversation_id).unwrap_or(&Answer::Accept) {
                Answer::Accept => Ok(Accepted::new(&payload.conversation_id)),
                Answer::Reject =>
                    Err(SubmitError::Rejected { status: 400, message: "Invalid turn format".into() }),
                Answer::Offline => Err(SubmitError::Unavailable("connection refused".into())),
            }
        }
    }

    async fn queue_with(ids: &[&str]) -> (RetryQueue, Arc<StdMutex<Vec<ConversationPayload>>>) {
        let store = MemoryQueueStore::default();
        let saved = store.saved.clone();
        let queue = RetryQueue::open(Box::new(store)).await.unwrap();
        for id in ids {
            queue.push(payload(id)).await.unwrap();
        }
        (queue, saved)
    }

    fn ids(entries: &[ConversationPayload]) -> Vec<&str> {
        entries.iter().map(|p| p.conversation_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_push_evicts_oldest_when_full() {
        let store = MemoryQueueStore::default();
        let saved = store.saved.clone();
        let queue = RetryQueue::with_capacity(Box::new(store), 3).await.unwrap();

        for id in ["a", "b", "c"] {
            assert!(queue.push(payload(id)).await.unwrap().is_none());
        }
        let evicted = queue.push(payload("d")).await.unwrap();
        assert_eq!(evicted.unwrap().conversation_id, "a");
        assert_eq!(ids(&queue.snapshot().await), vec!["b", "c", "d"]);
        assert_eq!(ids(&saved.lock().unwrap()), vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_default_capacity_is_one_hundred() {
        let (queue, _) = queue_with(&[]).await;
        for i in 0..105 {
            queue.push(payload(&format!("p{}", i))).await.unwrap();
        }
        let entries = queue.snapshot().await;
        assert_eq!(entries.len(), MAX_QUEUED);
        assert_eq!(entries[0].conversation_id, "p5");
        assert_eq!(entries[99].conversation_id, "p104");
    }

    #[tokio::test]
    async fn test_drain_removes_accepted_and_keeps_rejected() {
        let (queue, saved) = queue_with(&["a", "b", "c"]).await;
        let submitter = ScriptedSubmitter::default().answer("b", Answer::Reject);

        let outcome = queue.drain(&submitter).await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Finished(DrainReport { resubmitted: 2, rejected: 1, remaining: 1, interrupted: false })
        );
        assert_eq!(submitter.seen(), vec!["a", "b", "c"]);
        assert_eq!(ids(&saved.lock().unwrap()), vec!["b"]);
    }

    #[tokio::test]
    async fn test_drain_stops_at_transient_failure_and_keeps_the_rest() {
        let (queue, saved) = queue_with(&["a", "b", "c", "d"]).await;
        let submitter = ScriptedSubmitter::default().answer("b", Answer::Offline);

        let outcome = queue.drain(&submitter).await.unwrap();
        let DrainOutcome::Finished(report) = outcome else { panic!("drain did not run") };
        assert!(report.interrupted);
        assert_eq!(report.resubmitted, 1);
        assert_eq!(report.remaining, 3);
        assert_eq!(submitter.seen(), vec!["a", "b"]);
        assert_eq!(ids(&saved.lock().unwrap()), vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_drain_of_empty_queue() {
        let (queue, _) = queue_with(&[]).await;
        let submitter = ScriptedSubmitter::default();
        let outcome = queue.drain(&submitter).await.unwrap();
        assert_eq!(outcome, DrainOutcome::Finished(DrainReport::default()));
        assert!(submitter.seen().is_empty());
    }

    #[tokio::test]
    async fn test_identical_rejected_payloads_are_each_submitted_once() {
        let (queue, saved) = queue_with(&["dup", "dup"]).await;
        let submitter = ScriptedSubmitter::default().answer("dup", Answer::Reject);

        let outcome = queue.drain(&submitter).await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Finished(DrainReport { resubmitted: 0, rejected: 2, remaining: 2, interrupted: false })
        );
        assert_eq!(submitter.seen(), vec!["dup", "dup"]);
        assert_eq!(ids(&saved.lock().unwrap()), vec!["dup", "dup"]);
    }

    #[tokio::test]
    async fn test_accepting_one_of_two_identical_payloads_keeps_the_other() {
        let (queue, _) = queue_with(&["dup", "other", "dup"]).await;
        let submitter = ScriptedSubmitter::default().answer("other", Answer::Reject);

        queue.drain(&submitter).await.unwrap();
        assert_eq!(submitter.seen(), vec!["dup", "other", "dup"]);
        assert_eq!(ids(&queue.snapshot().await), vec!["other"]);
    }

    /// Pushes one new payload into a full queue while the first submission is
    /// in flight, evicting that submission's own entry.
    struct EvictingSubmitter {
        queue: Arc<RetryQueue>,
        seen: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Submitter for EvictingSubmitter {
        async fn submit(&self, queued: &ConversationPayload) -> Result<Accepted, SubmitError> {
            let first = {
                let mut seen = self.seen.lock().unwrap();
                seen.push(queued.conversation_id.clone());
                seen.len() == 1
            };
            if first {
                self.queue.push(payload("d")).await.unwrap();
            }
            Err(SubmitError::Rejected { status: 401, message: "Unauthorized".into() })
        }
    }

    #[tokio::test]
    async fn test_eviction_during_drain_skips_nothing() {
        let queue = RetryQueue::with_capacity(Box::new(MemoryQueueStore::default()), 3).await.unwrap();
        let queue = Arc::new(queue);
        for id in ["a", "b", "c"] {
            queue.push(payload(id)).await.unwrap();
        }
        let submitter = EvictingSubmitter { queue: queue.clone(), seen: StdMutex::new(Vec::new()) };

        let outcome = queue.drain(&submitter).await.unwrap();
        let DrainOutcome::Finished(report) = outcome else { panic!("drain did not run") };
        assert_eq!(report.rejected, 4);
        assert_eq!(*submitter.seen.lock().unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(ids(&queue.snapshot().await), vec!["b", "c", "d"]);
    }

    /// Blocks every submission until released, so a drain can be held open.
    struct GatedSubmitter {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Submitter for GatedSubmitter {
        async fn submit(&self, payload: &ConversationPayload) -> Result<Accepted, SubmitError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Accepted::new(&payload.conversation_id))
        }
    }

    #[tokio::test]
    async fn test_concurrent_drain_is_a_noop_and_pushes_survive() {
        let (queue, saved) = queue_with(&["a"]).await;
        let queue = Arc::new(queue);
        let gate = Arc::new(GatedSubmitter { entered: Notify::new(), release: Notify::new() });

        let running = {
            let queue = queue.clone();
            let gate = gate.clone();
            tokio::spawn(async move { queue.drain(gate.as_ref()).await })
        };
        gate.entered.notified().await;

        let second = queue.drain(&ScriptedSubmitter::default()).await.unwrap();
        assert_eq!(second, DrainOutcome::AlreadyDraining);

        // Submission failed elsewhere while the drain is in flight.
        queue.push(payload("late")).await.unwrap();
        assert_eq!(ids(&saved.lock().unwrap()), vec!["a", "late"]);

        gate.release.notify_one();
        gate.entered.notified().await;
        gate.release.notify_one();
        let first = running.await.unwrap().unwrap();
        let DrainOutcome::Finished(report) = first else { panic!("drain did not run") };
        assert_eq!(report.resubmitted, 2);
        assert!(saved.lock().unwrap().is_empty());

        // The guard is released once the drain finishes.
        let again = queue.drain(&ScriptedSubmitter::default()).await.unwrap();
        assert!(matches!(again, DrainOutcome::Finished(_)));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("retry-queue-{}", uuid::Uuid::new_v4()));
        let path = dir.join("queue.json");

        let queue = RetryQueue::open(Box::new(FileQueueStore::new(&path))).await.unwrap();
        assert!(queue.is_empty().await);
        queue.push(payload("x")).await.unwrap();
        queue.push(payload("y")).await.unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["retryQueue"].as_array().unwrap().len(), 2);

        let reopened = RetryQueue::open(Box::new(FileQueueStore::new(&path))).await.unwrap();
        assert_eq!(ids(&reopened.snapshot().await), vec!["x", "y"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
