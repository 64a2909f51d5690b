//! Single-worker, in-memory job queue.
//!
//! Each [`JobQueue`] runs at most one item at a time. Items are identified by
//! `(job_id, kind)`; the queue never retries and never persists anything
//! itself. Durable state belongs to whatever the handler writes, which is
//! also what [`JobQueue::recover`] reads back on startup.
//!
//! A queue must be used from inside a tokio runtime: the worker task is
//! spawned lazily on the first enqueue.

use std::collections::VecDeque;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bound for the operation kind a queue dispatches on
pub trait JobKind: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> JobKind for T where T: Copy + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Errors from queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is full (capacity {capacity})")]
    Full { capacity: usize },
}

/// Cooperative cancellation flag bound to the processing item
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Status of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    /// Removed from the queue before it started
    Cancelled,
}

impl QueueItemStatus {
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            QueueItemStatus::Completed | QueueItemStatus::Failed | QueueItemStatus::Cancelled
        )
    }
}

/// One unit of work in a queue
#[derive(Debug, Clone)]
pub struct QueueItem<K> {
    pub job_id: Uuid,
    pub kind: K,
    pub status: QueueItemStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Error message when failed
    pub error: Option<String>,
}

impl<K: JobKind> QueueItem<K> {
    fn new(job_id: Uuid, kind: K) -> Self {
        Self {
            job_id,
            kind,
            status: QueueItemStatus::Queued,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    fn is(&self, job_id: Uuid, kind: K) -> bool {
        self.job_id == job_id && self.kind == kind
    }

    fn settle(&mut self, status: QueueItemStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The item was still queued and has been removed
    Dequeued,
    /// The item is processing; its token has been set
    Requested,
    /// No queued or processing item has this id
    NotFound,
}

/// Executes queue items
#[async_trait]
pub trait JobHandler<K>: Send + Sync {
    /// Run one item. Cancellation is cooperative: check `token` at safe
    /// points and return when it is set.
    async fn run(&self, job_id: Uuid, kind: K, token: CancelToken) -> anyhow::Result<()>;
}

/// Where startup recovery finds interrupted work
#[async_trait]
pub trait RecoverySource<K>: Send + Sync {
    /// Jobs that were queued or mid-run when the process stopped, with the
    /// operation each should resume at
    async fn interrupted_jobs(&self) -> anyhow::Result<Vec<(Uuid, K)>>;
}

/// Point-in-time view of a queue
#[derive(Debug, Clone)]
pub struct QueueSnapshot<K> {
    pub processing: Option<QueueItem<K>>,
    pub queued: Vec<QueueItem<K>>,
    /// Settled items, oldest first
    pub history: Vec<QueueItem<K>>,
}

struct QueueState<K> {
    pending: VecDeque<QueueItem<K>>,
    current: Option<(QueueItem<K>, CancelToken)>,
    history: VecDeque<QueueItem<K>>,
    worker_active: bool,
    recovered: bool,
}

impl<K: JobKind> QueueState<K> {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.current.is_none() && !self.worker_active
    }

    fn find(&self, job_id: Uuid) -> Option<QueueItem<K>> {
        if let Some((item, _)) = &self.current {
            if item.job_id == job_id {
                return Some(item.clone());
            }
        }
        if let Some(item) = self.pending.iter().find(|i| i.job_id == job_id) {
            return Some(item.clone());
        }
        self.history.iter().rev().find(|i| i.job_id == job_id).cloned()
    }
}

/// Bounded FIFO queue with a single lazily spawned worker
pub struct JobQueue<K: JobKind> {
    name: Arc<str>,
    capacity: usize,
    history_limit: usize,
    handler: Arc<dyn JobHandler<K>>,
    state: Arc<Mutex<QueueState<K>>>,
    settled: Arc<Notify>,
}

impl<K: JobKind> Clone for JobQueue<K> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            capacity: self.capacity,
            history_limit: self.history_limit,
            handler: self.handler.clone(),
            state: self.state.clone(),
            settled: self.settled.clone(),
        }
    }
}

impl<K: JobKind> JobQueue<K> {
    /// Default number of settled items kept for status lookups
    pub const DEFAULT_HISTORY_LIMIT: usize = 100;

    pub fn new(name: &str, capacity: usize, handler: Arc<dyn JobHandler<K>>) -> Self {
        Self {
            name: Arc::from(name),
            capacity,
            history_limit: Self::DEFAULT_HISTORY_LIMIT,
            handler,
            state: Arc::new(Mutex::new(QueueState {
                pending: VecDeque::new(),
                current: None,
                history: VecDeque::new(),
                worker_active: false,
                recovered: false,
            })),
            settled: Arc::new(Notify::new()),
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit a job.
    ///
    /// Idempotent: if the same `(job_id, kind)` is already queued or
    /// processing, that entry is returned unchanged. Queued plus processing
    /// items count toward capacity.
    pub fn enqueue(&self, job_id: Uuid, kind: K) -> Result<QueueItem<K>, QueueError> {
        let mut state = self.state.lock();

        if let Some((item, _)) = &state.current {
            if item.is(job_id, kind) {
                debug!(queue = %self.name, %job_id, %kind, "Already processing");
                return Ok(item.clone());
            }
        }
        if let Some(item) = state.pending.iter().find(|i| i.is(job_id, kind)) {
            debug!(queue = %self.name, %job_id, %kind, "Already queued");
            return Ok(item.clone());
        }

        let occupied = state.pending.len() + usize::from(state.current.is_some());
        if occupied >= self.capacity {
            warn!(queue = %self.name, %job_id, capacity = self.capacity, "Queue full");
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }

        let item = QueueItem::new(job_id, kind);
        state.pending.push_back(item.clone());
        info!(queue = %self.name, %job_id, %kind, depth = state.pending.len(), "Enqueued");

        if !state.worker_active {
            state.worker_active = true;
            let worker = self.clone();
            tokio::spawn(async move { worker.run_worker().await });
        }

        Ok(item)
    }

    async fn run_worker(self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(mut item) => {
                        item.status = QueueItemStatus::Processing;
                        item.started_at = Some(Utc::now());
                        let token = CancelToken::new();
                        state.current = Some((item.clone(), token.clone()));
                        Some((item, token))
                    }
                    None => {
                        state.worker_active = false;
                        None
                    }
                }
            };

            let Some((item, token)) = next else {
                debug!(queue = %self.name, "Worker idle");
                self.settled.notify_waiters();
                return;
            };

            info!(queue = %self.name, job_id = %item.job_id, kind = %item.kind, "Processing");
            let handler = self.handler.clone();
            let (job_id, kind) = (item.job_id, item.kind);
            let joined =
                tokio::spawn(async move { handler.run(job_id, kind, token).await }).await;

            let (status, message) = match joined {
                Ok(Ok(())) => (QueueItemStatus::Completed, None),
                Ok(Err(e)) => (QueueItemStatus::Failed, Some(format!("{:#}", e))),
                Err(e) => (QueueItemStatus::Failed, Some(format!("job panicked: {}", e))),
            };

            match &message {
                None => info!(queue = %self.name, %job_id, %kind, "Completed"),
                Some(err) => error!(queue = %self.name, %job_id, %kind, error = %err, "Failed"),
            }

            {
                let mut state = self.state.lock();
                if let Some((mut settled, _)) = state.current.take() {
                    settled.settle(status, message);
                    self.push_history(&mut state, settled);
                }
            }
            self.settled.notify_waiters();

            tokio::task::yield_now().await;
        }
    }

    fn push_history(&self, state: &mut QueueState<K>, item: QueueItem<K>) {
        state.history.push_back(item);
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }
    }

    /// Latest known state of a job: processing, queued, or settled history
    pub fn status(&self, job_id: Uuid) -> Option<QueueItem<K>> {
        self.state.lock().find(job_id)
    }

    /// Cancel a job by id.
    ///
    /// A queued item is removed immediately. A processing item only has its
    /// token set; the handler decides what that means.
    pub fn cancel(&self, job_id: Uuid) -> CancelOutcome {
        let mut state = self.state.lock();

        if let Some((item, token)) = &state.current {
            if item.job_id == job_id {
                token.cancel();
                info!(queue = %self.name, %job_id, "Cancellation requested");
                return CancelOutcome::Requested;
            }
        }

        if let Some(pos) = state.pending.iter().position(|i| i.job_id == job_id) {
            if let Some(mut item) = state.pending.remove(pos) {
                item.settle(QueueItemStatus::Cancelled, None);
                self.push_history(&mut state, item);
                drop(state);
                self.settled.notify_waiters();
                info!(queue = %self.name, %job_id, "Dequeued");
                return CancelOutcome::Dequeued;
            }
        }

        CancelOutcome::NotFound
    }

    /// Queued plus processing items
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.pending.len() + usize::from(state.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn snapshot(&self) -> QueueSnapshot<K> {
        let state = self.state.lock();
        QueueSnapshot {
            processing: state.current.as_ref().map(|(item, _)| item.clone()),
            queued: state.pending.iter().cloned().collect(),
            history: state.history.iter().cloned().collect(),
        }
    }

    /// Re-submit interrupted work. Runs at most once per queue; later calls
    /// return `Ok(0)`.
    pub async fn recover(&self, source: &dyn RecoverySource<K>) -> anyhow::Result<usize> {
        {
            let mut state = self.state.lock();
            if state.recovered {
                debug!(queue = %self.name, "Recovery already ran");
                return Ok(0);
            }
            state.recovered = true;
        }

        let jobs = source.interrupted_jobs().await?;
        let mut resubmitted = 0;
        for (job_id, kind) in jobs {
            match self.enqueue(job_id, kind) {
                Ok(_) => resubmitted += 1,
                Err(e) => warn!(queue = %self.name, %job_id, error = %e, "Could not recover job"),
            }
        }

        if resubmitted > 0 {
            info!(queue = %self.name, resubmitted, "Recovered interrupted jobs");
        }
        Ok(resubmitted)
    }

    /// Resolve once nothing is queued or processing
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Resolve once `job_id` has settled. Returns `None` if the queue has
    /// never seen it (or it fell out of history).
    pub async fn wait_for(&self, job_id: Uuid) -> Option<QueueItem<K>> {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.status(job_id) {
                None => return None,
                Some(item) if item.status.is_settled() => return Some(item),
                Some(_) => {}
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestKind {
        Work,
        Fail,
        Panic,
        UntilCancelled,
    }

    impl fmt::Display for TestKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    struct TestHandler {
        gate: Semaphore,
        running: AtomicUsize,
        max_running: AtomicUsize,
        order: parking_lot::Mutex<Vec<Uuid>>,
    }

    impl TestHandler {
        fn new(permits: usize) -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(permits),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                order: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl JobHandler<TestKind> for TestHandler {
        async fn run(&self, job_id: Uuid, kind: TestKind, token: CancelToken) -> anyhow::Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            self.order.lock().push(job_id);

            let result = match kind {
                TestKind::Work => {
                    self.gate.acquire().await.unwrap().forget();
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    Ok(())
                }
                TestKind::Fail => Err(anyhow::anyhow!("boom")),
                TestKind::Panic => panic!("handler panic"),
                TestKind::UntilCancelled => {
                    while !token.is_cancelled() {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                    }
                    Ok(())
                }
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test]
    async fn test_runs_one_at_a_time_in_order() {
        let handler = TestHandler::new(100);
        let queue = JobQueue::new("test", 10, handler.clone());
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue(*id, TestKind::Work).unwrap();
        }

        queue.wait_idle().await;

        assert_eq!(handler.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(*handler.order.lock(), ids);
        for id in &ids {
            assert_eq!(queue.status(*id).unwrap().status, QueueItemStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_returns_existing() {
        let handler = TestHandler::new(0);
        let queue = JobQueue::new("test", 10, handler.clone());
        let id = Uuid::new_v4();

        let first = queue.enqueue(id, TestKind::Work).unwrap();
        let second = queue.enqueue(id, TestKind::Work).unwrap();
        assert_eq!(first.enqueued_at, second.enqueued_at);
        assert_eq!(queue.len(), 1);

        handler.gate.add_permits(1);
        queue.wait_idle().await;
        assert_eq!(handler.order.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_counts_processing_item() {
        let handler = TestHandler::new(0);
        let queue = JobQueue::new("test", 2, handler.clone());

        queue.enqueue(Uuid::new_v4(), TestKind::Work).unwrap();
        queue.enqueue(Uuid::new_v4(), TestKind::Work).unwrap();
        let err = queue.enqueue(Uuid::new_v4(), TestKind::Work).unwrap_err();
        assert!(matches!(err, QueueError::Full { capacity: 2 }));

        handler.gate.add_permits(2);
        queue.wait_idle().await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_recorded_not_retried() {
        let handler = TestHandler::new(10);
        let queue = JobQueue::new("test", 10, handler.clone());
        let failing = Uuid::new_v4();
        let panicking = Uuid::new_v4();
        let after = Uuid::new_v4();

        queue.enqueue(failing, TestKind::Fail).unwrap();
        queue.enqueue(panicking, TestKind::Panic).unwrap();
        queue.enqueue(after, TestKind::Work).unwrap();
        queue.wait_idle().await;

        let failed = queue.status(failing).unwrap();
        assert_eq!(failed.status, QueueItemStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(queue.status(panicking).unwrap().status, QueueItemStatus::Failed);
        assert_eq!(queue.status(after).unwrap().status, QueueItemStatus::Completed);
        assert_eq!(handler.order.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_queued_and_processing() {
        let handler = TestHandler::new(0);
        let queue = JobQueue::new("test", 10, handler.clone());
        let running = Uuid::new_v4();
        let waiting = Uuid::new_v4();

        queue.enqueue(running, TestKind::UntilCancelled).unwrap();
        queue.enqueue(waiting, TestKind::Work).unwrap();

        while queue.snapshot().processing.is_none() {
            tokio::task::yield_now().await;
        }

        assert_eq!(queue.cancel(waiting), CancelOutcome::Dequeued);
        assert_eq!(queue.status(waiting).unwrap().status, QueueItemStatus::Cancelled);
        assert_eq!(queue.cancel(running), CancelOutcome::Requested);
        assert_eq!(queue.cancel(Uuid::new_v4()), CancelOutcome::NotFound);

        let settled = queue.wait_for(running).await.unwrap();
        assert_eq!(settled.status, QueueItemStatus::Completed);
        assert_eq!(*handler.order.lock(), vec![running]);
    }

    struct FixedSource(Vec<(Uuid, TestKind)>);

    #[async_trait]
    impl RecoverySource<TestKind> for FixedSource {
        async fn interrupted_jobs(&self) -> anyhow::Result<Vec<(Uuid, TestKind)>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_recover_runs_once() {
        let handler = TestHandler::new(10);
        let queue = JobQueue::new("test", 10, handler.clone());
        let source = FixedSource(vec![(Uuid::new_v4(), TestKind::Work), (Uuid::new_v4(), TestKind::Work)]);

        assert_eq!(queue.recover(&source).await.unwrap(), 2);
        assert_eq!(queue.recover(&source).await.unwrap(), 0);
        queue.wait_idle().await;
        assert_eq!(handler.order.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let handler = TestHandler::new(10);
        let queue = JobQueue::new("test", 10, handler).with_history_limit(2);
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue(*id, TestKind::Work).unwrap();
        }
        queue.wait_idle().await;

        assert_eq!(queue.snapshot().history.len(), 2);
        assert!(queue.status(ids[0]).is_none());
        assert!(queue.status(ids[3]).is_some());
    }
}
