/// Job Queue - FIFO hand-off between intake and workers
///
/// Intake pushes at the tail, workers block on the head with a bounded wait.
/// Every item is delivered to exactly one competing consumer; arrival order is
/// the only ordering guarantee.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::error::{JudgeError, Result};
use crate::types::Job;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job at the tail of the queue.
    async fn enqueue(&self, job: &Job) -> Result<()>;

    /// Wait up to `timeout` for the job at the head.
    /// `Ok(None)` means the wait elapsed with nothing available.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>>;

    /// Number of jobs currently waiting
    async fn depth(&self) -> Result<usize>;

    /// Release the underlying connection. Idempotent.
    async fn close(&self);
}

pub fn encode_job(job: &Job) -> Result<String> {
    serde_json::to_string(job).map_err(|e| JudgeError::QueueUnavailable(e.to_string()))
}

/// The part of a queue entry that survives a schema mismatch, such as a
/// language tag added by a newer intake
#[derive(Deserialize)]
struct Envelope {
    submission_id: String,
}

pub fn decode_job(raw: &[u8]) -> Result<Job> {
    serde_json::from_slice(raw).map_err(|source| JudgeError::MalformedJob {
        submission_id: serde_json::from_slice::<Envelope>(raw)
            .ok()
            .map(|envelope| envelope.submission_id),
        source,
    })
}

/// In-process queue with the same contract as the Redis queue.
/// Only shared between tasks of one process; used by tests and single-process setups.
#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
    unavailable: AtomicBool,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an already-encoded entry, bypassing serialization
    pub async fn push_raw(&self, raw: impl Into<String>) {
        self.items.lock().await.push_back(raw.into());
        self.notify.notify_one();
    }

    /// Simulate the backing store going away (or coming back)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(JudgeError::QueueUnavailable("queue closed".to_string()));
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(JudgeError::QueueUnavailable("store unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        self.check()?;
        let raw = encode_job(job)?;
        self.push_raw(raw).await;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check()?;
            let notified = self.notify.notified();
            if let Some(raw) = self.items.lock().await.pop_front() {
                return decode_job(raw.as_bytes()).map(Some);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn depth(&self) -> Result<usize> {
        self.check()?;
        Ok(self.items.lock().await.len())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Language;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_round_trip_preserves_job() {
        let queue = MemoryQueue::new();
        let job = Job::new("sub-1", "print(\"hi\")", Language::Python);

        queue.enqueue(&job).await.unwrap();
        let popped = queue.dequeue(Duration::from_millis(50)).await.unwrap();

        assert_eq!(popped, Some(job));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        for i in 0..3 {
            queue
                .enqueue(&Job::new(format!("sub-{}", i), "", Language::Lua))
                .await
                .unwrap();
        }

        for i in 0..3 {
            let job = queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
            assert_eq!(job.submission_id, format!("sub-{}", i));
        }
    }

    #[tokio::test]
    async fn test_empty_queue_times_out_without_error() {
        let queue = MemoryQueue::new();
        let started = Instant::now();

        let popped = queue.dequeue(Duration::from_millis(30)).await.unwrap();

        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_blocked_consumer_wakes_on_enqueue() {
        let queue = Arc::new(MemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(&Job::new("late", "", Language::Perl)).await.unwrap();

        let popped = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(popped.submission_id, "late");
    }

    #[tokio::test]
    async fn test_malformed_entry_is_reported() {
        let queue = MemoryQueue::new();
        queue.push_raw("{not json").await;

        let err = queue.dequeue(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, JudgeError::MalformedJob { submission_id: None, .. }));

        // The poison entry is consumed, not redelivered
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_language_keeps_submission_id() {
        let queue = MemoryQueue::new();
        queue
            .push_raw(r#"{"submission_id":"sub-42","code":"x","language":"go"}"#)
            .await;

        let err = queue.dequeue(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(
            err,
            JudgeError::MalformedJob { submission_id: Some(ref id), .. } if id == "sub-42"
        ));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let err = decode_job(&[0xff, 0xfe, 0x7b]).unwrap_err();
        assert!(matches!(err, JudgeError::MalformedJob { submission_id: None, .. }));

        let err = decode_job(b"{\"submission_id\":\"\xff\"}").unwrap_err();
        assert!(matches!(err, JudgeError::MalformedJob { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let queue = MemoryQueue::new();
        queue.set_unavailable(true);

        let job = Job::new("x", "", Language::Php);
        assert!(matches!(
            queue.enqueue(&job).await,
            Err(JudgeError::QueueUnavailable(_))
        ));
        assert!(matches!(
            queue.dequeue(Duration::from_millis(10)).await,
            Err(JudgeError::QueueUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let queue = MemoryQueue::new();
        queue.close().await;
        queue.close().await;

        let job = Job::new("x", "", Language::Ruby);
        assert!(queue.enqueue(&job).await.is_err());
    }
}
