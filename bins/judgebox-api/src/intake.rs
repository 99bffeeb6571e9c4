/// Submission Intake
///
/// Assigns ids, records PENDING, enqueues, and answers status queries.
/// The status map lives only in this process and only for its lifetime.
/// Workers move records forward through status events applied by
/// [`SubmissionService::apply`], either pushed by the subscriber or read
/// back from the shared status log when a record is polled before it is
/// terminal.

use judgebox_common::error::{JudgeError, Result};
use judgebox_common::queue::JobQueue;
use judgebox_common::status::StatusLog;
use judgebox_common::types::{Job, Language, StatusEvent, SubmissionStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::metrics;

/// Synchronized id → status map
#[derive(Default)]
pub struct StatusStore {
    records: RwLock<HashMap<String, SubmissionStatus>>,
}

impl StatusStore {
    pub async fn insert_pending(&self, id: &str) {
        self.records
            .write()
            .await
            .insert(id.to_string(), SubmissionStatus::Pending);
    }

    pub async fn remove(&self, id: &str) {
        self.records.write().await.remove(id);
    }

    pub async fn get(&self, id: &str) -> Option<SubmissionStatus> {
        self.records.read().await.get(id).copied()
    }

    /// Move a record forward. Unknown ids are ignored, terminal records are
    /// final, and PENDING/NOT_FOUND are never written by an update.
    pub async fn advance(&self, id: &str, status: SubmissionStatus) -> bool {
        if matches!(status, SubmissionStatus::Pending | SubmissionStatus::NotFound) {
            return false;
        }

        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(current) if !current.is_terminal() => {
                *current = status;
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

pub struct SubmissionService {
    queue: Arc<dyn JobQueue>,
    status_log: Arc<dyn StatusLog>,
    statuses: StatusStore,
}

impl SubmissionService {
    pub fn new(queue: Arc<dyn JobQueue>, status_log: Arc<dyn StatusLog>) -> Self {
        Self {
            queue,
            status_log,
            statuses: StatusStore::default(),
        }
    }

    /// Accept a submission. On success the id is queued and reads PENDING.
    /// If enqueue fails the record is rolled back, so the id reads NOT_FOUND
    /// and the caller gets `EnqueueFailed`.
    pub async fn submit(&self, code: String, language: &str) -> Result<(String, Language)> {
        let language: Language = language.parse()?;
        let submission_id = Uuid::new_v4().to_string();

        // Record before enqueue so a fast worker's RUNNING event finds it
        self.statuses.insert_pending(&submission_id).await;

        let job = Job::new(submission_id.clone(), code, language);
        if let Err(e) = self.queue.enqueue(&job).await {
            self.statuses.remove(&submission_id).await;
            tracing::error!(submission_id = %submission_id, error = %e, "Enqueue failed; record rolled back");
            return Err(JudgeError::EnqueueFailed(e.to_string()));
        }

        tracing::info!(submission_id = %submission_id, language = %language, "Submission queued");
        Ok((submission_id, language))
    }

    pub async fn get_status(&self, submission_id: &str) -> SubmissionStatus {
        let current = match self.statuses.get(submission_id).await {
            Some(status) => status,
            None => return SubmissionStatus::NotFound,
        };
        if current.is_terminal() {
            return current;
        }

        // Catch up on events the subscriber missed while disconnected
        match self.status_log.latest(submission_id).await {
            Ok(Some(event)) => {
                self.apply(&event).await;
                self.statuses.get(submission_id).await.unwrap_or(current)
            }
            Ok(None) => current,
            Err(e) => {
                tracing::warn!(submission_id, error = %e, "Status log unavailable");
                current
            }
        }
    }

    /// Apply a worker status event. Returns whether the record changed.
    pub async fn apply(&self, event: &StatusEvent) -> bool {
        let applied = self.statuses.advance(&event.submission_id, event.status).await;
        if applied && event.status.is_terminal() {
            metrics::record_completion(
                event.language.map(|l| l.as_str()).unwrap_or("unknown"),
                event.status.as_str(),
                event.execution_time_ms,
            );
        }
        if !applied {
            tracing::debug!(
                submission_id = %event.submission_id,
                status = %event.status,
                "Ignored status event"
            );
        }
        applied
    }

    pub async fn queue_depth(&self) -> Result<usize> {
        self.queue.depth().await
    }

    pub async fn tracked(&self) -> usize {
        self.statuses.len().await
    }
}
