/// Status Log - latest worker-reported status per submission
///
/// Workers write every status change here. Intake normally learns about
/// changes from the pub/sub fast path, and falls back to reading this log
/// for records that are still non-terminal, so an event missed while the
/// subscriber was disconnected is still picked up on the next poll.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::types::StatusEvent;

#[async_trait]
pub trait StatusLog: Send + Sync {
    /// Store `event` as the latest status of its submission
    async fn record(&self, event: &StatusEvent) -> Result<()>;

    /// Latest recorded event, `None` if no worker has reported yet
    async fn latest(&self, submission_id: &str) -> Result<Option<StatusEvent>>;
}

/// In-process status log for tests and single-process setups
#[derive(Default)]
pub struct MemoryStatusLog {
    events: Mutex<HashMap<String, StatusEvent>>,
}

impl MemoryStatusLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusLog for MemoryStatusLog {
    async fn record(&self, event: &StatusEvent) -> Result<()> {
        self.events
            .lock()
            .await
            .insert(event.submission_id.clone(), event.clone());
        Ok(())
    }

    async fn latest(&self, submission_id: &str) -> Result<Option<StatusEvent>> {
        Ok(self.events.lock().await.get(submission_id).cloned())
    }
}
