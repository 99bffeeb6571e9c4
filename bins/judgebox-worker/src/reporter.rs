// Status write-back from worker to intake

use async_trait::async_trait;
use judgebox_common::status::StatusLog;
use judgebox_common::types::StatusEvent;
use std::sync::Arc;

#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Deliver a status change. Failures are logged, never fatal.
    async fn report(&self, event: StatusEvent);
}

/// Writes status events to the shared status log that intake reads back
pub struct LogReporter {
    log: Arc<dyn StatusLog>,
}

impl LogReporter {
    pub fn new(log: Arc<dyn StatusLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl StatusReporter for LogReporter {
    async fn report(&self, event: StatusEvent) {
        if let Err(e) = self.log.record(&event).await {
            tracing::error!(
                submission_id = %event.submission_id,
                status = %event.status,
                error = %e,
                "Failed to record status"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use judgebox_common::error::{JudgeError, Result};
    use judgebox_common::status::MemoryStatusLog;
    use judgebox_common::types::{Job, Language, SubmissionStatus};

    struct DownLog;

    #[async_trait]
    impl StatusLog for DownLog {
        async fn record(&self, _event: &StatusEvent) -> Result<()> {
            Err(JudgeError::QueueUnavailable("store unreachable".to_string()))
        }

        async fn latest(&self, _submission_id: &str) -> Result<Option<StatusEvent>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_report_records_latest_status() {
        let log = Arc::new(MemoryStatusLog::new());
        let reporter = LogReporter::new(log.clone());
        let job = Job::new("r1", "x", Language::Lua);

        reporter.report(StatusEvent::running(&job)).await;
        reporter.report(StatusEvent::internal_error(&job)).await;

        let latest = log.latest("r1").await.unwrap().unwrap();
        assert_eq!(latest.status, SubmissionStatus::InternalError);
    }

    #[tokio::test]
    async fn test_report_swallows_store_errors() {
        let reporter = LogReporter::new(Arc::new(DownLog));
        reporter.report(StatusEvent::rejected("r2")).await;
    }
}
