/// Worker Dispatch Loop
///
/// Drains the job queue one job at a time and drives each through the
/// execution engine. Scaling out means running more worker processes against
/// the same queue, not more executions per loop.
///
/// Failures are terminal for the submission: a job that errors or times out
/// is reported once and never re-queued. That includes transient sandbox
/// provisioning failures.

use judgebox_common::error::JudgeError;
use judgebox_common::queue::JobQueue;
use judgebox_common::types::{Job, StatusEvent, SubmissionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::engine::ExecutionEngine;
use crate::reporter::StatusReporter;

/// What a single poll of the queue ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The bounded wait elapsed with nothing queued
    Idle,
    /// A job ran to a terminal status
    Finished(SubmissionStatus),
    /// A poison entry was dropped
    Skipped,
    /// The queue store could not be reached
    QueueUnavailable,
}

pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    engine: Arc<dyn ExecutionEngine>,
    reporter: Arc<dyn StatusReporter>,
    poll_timeout: Duration,
    retry_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        engine: Arc<dyn ExecutionEngine>,
        reporter: Arc<dyn StatusReporter>,
        poll_timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            queue,
            engine,
            reporter,
            poll_timeout,
            retry_delay,
        }
    }

    /// Loop until `shutdown` flips to true. The flag is checked between
    /// polls, so a job already executing runs to completion first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(poll_timeout_secs = self.poll_timeout.as_secs(), "Dispatch loop started");

        while !*shutdown.borrow() {
            if self.poll_once().await == PollOutcome::QueueUnavailable {
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_delay) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        tracing::info!("Dispatch loop stopped");
    }

    pub async fn poll_once(&self) -> PollOutcome {
        match self.queue.dequeue(self.poll_timeout).await {
            Ok(Some(job)) => PollOutcome::Finished(self.handle(job).await),
            Ok(None) => PollOutcome::Idle,
            Err(JudgeError::MalformedJob { submission_id, source }) => {
                tracing::error!(
                    submission_id = submission_id.as_deref().unwrap_or("-"),
                    error = %source,
                    "Skipping malformed queue entry"
                );
                // Close out the submission so it doesn't read PENDING forever
                if let Some(id) = submission_id {
                    self.reporter.report(StatusEvent::rejected(id)).await;
                }
                PollOutcome::Skipped
            }
            Err(e) => {
                tracing::error!(error = %e, retry_in_ms = self.retry_delay.as_millis() as u64, "Queue error");
                PollOutcome::QueueUnavailable
            }
        }
    }

    async fn handle(&self, job: Job) -> SubmissionStatus {
        tracing::info!(
            submission_id = %job.submission_id,
            language = %job.language,
            code_bytes = job.code.len(),
            "Received job"
        );

        self.reporter.report(StatusEvent::running(&job)).await;

        let event = match self.engine.execute(&job).await {
            Ok(result) => {
                tracing::info!(
                    submission_id = %job.submission_id,
                    status = ?result.status,
                    exit_code = result.exit_code,
                    execution_time_ms = result.execution_time_ms,
                    stdout_bytes = result.stdout.len(),
                    stderr_bytes = result.stderr.len(),
                    "Execution finished"
                );
                StatusEvent::finished(&job, &result)
            }
            Err(e) => {
                tracing::error!(
                    submission_id = %job.submission_id,
                    language = %job.language,
                    error = %e,
                    "Execution failed"
                );
                StatusEvent::internal_error(&job)
            }
        };

        let status = event.status;
        self.reporter.report(event).await;
        status
    }
}
