use std::time::Duration;

/// Failure taxonomy shared by intake, queue, dispatch and engine
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    /// Rejected before any resource is provisioned
    #[error("language {0} not supported")]
    UnsupportedLanguage(String),

    /// Queue store unreachable or a job could not be serialized
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// A queue entry that cannot be decoded into a job. `submission_id` is
    /// set when the entry still carried a readable id.
    #[error("malformed job: {source}")]
    MalformedJob {
        submission_id: Option<String>,
        #[source]
        source: serde_json::Error,
    },

    /// Image pull, container create or start failed
    #[error("provisioning failed during {stage}: {message}")]
    Provisioning { stage: &'static str, message: String },

    /// The program did not finish within its wall-clock allowance
    #[error("execution exceeded {0:?}")]
    Timeout(Duration),

    /// Submission accepted but could not be queued; its record was rolled back
    #[error("submission could not be queued: {0}")]
    EnqueueFailed(String),
}

impl JudgeError {
    pub fn provisioning(stage: &'static str, err: impl std::fmt::Display) -> Self {
        JudgeError::Provisioning {
            stage,
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for JudgeError {
    fn from(err: redis::RedisError) -> Self {
        JudgeError::QueueUnavailable(err.to_string())
    }
}

pub type Result<T, E = JudgeError> = std::result::Result<T, E>;
