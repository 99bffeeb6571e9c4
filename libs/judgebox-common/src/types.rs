use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::JudgeError;

/// Strongly-typed language tag
/// The supported set is closed: anything else is rejected before a job is
/// queued or a container is provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "node.js")]
    NodeJs,
    #[serde(rename = "python")]
    Python,
    #[serde(rename = "python2")]
    Python2,
    #[serde(rename = "ruby")]
    Ruby,
    #[serde(rename = "php")]
    Php,
    #[serde(rename = "perl")]
    Perl,
    #[serde(rename = "lua")]
    Lua,
}

impl Language {
    /// Returns all language variants
    /// This is the single source of truth for available languages
    pub fn all_variants() -> &'static [Language] {
        &[
            Language::NodeJs,
            Language::Python,
            Language::Python2,
            Language::Ruby,
            Language::Php,
            Language::Perl,
            Language::Lua,
        ]
    }

    /// Wire tag, identical to the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::NodeJs => "node.js",
            Language::Python => "python",
            Language::Python2 => "python2",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Perl => "perl",
            Language::Lua => "lua",
        }
    }
}

impl FromStr for Language {
    type Err = JudgeError;

    /// Tags are matched exactly; `"Python"` is not `"python"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::all_variants()
            .iter()
            .copied()
            .find(|lang| lang.as_str() == s)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(s.to_string()))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job (Immutable)
/// One queued code submission. The field names are the queue wire format
/// and must stay stable across independently deployed intake and workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub submission_id: String,
    pub code: String,
    pub language: Language,
}

impl Job {
    pub fn new(submission_id: impl Into<String>, code: impl Into<String>, language: Language) -> Self {
        Self {
            submission_id: submission_id.into(),
            code: code.into(),
            language,
        }
    }
}

/// Submission lifecycle as seen by submitters
/// PENDING → RUNNING → one terminal state. `NotFound` is only ever
/// synthesized for unknown ids, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Success,
    RuntimeError,
    TimeLimitExceeded,
    InternalError,
    NotFound,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Success
                | SubmissionStatus::RuntimeError
                | SubmissionStatus::TimeLimitExceeded
                | SubmissionStatus::InternalError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "PENDING",
            SubmissionStatus::Running => "RUNNING",
            SubmissionStatus::Success => "SUCCESS",
            SubmissionStatus::RuntimeError => "RUNTIME_ERROR",
            SubmissionStatus::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            SubmissionStatus::InternalError => "INTERNAL_ERROR",
            SubmissionStatus::NotFound => "NOT_FOUND",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one execution that actually ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    RuntimeError,
    TimeLimitExceeded,
}

impl ExecutionStatus {
    /// Exit code 0 is success, anything else is a runtime error.
    pub fn from_exit_code(code: i64) -> Self {
        if code == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::RuntimeError
        }
    }
}

impl From<ExecutionStatus> for SubmissionStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Success => SubmissionStatus::Success,
            ExecutionStatus::RuntimeError => SubmissionStatus::RuntimeError,
            ExecutionStatus::TimeLimitExceeded => SubmissionStatus::TimeLimitExceeded,
        }
    }
}

/// Execution Output
/// Produced once per executed job and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub status: ExecutionStatus,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    /// Result for a program that exited on its own
    pub fn exited(stdout: Vec<u8>, stderr: Vec<u8>, exit_code: i64, execution_time_ms: u64) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: i32::try_from(exit_code).unwrap_or(-1),
            status: ExecutionStatus::from_exit_code(exit_code),
            execution_time_ms,
        }
    }

    /// Result for a program killed at the deadline; no output is salvaged
    pub fn time_limit_exceeded(execution_time_ms: u64) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: -1,
            status: ExecutionStatus::TimeLimitExceeded,
            execution_time_ms,
        }
    }
}

/// Status change published by workers and applied by intake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub submission_id: String,
    pub status: SubmissionStatus,
    /// Absent when the queue entry named a language this worker doesn't know
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl StatusEvent {
    pub fn running(job: &Job) -> Self {
        Self {
            submission_id: job.submission_id.clone(),
            status: SubmissionStatus::Running,
            language: Some(job.language),
            exit_code: None,
            execution_time_ms: None,
        }
    }

    pub fn finished(job: &Job, result: &ExecutionResult) -> Self {
        Self {
            submission_id: job.submission_id.clone(),
            status: result.status.into(),
            language: Some(job.language),
            exit_code: Some(result.exit_code),
            execution_time_ms: Some(result.execution_time_ms),
        }
    }

    pub fn internal_error(job: &Job) -> Self {
        Self {
            submission_id: job.submission_id.clone(),
            status: SubmissionStatus::InternalError,
            language: Some(job.language),
            exit_code: None,
            execution_time_ms: None,
        }
    }

    /// Terminal event for a queue entry that could not be decoded into a job
    pub fn rejected(submission_id: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            status: SubmissionStatus::InternalError,
            language: None,
            exit_code: None,
            execution_time_ms: None,
        }
    }
}
