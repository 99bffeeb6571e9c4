pub mod types;
pub mod error;
pub mod queue;
pub mod redis;
pub mod status;
pub mod config;

// Re-export commonly used types for convenience
pub use types::{ExecutionResult, ExecutionStatus, Job, Language, StatusEvent, SubmissionStatus};
pub use error::JudgeError;
pub use queue::{JobQueue, MemoryQueue};
pub use config::{Config, ExecutionBackend};
pub use status::{MemoryStatusLog, StatusLog};
