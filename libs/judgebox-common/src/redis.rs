use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{JudgeError, Result};
use crate::queue::{decode_job, encode_job, JobQueue};
use crate::status::StatusLog;
use crate::types::{Job, StatusEvent};

/// Redis naming - API and worker must never drift on these
pub const DEFAULT_QUEUE: &str = "judgebox:queue:submissions";
pub const DEFAULT_STATUS_CHANNEL: &str = "judgebox:events:status";
pub const STATUS_KEY_PREFIX: &str = "judgebox:status:";

/// Durable queue backed by a Redis list.
/// LPUSH at the tail, BRPOP at the head: FIFO, and each entry goes to
/// exactly one of the workers blocked on the list.
pub struct RedisQueue {
    conn: RwLock<Option<ConnectionManager>>,
    queue_name: String,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str, queue_name: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(conn, queue_name))
    }

    pub fn from_connection(conn: ConnectionManager, queue_name: impl Into<String>) -> Self {
        Self {
            conn: RwLock::new(Some(conn)),
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.conn
            .read()
            .await
            .clone()
            .ok_or_else(|| JudgeError::QueueUnavailable("queue closed".to_string()))
    }
}

/// BRPOP takes whole seconds on older servers and treats 0 as "forever".
fn blocking_secs(timeout: Duration) -> u64 {
    timeout.as_secs().max(1)
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: &Job) -> Result<()> {
        let raw = encode_job(job)?;
        let mut conn = self.connection().await?;
        redis::cmd("LPUSH")
            .arg(&self.queue_name)
            .arg(raw)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>> {
        let mut conn = self.connection().await?;
        // Raw bytes, so a non-UTF-8 entry surfaces as MalformedJob and not as a store error
        let popped: Option<(String, Vec<u8>)> = redis::cmd("BRPOP")
            .arg(&self.queue_name)
            .arg(blocking_secs(timeout))
            .query_async(&mut conn)
            .await?;

        match popped {
            Some((_, raw)) => decode_job(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn depth(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        let len: usize = redis::cmd("LLEN")
            .arg(&self.queue_name)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn close(&self) {
        self.conn.write().await.take();
    }
}

pub fn status_key(submission_id: &str) -> String {
    format!("{}{}", STATUS_KEY_PREFIX, submission_id)
}

/// Status log kept in one Redis string per submission.
/// Every write also goes out on the status channel for subscribers.
pub struct RedisStatusLog {
    conn: ConnectionManager,
    channel: String,
    ttl_secs: u64,
}

impl RedisStatusLog {
    pub fn new(conn: ConnectionManager, channel: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            conn,
            channel: channel.into(),
            // EX 0 is rejected by the server
            ttl_secs: ttl_secs.max(1),
        }
    }
}

#[async_trait]
impl StatusLog for RedisStatusLog {
    async fn record(&self, event: &StatusEvent) -> Result<()> {
        let payload =
            serde_json::to_string(event).map_err(|e| JudgeError::QueueUnavailable(e.to_string()))?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(status_key(&event.submission_id))
            .arg(&payload)
            .arg("EX")
            .arg(self.ttl_secs)
            .ignore()
            .cmd("PUBLISH")
            .arg(&self.channel)
            .arg(&payload)
            .ignore();

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn latest(&self, submission_id: &str) -> Result<Option<StatusEvent>> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = redis::cmd("GET")
            .arg(status_key(submission_id))
            .query_async(&mut conn)
            .await?;

        raw.map(|raw| serde_json::from_slice(&raw))
            .transpose()
            .map_err(|e| JudgeError::QueueUnavailable(format!("undecodable status record: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        assert!(DEFAULT_QUEUE.starts_with("judgebox:queue:"));
        assert!(DEFAULT_STATUS_CHANNEL.starts_with("judgebox:events:"));
        assert_ne!(DEFAULT_QUEUE, DEFAULT_STATUS_CHANNEL);
        assert_eq!(status_key("abc"), "judgebox:status:abc");
        assert!(!status_key("abc").starts_with(DEFAULT_QUEUE));
    }

    #[test]
    fn test_blocking_secs_never_zero() {
        assert_eq!(blocking_secs(Duration::from_millis(0)), 1);
        assert_eq!(blocking_secs(Duration::from_millis(300)), 1);
        assert_eq!(blocking_secs(Duration::from_secs(5)), 5);
    }

    /// Needs a Redis server at REDIS_URL (default localhost).
    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_round_trip() {
        use crate::types::Language;

        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let name = format!("judgebox:test:{}", uuid::Uuid::new_v4());
        let queue = RedisQueue::connect(&url, name).await.unwrap();

        let first = Job::new("a", "print(1)", Language::Python);
        let second = Job::new("b", "console.log(2)", Language::NodeJs);
        queue.enqueue(&first).await.unwrap();
        queue.enqueue(&second).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 2);

        assert_eq!(queue.dequeue(Duration::from_secs(1)).await.unwrap(), Some(first));
        assert_eq!(queue.dequeue(Duration::from_secs(1)).await.unwrap(), Some(second));
        assert_eq!(queue.dequeue(Duration::from_secs(1)).await.unwrap(), None);

        queue.close().await;
        queue.close().await;
        assert!(queue.enqueue(&Job::new("c", "", Language::Lua)).await.is_err());
    }

    /// Needs a Redis server at REDIS_URL (default localhost).
    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_status_log_survives_missing_subscriber() {
        use crate::types::{ExecutionResult, Language, SubmissionStatus};

        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let client = redis::Client::open(url.as_str()).unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();
        let log = RedisStatusLog::new(conn, format!("judgebox:test:{}", uuid::Uuid::new_v4()), 60);

        // Nobody is subscribed to the channel: the record must still be readable
        let job = Job::new(uuid::Uuid::new_v4().to_string(), "x", Language::Python);
        let result = ExecutionResult::exited(Vec::new(), Vec::new(), 0, 3);
        log.record(&StatusEvent::running(&job)).await.unwrap();
        log.record(&StatusEvent::finished(&job, &result)).await.unwrap();

        let latest = log.latest(&job.submission_id).await.unwrap().unwrap();
        assert_eq!(latest.status, SubmissionStatus::Success);
        assert_eq!(log.latest("never-reported").await.unwrap(), None);
    }
}
