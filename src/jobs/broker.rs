//! Redis-backed job broker.
//!
//! Key shape, all under the configured queue name:
//!
//! - `jobs:{queue}:pending` - list of job ids, LPUSH on submit, BRPOP to claim
//! - `jobs:{queue}:retry`   - sorted set of job ids scored by next-run time
//! - `job:{id}`             - hash holding state, payload, counters, result
//!
//! Retry promotion runs as a Lua script so a crashed worker between ZREM and
//! LPUSH cannot lose a job. Completed and failed records expire after the
//! retention window; retention must stay at or above 24h so status polling
//! keeps working.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ScrapeError;
use crate::utils::constants::{JOB_MAX_RETRY, JOB_RETENTION, JOB_RETRY_BASE_DELAY};

use super::{CrawlJobPayload, JobRecord, JobState, DEFAULT_QUEUE};

/// Atomically move due retry entries back onto the pending list.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for i, id in ipairs(due) do
    redis.call('ZREM', KEYS[1], id)
    redis.call('LPUSH', KEYS[2], id)
    redis.call('HSET', 'job:' .. id, 'state', 'pending')
end
return #due
"#;

/// Submission options.
#[derive(Debug, Clone, Copy)]
pub struct EnqueueOptions {
    /// How long the job record stays retrievable after a terminal state.
    pub retention: Duration,
    pub max_retry: u32,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            retention: JOB_RETENTION,
            max_retry: JOB_MAX_RETRY,
        }
    }
}

/// Handle to the job store. Cheap to clone; all methods are concurrent-safe.
#[derive(Clone)]
pub struct JobBroker {
    conn: ConnectionManager,
    queue: String,
}

impl JobBroker {
    /// Connect to Redis and bind to the default queue.
    pub async fn connect(redis_url: &str) -> Result<Self, ScrapeError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ScrapeError::Config(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ScrapeError::Config(format!("redis connect: {e}")))?;
        Ok(Self {
            conn,
            queue: DEFAULT_QUEUE.to_string(),
        })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            queue: DEFAULT_QUEUE.to_string(),
        }
    }

    fn pending_key(&self) -> String {
        format!("jobs:{}:pending", self.queue)
    }

    fn retry_key(&self) -> String {
        format!("jobs:{}:retry", self.queue)
    }

    fn job_key(id: &str) -> String {
        format!("job:{id}")
    }

    /// Submit a job. Returns the broker-assigned id.
    pub async fn enqueue(
        &self,
        payload: &CrawlJobPayload,
        opts: EnqueueOptions,
    ) -> Result<String, ScrapeError> {
        let id = Uuid::new_v4().to_string();
        let payload_json = serde_json::to_string(payload)
            .map_err(|e| ScrapeError::ScrapeFailed(anyhow::anyhow!("encode payload: {e}")))?;

        let mut conn = self.conn.clone();
        let max_retry = opts.max_retry.to_string();
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                Self::job_key(&id),
                &[
                    ("queue", self.queue.as_str()),
                    ("state", JobState::Pending.as_str()),
                    ("payload", payload_json.as_str()),
                    ("retried", "0"),
                    ("max_retry", max_retry.as_str()),
                ],
            )
            // A pending job that sits longer than the retention window is
            // abandoned; expiring it bounds key growth.
            .expire(Self::job_key(&id), opts.retention.as_secs() as i64)
            .lpush(self.pending_key(), &id)
            .query_async(&mut conn)
            .await
            .map_err(|e| broker_err("enqueue", e))?;

        debug!(%id, url = %payload.url, "Job enqueued");
        Ok(id)
    }

    /// Look up a job by id. `Ok(None)` when the id is unknown or expired.
    pub async fn inspect(&self, id: &str) -> Result<Option<JobRecord>, ScrapeError> {
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> = conn
            .hgetall(Self::job_key(id))
            .await
            .map_err(|e| broker_err("inspect", e))?;

        if fields.is_empty() {
            return Ok(None);
        }

        let state = fields
            .get("state")
            .and_then(|s| JobState::parse(s))
            .ok_or_else(|| ScrapeError::ScrapeFailed(anyhow::anyhow!("job {id} has no state")))?;

        Ok(Some(JobRecord {
            id: id.to_string(),
            queue: fields
                .get("queue")
                .cloned()
                .unwrap_or_else(|| self.queue.clone()),
            state,
            max_retry: parse_counter(&fields, "max_retry"),
            retried: parse_counter(&fields, "retried"),
            payload: fields.get("payload").cloned().unwrap_or_default(),
            result: fields.get("result").cloned(),
            error: fields.get("error").cloned(),
        }))
    }

    /// Claim the next runnable job, blocking up to `wait`.
    ///
    /// Promotes due retry entries first, then pops the pending list. Returns
    /// `Ok(None)` when the queue stayed empty for the whole wait.
    pub async fn claim(
        &self,
        wait: Duration,
    ) -> Result<Option<(String, CrawlJobPayload)>, ScrapeError> {
        let mut conn = self.conn.clone();

        let promoted: i64 = redis::Script::new(PROMOTE_SCRIPT)
            .key(self.retry_key())
            .key(self.pending_key())
            .arg(unix_now())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| broker_err("promote", e))?;
        if promoted > 0 {
            debug!(promoted, "Promoted retry jobs");
        }

        let popped: Option<(String, String)> = conn
            .brpop(self.pending_key(), wait.as_secs_f64())
            .await
            .map_err(|e| broker_err("claim", e))?;

        let Some((_list, id)) = popped else {
            return Ok(None);
        };

        let fields: std::collections::HashMap<String, String> = conn
            .hgetall(Self::job_key(&id))
            .await
            .map_err(|e| broker_err("claim", e))?;
        let Some(payload_json) = fields.get("payload") else {
            // Record expired between push and pop; nothing to run.
            warn!(%id, "Claimed job has no record, skipping");
            return Ok(None);
        };

        let payload: CrawlJobPayload = serde_json::from_str(payload_json)
            .map_err(|e| ScrapeError::ScrapeFailed(anyhow::anyhow!("decode payload of {id}: {e}")))?;

        let _: () = conn
            .hset(Self::job_key(&id), "state", JobState::Active.as_str())
            .await
            .map_err(|e| broker_err("claim", e))?;

        Ok(Some((id, payload)))
    }

    /// Terminal success: store the result and start the retention clock.
    pub async fn complete(&self, id: &str, result_json: &str) -> Result<(), ScrapeError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset(Self::job_key(id), "state", JobState::Completed.as_str())
            .hset(Self::job_key(id), "result", result_json)
            .expire(Self::job_key(id), JOB_RETENTION.as_secs() as i64)
            .query_async(&mut conn)
            .await
            .map_err(|e| broker_err("complete", e))?;
        debug!(id, "Job completed");
        Ok(())
    }

    /// Record a failed attempt: schedule a backoff retry while budget
    /// remains, otherwise fail terminally. Returns the resulting state.
    pub async fn retry_or_fail(&self, id: &str, error: &str) -> Result<JobState, ScrapeError> {
        let mut conn = self.conn.clone();

        let fields: std::collections::HashMap<String, String> = conn
            .hgetall(Self::job_key(id))
            .await
            .map_err(|e| broker_err("retry", e))?;
        let retried = parse_counter(&fields, "retried");
        let max_retry = parse_counter(&fields, "max_retry");

        if retried >= max_retry {
            self.fail(id, error).await?;
            return Ok(JobState::Failed);
        }

        // Exponential backoff: 30s, 60s, 120s, ...
        let delay = JOB_RETRY_BASE_DELAY.as_secs().saturating_mul(1 << retried);
        let run_at = unix_now() + delay;

        let _: () = redis::pipe()
            .atomic()
            .hset(Self::job_key(id), "state", JobState::Retry.as_str())
            .hset(Self::job_key(id), "error", error)
            .hincr(Self::job_key(id), "retried", 1)
            .zadd(self.retry_key(), id, run_at)
            .query_async(&mut conn)
            .await
            .map_err(|e| broker_err("retry", e))?;

        debug!(id, retried = retried + 1, delay, "Job scheduled for retry");
        Ok(JobState::Retry)
    }

    /// Terminal failure.
    pub async fn fail(&self, id: &str, error: &str) -> Result<(), ScrapeError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset(Self::job_key(id), "state", JobState::Failed.as_str())
            .hset(Self::job_key(id), "error", error)
            .expire(Self::job_key(id), JOB_RETENTION.as_secs() as i64)
            .query_async(&mut conn)
            .await
            .map_err(|e| broker_err("fail", e))?;
        warn!(id, error, "Job failed terminally");
        Ok(())
    }
}

fn broker_err(op: &str, e: redis::RedisError) -> ScrapeError {
    ScrapeError::ScrapeFailed(anyhow::anyhow!("broker {op}: {e}"))
}

fn parse_counter(fields: &std::collections::HashMap<String, String>, name: &str) -> u32 {
    fields
        .get(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        let broker_keys = (
            format!("jobs:{DEFAULT_QUEUE}:pending"),
            format!("jobs:{DEFAULT_QUEUE}:retry"),
        );
        assert_eq!(broker_keys.0, "jobs:default:pending");
        assert_eq!(broker_keys.1, "jobs:default:retry");
        assert_eq!(JobBroker::job_key("abc-123"), "job:abc-123");
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = JOB_RETRY_BASE_DELAY.as_secs();
        assert_eq!(base.saturating_mul(1 << 0), 30);
        assert_eq!(base.saturating_mul(1 << 1), 60);
        assert_eq!(base.saturating_mul(1 << 2), 120);
    }

    #[test]
    fn default_options_meet_retention_floor() {
        let opts = EnqueueOptions::default();
        assert!(opts.retention >= Duration::from_secs(24 * 60 * 60));
        assert_eq!(opts.max_retry, 3);
    }
}
