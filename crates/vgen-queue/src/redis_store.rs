//! Redis-backed job store.
//!
//! Layout under the configured prefix:
//! - `{prefix}:job:{id}`: hash with `data` (JSON record) and `version`
//! - `{prefix}:queued`: zset of claimable jobs scored by creation time
//! - `{prefix}:running`: zset of claimed jobs scored by last update
//! - `{prefix}:recent`: zset of all jobs scored by creation time
//!
//! Record writes are compare-and-set on `version`; the index sets are
//! maintained by the same Lua call so they always reflect the stored state.
//! Durability across a Redis restart requires AOF persistence on the server.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use vgen_models::{CancelEffect, JobId, JobRecord, JobState, JobUpdate, Recovery, StaleReason};

use crate::error::{QueueError, QueueResult};
use crate::store::{chrono_duration, JobStore, RecoveryReport, UpdateOutcome};

/// Attempts at a compare-and-set before reporting a conflict.
const CAS_RETRIES: usize = 8;

const POP_SCRIPT: &str = r#"
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
    return false
end
redis.call('ZADD', KEYS[2], ARGV[1], popped[1])
return popped[1]
"#;

const CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then
    return -1
end
if tonumber(current) ~= tonumber(ARGV[1]) then
    return 0
end
redis.call('HSET', KEYS[1], 'data', ARGV[2], 'version', tonumber(current) + 1)
if ARGV[3] == 'queued' then
    redis.call('ZADD', KEYS[2], ARGV[5], ARGV[4])
    redis.call('ZREM', KEYS[3], ARGV[4])
elseif ARGV[3] == 'running' then
    redis.call('ZADD', KEYS[3], ARGV[6], ARGV[4])
    redis.call('ZREM', KEYS[2], ARGV[4])
else
    redis.call('ZREM', KEYS[2], ARGV[4])
    redis.call('ZREM', KEYS[3], ARGV[4])
end
return 1
"#;

/// Result of a read-modify-write cycle.
enum Cas<T> {
    Applied(JobRecord, T),
    Rejected(StaleReason),
}

/// Job store backed by Redis.
pub struct RedisJobStore {
    client: redis::Client,
    prefix: String,
    pop_script: Script,
    cas_script: Script,
}

impl RedisJobStore {
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            pop_script: Script::new(POP_SCRIPT),
            cas_script: Script::new(CAS_SCRIPT),
        })
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn queued_key(&self) -> String {
        format!("{}:queued", self.prefix)
    }

    fn running_key(&self) -> String {
        format!("{}:running", self.prefix)
    }

    fn recent_key(&self) -> String {
        format!("{}:recent", self.prefix)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    async fn read(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &str,
    ) -> QueueResult<Option<(JobRecord, u64)>> {
        let (data, version): (Option<String>, Option<u64>) = redis::cmd("HMGET")
            .arg(self.job_key(id))
            .arg("data")
            .arg("version")
            .query_async(conn)
            .await?;

        match (data, version) {
            (Some(data), Some(version)) => Ok(Some((serde_json::from_str(&data)?, version))),
            _ => Ok(None),
        }
    }

    /// Read the record, let `f` mutate it, and write it back if nobody else
    /// wrote in between. Retries on version conflicts.
    async fn modify<T, F>(&self, id: &JobId, mut f: F) -> QueueResult<Cas<T>>
    where
        F: FnMut(&mut JobRecord) -> Result<T, StaleReason> + Send,
        T: Send,
    {
        let mut conn = self.connection().await?;

        for _ in 0..CAS_RETRIES {
            let Some((mut record, version)) = self.read(&mut conn, id.as_str()).await? else {
                return Ok(Cas::Rejected(StaleReason::Missing));
            };

            let value = match f(&mut record) {
                Ok(value) => value,
                Err(reason) => return Ok(Cas::Rejected(reason)),
            };

            let data = serde_json::to_string(&record)?;
            let written: i64 = self
                .cas_script
                .key(self.job_key(id.as_str()))
                .key(self.queued_key())
                .key(self.running_key())
                .arg(version)
                .arg(data)
                .arg(record.state.as_str())
                .arg(id.as_str())
                .arg(record.created_at.timestamp_millis())
                .arg(record.updated_at.timestamp_millis())
                .invoke_async(&mut conn)
                .await?;

            match written {
                1 => return Ok(Cas::Applied(record, value)),
                -1 => return Ok(Cas::Rejected(StaleReason::Missing)),
                _ => debug!(job_id = %id, "Version conflict, retrying"),
            }
        }

        warn!(job_id = %id, "Gave up after {} conflicting writes", CAS_RETRIES);
        Ok(Cas::Rejected(StaleReason::Conflict))
    }

    async fn pop_queued(&self) -> QueueResult<Option<String>> {
        let mut conn = self.connection().await?;
        let id: Option<String> = self
            .pop_script
            .key(self.queued_key())
            .key(self.running_key())
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(id)
    }

    async fn unindex_running(&self, id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.zrem::<_, _, ()>(self.running_key(), id).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: JobRecord) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let data = serde_json::to_string(&job)?;
        let score = job.created_at.timestamp_millis();

        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(self.job_key(job.id.as_str()))
            .arg("data")
            .arg(data)
            .arg("version")
            .arg(1)
            .ignore()
            .zadd(self.queued_key(), job.id.as_str(), score)
            .ignore()
            .zadd(self.recent_key(), job.id.as_str(), score)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %job.id, "Created job record");
        Ok(())
    }

    async fn claim_next(&self, owner: &str) -> QueueResult<Option<JobRecord>> {
        loop {
            let Some(id) = self.pop_queued().await? else {
                return Ok(None);
            };
            let job_id = JobId::from_string(id);

            match self
                .modify(&job_id, |record| record.claim(owner, Utc::now()))
                .await?
            {
                Cas::Applied(record, ()) => {
                    debug!(job_id = %job_id, owner, "Claimed job");
                    return Ok(Some(record));
                }
                Cas::Rejected(StaleReason::Missing) => {
                    self.unindex_running(job_id.as_str()).await?;
                }
                Cas::Rejected(reason) => {
                    debug!(job_id = %job_id, %reason, "Skipping unclaimable job");
                }
            }
        }
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> QueueResult<UpdateOutcome> {
        let outcome = self
            .modify(id, |record| record.apply(update.clone(), Utc::now()))
            .await?;
        Ok(match outcome {
            Cas::Applied(record, ()) => UpdateOutcome::Applied(record),
            Cas::Rejected(reason) => UpdateOutcome::Stale(reason),
        })
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.connection().await?;
        Ok(self.read(&mut conn, id.as_str()).await?.map(|(record, _)| record))
    }

    async fn list_recent(&self, limit: usize) -> QueueResult<Vec<JobRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn
            .zrevrange(self.recent_key(), 0, limit as isize - 1)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hget(self.job_key(id), "data");
        }
        let payloads: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

        let mut records = Vec::with_capacity(payloads.len());
        for payload in payloads.into_iter().flatten() {
            records.push(serde_json::from_str(&payload)?);
        }
        Ok(records)
    }

    async fn request_cancel(&self, id: &JobId) -> QueueResult<Option<CancelEffect>> {
        let outcome = self
            .modify(id, |record| match record.request_cancel(Utc::now()) {
                CancelEffect::AlreadyTerminal => Err(StaleReason::Terminal),
                effect => Ok(effect),
            })
            .await?;

        match outcome {
            Cas::Applied(_, effect) => Ok(Some(effect)),
            Cas::Rejected(StaleReason::Missing) => Ok(None),
            Cas::Rejected(StaleReason::Terminal) => Ok(Some(CancelEffect::AlreadyTerminal)),
            Cas::Rejected(reason) => Err(QueueError::store(reason.to_string())),
        }
    }

    async fn recover_stale(
        &self,
        liveness: Duration,
        max_requeues: u32,
    ) -> QueueResult<RecoveryReport> {
        let threshold = chrono_duration(liveness);
        let now = Utc::now();
        let cutoff = (now - threshold).timestamp_millis();

        let candidates: Vec<String> = {
            let mut conn = self.connection().await?;
            conn.zrangebyscore(self.running_key(), "-inf", cutoff).await?
        };

        let mut report = RecoveryReport::default();
        for id in candidates {
            let job_id = JobId::from_string(id);
            let outcome = self
                .modify(&job_id, |record| match record.state {
                    // Popped by a claimer that died before its write landed.
                    JobState::Queued => Ok(None),
                    JobState::Running if record.is_stale(threshold, now) => {
                        Ok(Some(record.recover(max_requeues, now)))
                    }
                    JobState::Running => Err(StaleReason::NotOwner),
                    _ => Err(StaleReason::Terminal),
                })
                .await?;

            match outcome {
                Cas::Applied(_, Some(Recovery::Requeued)) => report.requeued.push(job_id),
                Cas::Applied(_, Some(Recovery::Failed)) => report.failed.push(job_id),
                Cas::Applied(_, None) => {
                    info!(job_id = %job_id, "Restored orphaned queue entry");
                }
                Cas::Rejected(StaleReason::Missing | StaleReason::Terminal) => {
                    self.unindex_running(job_id.as_str()).await?;
                }
                Cas::Rejected(_) => {}
            }
        }

        Ok(report)
    }

    async fn evict_older_than(&self, age: Duration) -> QueueResult<usize> {
        let cutoff = Utc::now() - chrono_duration(age);
        let mut conn = self.connection().await?;
        // updated_at >= created_at, so the creation index bounds the scan.
        let candidates: Vec<String> = conn
            .zrangebyscore(self.recent_key(), "-inf", cutoff.timestamp_millis())
            .await?;

        let mut evicted = 0;
        for id in candidates {
            match self.read(&mut conn, &id).await? {
                Some((record, _))
                    if !record.state.is_terminal() || record.updated_at >= cutoff =>
                {
                    continue
                }
                Some(_) => {
                    redis::pipe()
                        .atomic()
                        .del(self.job_key(&id))
                        .ignore()
                        .zrem(self.recent_key(), &id)
                        .ignore()
                        .zrem(self.queued_key(), &id)
                        .ignore()
                        .zrem(self.running_key(), &id)
                        .ignore()
                        .query_async::<()>(&mut conn)
                        .await?;
                    evicted += 1;
                }
                None => {
                    conn.zrem::<_, _, ()>(self.recent_key(), &id).await?;
                }
            }
        }

        Ok(evicted)
    }

    async fn queue_depth(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.zcard(self.queued_key()).await?;
        Ok(depth)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
