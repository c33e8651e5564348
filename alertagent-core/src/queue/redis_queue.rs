//! Redis-backed implementation of [`super::TaskQueue`].
//!
//! Key namespacing:
//! `alertagent:queue:{queue_name}` is a sorted set scoring pending tasks by
//! `priority * 10^10 - scheduled_for_millis` (higher score = higher priority,
//! ties broken by earliest schedule time); `alertagent:processing:{queue_name}`
//! is a sorted set scoring in-flight tasks by lease-expiry epoch millis;
//! `alertagent:task:{id}` holds the serialized `Task`. `ZPOPMAX` gives atomic
//! pop-highest-score semantics, so two workers can never win the same task.

use super::{QueueStats, Task, TaskStatus};
use crate::error::{AlertAgentError, Result};
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const PRIORITY_SCALE: f64 = 1e10;

/// Default per-queue back-pressure threshold: `enqueue` is rejected once a
/// queue's pending count reaches this, so a stalled worker pool can't grow
/// the backlog without bound.
const DEFAULT_MAX_PENDING: u64 = 10_000;

fn queue_key(queue_name: &str) -> String {
    format!("alertagent:queue:{queue_name}")
}

fn processing_key(queue_name: &str) -> String {
    format!("alertagent:processing:{queue_name}")
}

fn deadletter_key(queue_name: &str) -> String {
    format!("alertagent:deadletter:{queue_name}")
}

fn task_key(task_id: &str) -> String {
    format!("alertagent:task:{task_id}")
}

fn score_for(priority: i64, scheduled_for_millis: i64) -> f64 {
    priority as f64 * PRIORITY_SCALE - scheduled_for_millis as f64
}

pub struct RedisTaskQueue {
    conn: ConnectionManager,
    round_robin_cursor: AtomicUsize,
    max_pending: u64,
}

impl RedisTaskQueue {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| AlertAgentError::Transport(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| AlertAgentError::Transport(e.to_string()))?;
        Ok(Self {
            conn,
            round_robin_cursor: AtomicUsize::new(0),
            max_pending: DEFAULT_MAX_PENDING,
        })
    }

    pub fn with_max_pending(mut self, max_pending: u64) -> Self {
        self.max_pending = max_pending;
        self
    }

    async fn store_task(&self, task: &Task) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(task)?;
        let _: () = conn.set(task_key(&task.id), json).await.map_err(redis_err)?;
        Ok(())
    }

    async fn load_task(&self, task_id: &str) -> Result<Task> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(task_key(task_id)).await.map_err(redis_err)?;
        let json = json.ok_or_else(|| AlertAgentError::NotFound {
            resource: "task",
            id: task_id.to_string(),
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Scan `processing_key(queue_name)` for leases past their expiry and
    /// re-admit them to the pending queue, resetting ownership so a crashed
    /// worker's task can be picked up again.
    async fn reclaim_expired(&self, queue_name: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis() as f64;
        let expired: Vec<String> = conn
            .zrangebyscore(processing_key(queue_name), 0, now)
            .await
            .map_err(redis_err)?;

        for task_id in expired {
            let _: () = conn.zrem(processing_key(queue_name), &task_id).await.map_err(redis_err)?;

            let Ok(mut task) = self.load_task(&task_id).await else {
                continue;
            };
            if task.status != TaskStatus::Processing {
                continue;
            }
            task.status = TaskStatus::Pending;
            task.worker_id = None;
            task.started_at = None;
            self.store_task(&task).await?;

            let score = score_for(task.priority, task.scheduled_for.timestamp_millis());
            let _: () = conn.zadd(queue_key(queue_name), &task_id, score).await.map_err(redis_err)?;
        }
        Ok(())
    }

    async fn admit(&self, queue_name: &str) -> Result<()> {
        let pending: u64 = {
            let mut conn = self.conn.clone();
            conn.zcard(queue_key(queue_name)).await.map_err(redis_err)?
        };
        if pending >= self.max_pending {
            return Err(AlertAgentError::Queue(format!(
                "queue '{queue_name}' pending backlog ({pending}) exceeds threshold ({})",
                self.max_pending
            )));
        }
        Ok(())
    }
}

fn redis_err(e: redis::RedisError) -> AlertAgentError {
    AlertAgentError::Transport(e.to_string())
}

#[async_trait::async_trait]
impl super::TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, mut task: Task) -> Result<Task> {
        self.admit(&task.queue).await?;

        task.status = TaskStatus::Pending;
        let score = score_for(task.priority, task.scheduled_for.timestamp_millis());

        self.store_task(&task).await?;
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(queue_key(&task.queue), &task.id, score).await.map_err(redis_err)?;
        Ok(task)
    }

    /// Pops fairly across `queue_names` by advancing a round-robin cursor
    /// before trying each name in turn, so no single queue can starve the
    /// others under sustained load.
    async fn dequeue(&self, queue_names: &[&str], worker_id: &str, lease: Duration) -> Result<Option<Task>> {
        if queue_names.is_empty() {
            return Ok(None);
        }
        let start = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % queue_names.len();

        let mut conn = self.conn.clone();
        for offset in 0..queue_names.len() {
            let queue_name = queue_names[(start + offset) % queue_names.len()];
            self.reclaim_expired(queue_name).await?;
            let popped: Vec<(String, f64)> = conn.zpopmax(queue_key(queue_name), 1).await.map_err(redis_err)?;
            let Some((task_id, _score)) = popped.into_iter().next() else {
                continue;
            };

            let mut task = self.load_task(&task_id).await?;
            task.status = TaskStatus::Processing;
            task.started_at = Some(Utc::now());
            task.worker_id = Some(worker_id.to_string());
            self.store_task(&task).await?;

            let lease_expiry = (Utc::now() + chrono::Duration::from_std(lease).unwrap_or_default()).timestamp_millis();
            let _: () = conn
                .zadd(processing_key(queue_name), &task_id, lease_expiry as f64)
                .await
                .map_err(redis_err)?;

            return Ok(Some(task));
        }

        Ok(None)
    }

    async fn ack(&self, task_id: &str) -> Result<()> {
        let mut task = self.load_task(task_id).await?;
        if task.status != TaskStatus::Processing {
            return Err(AlertAgentError::Conflict(format!(
                "task '{task_id}' cannot be acked from status {:?}",
                task.status
            )));
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        self.store_task(&task).await?;

        let mut conn = self.conn.clone();
        let _: () = conn.zrem(processing_key(&task.queue), task_id).await.map_err(redis_err)?;
        Ok(())
    }

    async fn nack(&self, task_id: &str, error: String, retryable: bool) -> Result<()> {
        let mut task = self.load_task(task_id).await?;
        if task.status != TaskStatus::Processing {
            return Err(AlertAgentError::Conflict(format!(
                "task '{task_id}' cannot be nacked from status {:?}",
                task.status
            )));
        }
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(processing_key(&task.queue), task_id).await.map_err(redis_err)?;

        if retryable && task.retry_count < task.max_retry {
            task.retry_count += 1;
            task.scheduled_for = Utc::now() + chrono::Duration::from_std(super::retry_backoff(task.retry_count)).unwrap_or_default();
            task.status = TaskStatus::Pending;
            task.error = Some(error);
            self.store_task(&task).await?;

            let score = score_for(task.priority, task.scheduled_for.timestamp_millis());
            let _: () = conn.zadd(queue_key(&task.queue), task_id, score).await.map_err(redis_err)?;
        } else {
            task.status = TaskStatus::Failed;
            task.error = Some(error);
            self.store_task(&task).await?;
            let _: () = conn.rpush(deadletter_key(&task.queue), task_id).await.map_err(redis_err)?;
        }

        Ok(())
    }

    async fn cancel(&self, task_id: &str) -> Result<()> {
        let mut task = self.load_task(task_id).await?;
        if task.status != TaskStatus::Pending {
            return Err(AlertAgentError::Conflict(format!(
                "task '{task_id}' cannot be cancelled from status {:?}",
                task.status
            )));
        }

        let mut conn = self.conn.clone();
        let _: () = conn.zrem(queue_key(&task.queue), task_id).await.map_err(redis_err)?;
        task.status = TaskStatus::Cancelled;
        self.store_task(&task).await?;
        Ok(())
    }

    async fn renew_lease(&self, task_id: &str, worker_id: &str, lease: Duration) -> Result<()> {
        let task = self.load_task(task_id).await?;
        if task.worker_id.as_deref() != Some(worker_id) {
            return Err(AlertAgentError::Conflict(format!(
                "task '{task_id}' is not leased by worker '{worker_id}'"
            )));
        }

        let lease_expiry = (Utc::now() + chrono::Duration::from_std(lease).unwrap_or_default()).timestamp_millis();
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(processing_key(&task.queue), task_id, lease_expiry as f64)
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Task> {
        self.load_task(task_id).await
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats> {
        let mut conn = self.conn.clone();
        let pending: u64 = conn.zcard(queue_key(queue_name)).await.map_err(redis_err)?;
        let processing: u64 = conn.zcard(processing_key(queue_name)).await.map_err(redis_err)?;
        let dead_letter: u64 = conn.llen(deadletter_key(queue_name)).await.map_err(redis_err)?;

        let pending_ids: Vec<String> = conn.zrange(queue_key(queue_name), 0, -1).await.map_err(redis_err)?;
        let mut oldest_pending_age_secs = None;
        for id in &pending_ids {
            if let Ok(task) = self.load_task(id).await {
                let age = (Utc::now() - task.enqueued_at).num_seconds();
                oldest_pending_age_secs = Some(oldest_pending_age_secs.map_or(age, |a: i64| a.max(age)));
            }
        }

        Ok(QueueStats {
            pending,
            processing,
            completed_recent: 0,
            failed_recent: 0,
            dead_letter,
            oldest_pending_age_secs,
        })
    }
}
