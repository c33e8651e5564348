//! Task Queue & Worker Pool: a durable, priority-then-FIFO queue keyed by
//! queue name, plus a pool of workers dispatching to per-queue handlers.

pub mod handlers;
pub mod redis_queue;
pub mod worker;

pub use handlers::{
    AiAnalysisHandler, AlertRepository, ConfigSyncHandler, HttpModelClient, HttpNotifierAdapter, InMemoryAlertRepository,
    ModelClient, NotificationHandler, NotifierAdapter, TaskHandler,
};
pub use redis_queue::RedisTaskQueue;
pub use worker::WorkerPool;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub const QUEUE_AI_ANALYSIS: &str = "ai_analysis";
pub const QUEUE_NOTIFICATION: &str = "notification";
pub const QUEUE_CONFIG_SYNC: &str = "config_sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub queue: String,
    pub priority: i64,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retry: u32,
    pub error: Option<String>,
    pub worker_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(queue: impl Into<String>, priority: i64, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            queue: queue.into(),
            priority,
            payload,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retry: 3,
            error: None,
            worker_id: None,
            enqueued_at: now,
            scheduled_for: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }
}

/// Durable priority-queue contract. `Dequeue` must be atomic — no two workers
/// may ever receive the same task.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task) -> Result<Task>;
    async fn dequeue(&self, queue_names: &[&str], worker_id: &str, lease: Duration) -> Result<Option<Task>>;
    async fn ack(&self, task_id: &str) -> Result<()>;
    async fn nack(&self, task_id: &str, error: String, retryable: bool) -> Result<()>;
    async fn cancel(&self, task_id: &str) -> Result<()>;
    async fn renew_lease(&self, task_id: &str, worker_id: &str, lease: Duration) -> Result<()>;
    async fn get(&self, task_id: &str) -> Result<Task>;
    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed_recent: u64,
    pub failed_recent: u64,
    pub dead_letter: u64,
    pub oldest_pending_age_secs: Option<i64>,
}

/// Exponential back-off for task retries, reusing the sidecar's policy shape:
/// a `Nack` re-enqueues at `now + backoff(retry)`.
pub fn retry_backoff(retry_count: u32) -> Duration {
    let policy = crate::sidecar::BackoffPolicy::default();
    policy.delay_for(retry_count)
}

/// In-memory reference implementation of [`TaskQueue`], the default used by
/// tests and by any deployment not wired up to Redis. Ordering matches the
/// contract (priority first, FIFO within priority) but is O(N log N) per
/// dequeue rather than O(log N) — acceptable for the bounded queues tests and
/// small deployments exercise.
/// Default per-queue back-pressure threshold, matching the Redis
/// implementation's default.
const DEFAULT_MAX_PENDING: u64 = 10_000;

pub struct InMemoryTaskQueue {
    tasks: tokio::sync::Mutex<std::collections::HashMap<String, Task>>,
    max_pending: u64,
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self {
            tasks: tokio::sync::Mutex::new(std::collections::HashMap::new()),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl InMemoryTaskQueue {
    pub fn with_max_pending(mut self, max_pending: u64) -> Self {
        self.max_pending = max_pending;
        self
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, mut task: Task) -> Result<Task> {
        let mut tasks = self.tasks.lock().await;
        let pending = tasks.values().filter(|t| t.queue == task.queue && t.status == TaskStatus::Pending).count() as u64;
        if pending >= self.max_pending {
            return Err(crate::error::AlertAgentError::Queue(format!(
                "queue '{}' pending backlog ({pending}) exceeds threshold ({})",
                task.queue, self.max_pending
            )));
        }

        task.status = TaskStatus::Pending;
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn dequeue(&self, queue_names: &[&str], worker_id: &str, _lease: Duration) -> Result<Option<Task>> {
        let mut tasks = self.tasks.lock().await;
        let now = Utc::now();
        let candidate_id = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending && queue_names.contains(&t.queue.as_str()) && t.scheduled_for <= now
            })
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.enqueued_at.cmp(&a.enqueued_at))
            })
            .map(|t| t.id.clone());

        let Some(id) = candidate_id else { return Ok(None) };
        let task = tasks.get_mut(&id).unwrap();
        task.status = TaskStatus::Processing;
        task.started_at = Some(now);
        task.worker_id = Some(worker_id.to_string());
        Ok(Some(task.clone()))
    }

    async fn ack(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| crate::error::AlertAgentError::NotFound { resource: "task", id: task_id.to_string() })?;
        if task.status != TaskStatus::Processing {
            return Err(crate::error::AlertAgentError::Conflict(format!(
                "task '{task_id}' cannot be acked from status {:?}",
                task.status
            )));
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn nack(&self, task_id: &str, error: String, retryable: bool) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| crate::error::AlertAgentError::NotFound { resource: "task", id: task_id.to_string() })?;
        if task.status != TaskStatus::Processing {
            return Err(crate::error::AlertAgentError::Conflict(format!(
                "task '{task_id}' cannot be nacked from status {:?}",
                task.status
            )));
        }

        if retryable && task.retry_count < task.max_retry {
            task.retry_count += 1;
            task.scheduled_for = Utc::now() + chrono::Duration::from_std(retry_backoff(task.retry_count)).unwrap_or_default();
            task.status = TaskStatus::Pending;
            task.error = Some(error);
        } else {
            task.status = TaskStatus::Failed;
            task.error = Some(error);
        }
        Ok(())
    }

    async fn cancel(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| crate::error::AlertAgentError::NotFound { resource: "task", id: task_id.to_string() })?;
        if task.status != TaskStatus::Pending {
            return Err(crate::error::AlertAgentError::Conflict(format!(
                "task '{task_id}' cannot be cancelled from status {:?}",
                task.status
            )));
        }
        task.status = TaskStatus::Cancelled;
        Ok(())
    }

    async fn renew_lease(&self, task_id: &str, _worker_id: &str, _lease: Duration) -> Result<()> {
        let tasks = self.tasks.lock().await;
        if tasks.contains_key(task_id) {
            Ok(())
        } else {
            Err(crate::error::AlertAgentError::NotFound { resource: "task", id: task_id.to_string() })
        }
    }

    async fn get(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .lock()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| crate::error::AlertAgentError::NotFound { resource: "task", id: task_id.to_string() })
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats> {
        let tasks = self.tasks.lock().await;
        let in_queue: Vec<&Task> = tasks.values().filter(|t| t.queue == queue_name).collect();
        let pending = in_queue.iter().filter(|t| t.status == TaskStatus::Pending).count() as u64;
        let processing = in_queue.iter().filter(|t| t.status == TaskStatus::Processing).count() as u64;
        let dead_letter = in_queue.iter().filter(|t| t.status == TaskStatus::Failed).count() as u64;
        let oldest_pending_age_secs = in_queue
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| (Utc::now() - t.enqueued_at).num_seconds())
            .max();

        Ok(QueueStats {
            pending,
            processing,
            completed_recent: in_queue.iter().filter(|t| t.status == TaskStatus::Completed).count() as u64,
            failed_recent: dead_letter,
            dead_letter,
            oldest_pending_age_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_pending_with_zero_retries() {
        let task = Task::new(QUEUE_AI_ANALYSIS, 5, serde_json::json!({"alert_id": "a1"}));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.max_retry, 3);
    }

    #[tokio::test]
    async fn enqueue_is_rejected_once_pending_backlog_hits_the_threshold() {
        let queue = InMemoryTaskQueue::default().with_max_pending(1);
        queue.enqueue(Task::new(QUEUE_AI_ANALYSIS, 1, serde_json::json!({}))).await.unwrap();

        let err = queue.enqueue(Task::new(QUEUE_AI_ANALYSIS, 1, serde_json::json!({}))).await.unwrap_err();
        assert!(matches!(err, crate::error::AlertAgentError::Queue(_)));
    }

    #[tokio::test]
    async fn in_memory_queue_dequeues_higher_priority_first() {
        let queue = InMemoryTaskQueue::default();
        let low = queue.enqueue(Task::new(QUEUE_AI_ANALYSIS, 1, serde_json::json!({}))).await.unwrap();
        let high = queue.enqueue(Task::new(QUEUE_AI_ANALYSIS, 9, serde_json::json!({}))).await.unwrap();

        let first = queue.dequeue(&[QUEUE_AI_ANALYSIS], "w1", Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(first.id, high.id);

        let second = queue.dequeue(&[QUEUE_AI_ANALYSIS], "w1", Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(second.id, low.id);
    }

    #[tokio::test]
    async fn nack_with_retryable_reschedules_and_exhausts_after_max_retry() {
        let queue = InMemoryTaskQueue::default();
        let task = queue
            .enqueue(Task::new(QUEUE_AI_ANALYSIS, 1, serde_json::json!({})).with_max_retry(1))
            .await
            .unwrap();
        queue.dequeue(&[QUEUE_AI_ANALYSIS], "w1", Duration::from_secs(60)).await.unwrap();

        queue.nack(&task.id, "timeout".to_string(), true).await.unwrap();
        let after_first = queue.get(&task.id).await.unwrap();
        assert_eq!(after_first.status, TaskStatus::Pending);
        assert_eq!(after_first.retry_count, 1);

        queue.dequeue(&[QUEUE_AI_ANALYSIS], "w1", Duration::from_secs(60)).await.unwrap();
        queue.nack(&task.id, "timeout again".to_string(), true).await.unwrap();
        let after_second = queue.get(&task.id).await.unwrap();
        assert_eq!(after_second.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_only_allowed_from_pending() {
        let queue = InMemoryTaskQueue::default();
        let task = queue.enqueue(Task::new(QUEUE_AI_ANALYSIS, 1, serde_json::json!({}))).await.unwrap();
        queue.dequeue(&[QUEUE_AI_ANALYSIS], "w1", Duration::from_secs(60)).await.unwrap();

        let err = queue.cancel(&task.id).await.unwrap_err();
        assert!(matches!(err, crate::error::AlertAgentError::Conflict(_)));
    }

    #[tokio::test]
    async fn ack_is_rejected_once_a_task_is_already_terminal() {
        let queue = InMemoryTaskQueue::default();
        let task = queue.enqueue(Task::new(QUEUE_AI_ANALYSIS, 1, serde_json::json!({}))).await.unwrap();
        queue.dequeue(&[QUEUE_AI_ANALYSIS], "w1", Duration::from_secs(60)).await.unwrap();
        queue.ack(&task.id).await.unwrap();

        let err = queue.ack(&task.id).await.unwrap_err();
        assert!(matches!(err, crate::error::AlertAgentError::Conflict(_)));
        let err = queue.nack(&task.id, "late".to_string(), true).await.unwrap_err();
        assert!(matches!(err, crate::error::AlertAgentError::Conflict(_)));
    }
}
