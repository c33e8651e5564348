//! Worker pool: `concurrency` supervised tasks, each looping
//! dequeue→dispatch→ack/nack against the registered handler for a task's
//! queue name.

use super::{Task, TaskHandler, TaskQueue};
use crate::error::{AlertAgentError, Result};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_LEASE: Duration = Duration::from_secs(300);
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct WorkerPool {
    queue: Arc<dyn TaskQueue>,
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
    concurrency: usize,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn TaskQueue>, concurrency: usize) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            concurrency: concurrency.max(1),
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn register_handler(&mut self, queue_name: &'static str, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(queue_name, handler);
    }

    pub fn start(self: &Arc<Self>) {
        let queue_names: Vec<&'static str> = self.handlers.keys().copied().collect();
        let mut tasks = self.tasks.lock().unwrap();
        for worker_index in 0..self.concurrency {
            let this = Arc::clone(self);
            let worker_id = format!("worker-{worker_index}");
            let queue_names = queue_names.clone();
            tasks.push(tokio::spawn(async move {
                this.run_loop(worker_id, queue_names).await;
            }));
        }
    }

    pub fn stop(&self) {
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    async fn run_loop(&self, worker_id: String, queue_names: Vec<&'static str>) {
        loop {
            match self.queue.dequeue(&queue_names, &worker_id, DEFAULT_LEASE).await {
                Ok(Some(task)) => self.dispatch(&worker_id, task).await,
                Ok(None) => tokio::time::sleep(IDLE_POLL_INTERVAL).await,
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "dequeue failed");
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn dispatch(&self, worker_id: &str, task: Task) {
        let Some(handler) = self.handlers.get(task.queue.as_str()).cloned() else {
            warn!(task_id = %task.id, queue = %task.queue, "no handler registered for queue");
            let _ = self
                .queue
                .nack(&task.id, format!("no handler registered for queue '{}'", task.queue), false)
                .await;
            return;
        };

        let outcome = futures::FutureExt::catch_unwind(AssertUnwindSafe(handler.handle(&task))).await;

        match outcome {
            Ok(Ok(())) => {
                if let Err(e) = self.queue.ack(&task.id).await {
                    error!(task_id = %task.id, error = %e, "ack failed");
                }
            }
            Ok(Err(e)) => {
                let retryable = e.is_retryable();
                info!(worker_id, task_id = %task.id, error = %e, retryable, "task failed");
                if let Err(e) = self.queue.nack(&task.id, e.to_string(), retryable).await {
                    error!(task_id = %task.id, error = %e, "nack failed");
                }
            }
            Err(panic) => {
                let message = panic_message(&panic);
                error!(task_id = %task.id, %message, "task handler panicked");
                let _ = self
                    .queue
                    .nack(&task.id, AlertAgentError::HandlerPanic(message).to_string(), false)
                    .await;
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{QUEUE_AI_ANALYSIS, QueueStats};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct InMemoryQueue {
        pending: AsyncMutex<Vec<Task>>,
        acked: AsyncMutex<Vec<String>>,
        nacked: AsyncMutex<Vec<(String, String, bool)>>,
    }

    #[async_trait]
    impl TaskQueue for InMemoryQueue {
        async fn enqueue(&self, task: Task) -> Result<Task> {
            self.pending.lock().await.push(task.clone());
            Ok(task)
        }
        async fn dequeue(&self, _queue_names: &[&str], _worker_id: &str, _lease: Duration) -> Result<Option<Task>> {
            Ok(self.pending.lock().await.pop())
        }
        async fn ack(&self, task_id: &str) -> Result<()> {
            self.acked.lock().await.push(task_id.to_string());
            Ok(())
        }
        async fn nack(&self, task_id: &str, error: String, retryable: bool) -> Result<()> {
            self.nacked.lock().await.push((task_id.to_string(), error, retryable));
            Ok(())
        }
        async fn cancel(&self, _task_id: &str) -> Result<()> {
            Ok(())
        }
        async fn renew_lease(&self, _task_id: &str, _worker_id: &str, _lease: Duration) -> Result<()> {
            Ok(())
        }
        async fn get(&self, _task_id: &str) -> Result<Task> {
            Err(AlertAgentError::NotFound { resource: "task", id: "x".to_string() })
        }
        async fn queue_stats(&self, _queue_name: &str) -> Result<QueueStats> {
            Ok(QueueStats::default())
        }
    }

    struct PanicHandler;
    #[async_trait]
    impl TaskHandler for PanicHandler {
        async fn handle(&self, _task: &Task) -> Result<()> {
            panic!("boom");
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);
    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn handle(&self, _task: &Task) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn panicking_handler_is_captured_and_surfaces_as_nack() {
        let queue = Arc::new(InMemoryQueue {
            pending: AsyncMutex::new(vec![]),
            acked: AsyncMutex::new(vec![]),
            nacked: AsyncMutex::new(vec![]),
        });
        let mut pool = WorkerPool::new(queue.clone(), 1);
        pool.register_handler(QUEUE_AI_ANALYSIS, Arc::new(PanicHandler));
        let pool = Arc::new(pool);

        let task = Task::new(QUEUE_AI_ANALYSIS, 1, serde_json::json!({}));
        pool.dispatch("worker-0", task.clone()).await;

        let nacked = queue.nacked.lock().await;
        assert_eq!(nacked.len(), 1);
        assert_eq!(nacked[0].0, task.id);
        assert!(!nacked[0].2, "panics are non-retryable");
    }

    #[tokio::test]
    async fn successful_handler_acks_the_task() {
        let queue = Arc::new(InMemoryQueue {
            pending: AsyncMutex::new(vec![]),
            acked: AsyncMutex::new(vec![]),
            nacked: AsyncMutex::new(vec![]),
        });
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(queue.clone(), 1);
        pool.register_handler(QUEUE_AI_ANALYSIS, Arc::new(CountingHandler(Arc::clone(&counter))));
        let pool = Arc::new(pool);

        let task = Task::new(QUEUE_AI_ANALYSIS, 1, serde_json::json!({}));
        pool.dispatch("worker-0", task.clone()).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(queue.acked.lock().await.as_slice(), [task.id]);
    }
}
