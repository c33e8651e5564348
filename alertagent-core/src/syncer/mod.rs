//! Central Syncer: the control-plane half of configuration distribution.
//! Scans registered targets on a tick, fans out the due ones concurrently,
//! and aggregates per-target errors.

use crate::error::{AlertAgentError, Result};
use crate::model::{ClusterId, ConfigType, SyncStatus};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub fn config_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

/// Resolves the authoritative config bytes for a cluster; implemented by the
/// template engine or an upstream source.
#[async_trait::async_trait]
pub trait ConfigSource: Send + Sync {
    async fn resolve(&self, cluster_id: &ClusterId, config_type: ConfigType) -> Result<Vec<u8>>;
}

/// Delivers a resolved config to a cluster's back-end (HTTP PUT to the reload
/// endpoint or equivalent).
#[async_trait::async_trait]
pub trait ConfigDeliverer: Send + Sync {
    async fn deliver(&self, cluster_id: &ClusterId, config_type: ConfigType, bytes: &[u8]) -> Result<()>;
}

/// One registered (cluster, config_type) sync target. The `Mutex` both
/// stores the status and serializes state transitions for that cluster,
/// held across the whole sync attempt so a second tick for the same target
/// can never interleave with an in-flight one.
struct TargetEntry {
    status: Mutex<SyncStatus>,
}

pub struct Syncer {
    targets: std::sync::RwLock<HashMap<(ClusterId, ConfigType), Arc<TargetEntry>>>,
    source: Arc<dyn ConfigSource>,
    deliverer: Arc<dyn ConfigDeliverer>,
    sync_interval: Duration,
}

pub struct BatchSyncResult {
    pub succeeded: Vec<ClusterId>,
    pub failed: Vec<(ClusterId, String)>,
}

impl BatchSyncResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Syncer {
    pub fn new(source: Arc<dyn ConfigSource>, deliverer: Arc<dyn ConfigDeliverer>, sync_interval: Duration) -> Self {
        Self {
            targets: std::sync::RwLock::new(HashMap::new()),
            source,
            deliverer,
            sync_interval,
        }
    }

    pub fn register(&self, cluster_id: ClusterId, config_type: ConfigType) {
        let key = (cluster_id.clone(), config_type);
        self.targets.write().unwrap().entry(key).or_insert_with(|| {
            Arc::new(TargetEntry {
                status: Mutex::new(SyncStatus::pending(cluster_id, config_type)),
            })
        });
    }

    pub fn unregister(&self, cluster_id: &ClusterId, config_type: ConfigType) {
        self.targets.write().unwrap().remove(&(cluster_id.clone(), config_type));
    }

    pub async fn status(&self, cluster_id: &ClusterId, config_type: ConfigType) -> Option<SyncStatus> {
        let entry = self.targets.read().unwrap().get(&(cluster_id.clone(), config_type)).cloned();
        match entry {
            Some(e) => Some(e.status.lock().await.clone()),
            None => None,
        }
    }

    pub async fn all_statuses(&self) -> Vec<SyncStatus> {
        let entries: Vec<Arc<TargetEntry>> = self.targets.read().unwrap().values().cloned().collect();
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push(entry.status.lock().await.clone());
        }
        out
    }

    async fn due_targets(&self) -> Vec<(ClusterId, ConfigType)> {
        let now = chrono::Utc::now();
        let entries: Vec<((ClusterId, ConfigType), Arc<TargetEntry>)> = self
            .targets
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let mut due = Vec::new();
        for (key, entry) in entries {
            let status = entry.status.lock().await;
            if status.next_sync < now && status.phase != crate::model::SyncPhase::InProgress {
                due.push(key);
            }
        }
        due
    }

    /// One sync attempt for a single (cluster, config_type) pair. Holding the
    /// per-target `Mutex` guard for the whole attempt is what serializes
    /// concurrent attempts against the same target.
    async fn sync_one(&self, cluster_id: &ClusterId, config_type: ConfigType) -> Result<String> {
        let entry = {
            let targets = self.targets.read().unwrap();
            targets
                .get(&(cluster_id.clone(), config_type))
                .cloned()
                .ok_or_else(|| AlertAgentError::NotFound {
                    resource: "sync target",
                    id: cluster_id.clone(),
                })?
        };

        let mut status = entry.status.lock().await;
        status.phase = crate::model::SyncPhase::InProgress;

        let bytes = match self.source.resolve(cluster_id, config_type).await {
            Ok(b) => b,
            Err(e) => {
                status.mark_failed(e.to_string(), self.sync_interval);
                return Err(e);
            }
        };

        if let Err(e) = self.deliverer.deliver(cluster_id, config_type, &bytes).await {
            status.mark_failed(e.to_string(), self.sync_interval);
            return Err(e);
        }

        let hash = config_hash(&bytes);
        status.mark_success(hash.clone(), self.sync_interval);
        info!(cluster_id = %cluster_id, ?config_type, %hash, "cluster config synced");
        Ok(hash)
    }

    /// Fan out and aggregate errors; fails overall if >= 1 sub-sync fails.
    pub async fn batch_sync(&self, targets: &[(ClusterId, ConfigType)]) -> BatchSyncResult {
        let results = futures::future::join_all(
            targets.iter().map(|(id, ct)| async move { (id.clone(), self.sync_one(id, *ct).await) }),
        )
        .await;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(_) => succeeded.push(id),
                Err(e) => failed.push((id, e.to_string())),
            }
        }
        BatchSyncResult { succeeded, failed }
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.sync_interval);
            loop {
                ticker.tick().await;
                let due = this.due_targets().await;
                if due.is_empty() {
                    continue;
                }
                let result = this.batch_sync(&due).await;
                if !result.is_success() {
                    for (id, err) in &result.failed {
                        warn!(cluster_id = %id, error = %err, "cluster sync failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource(Vec<u8>);
    #[async_trait::async_trait]
    impl ConfigSource for FixedSource {
        async fn resolve(&self, _cluster_id: &ClusterId, _config_type: ConfigType) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct CountingDeliverer(Arc<AtomicUsize>);
    #[async_trait::async_trait]
    impl ConfigDeliverer for CountingDeliverer {
        async fn deliver(&self, _cluster_id: &ClusterId, _config_type: ConfigType, _bytes: &[u8]) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingDeliverer;
    #[async_trait::async_trait]
    impl ConfigDeliverer for FailingDeliverer {
        async fn deliver(&self, _cluster_id: &ClusterId, _config_type: ConfigType, _bytes: &[u8]) -> Result<()> {
            Err(AlertAgentError::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn successful_sync_records_hash_and_marks_success() {
        let count = Arc::new(AtomicUsize::new(0));
        let syncer = Syncer::new(
            Arc::new(FixedSource(b"groups: []".to_vec())),
            Arc::new(CountingDeliverer(Arc::clone(&count))),
            Duration::from_secs(30),
        );
        syncer.register("c1".to_string(), ConfigType::Prometheus);

        let hash = syncer.sync_one(&"c1".to_string(), ConfigType::Prometheus).await.unwrap();
        assert_eq!(hash, config_hash(b"groups: []"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let status = syncer.status(&"c1".to_string(), ConfigType::Prometheus).await.unwrap();
        assert_eq!(status.phase, crate::model::SyncPhase::Success);
        assert_eq!(status.config_hash.as_deref(), Some(hash.as_str()));
    }

    #[tokio::test]
    async fn successful_sync_advances_next_sync_past_the_interval() {
        let syncer = Syncer::new(
            Arc::new(FixedSource(b"groups: []".to_vec())),
            Arc::new(CountingDeliverer(Arc::new(AtomicUsize::new(0)))),
            Duration::from_secs(30),
        );
        syncer.register("c1".to_string(), ConfigType::Prometheus);

        let before = syncer.status(&"c1".to_string(), ConfigType::Prometheus).await.unwrap().next_sync;
        syncer.sync_one(&"c1".to_string(), ConfigType::Prometheus).await.unwrap();
        let after = syncer.status(&"c1".to_string(), ConfigType::Prometheus).await.unwrap().next_sync;

        assert!(after >= before + chrono::Duration::seconds(29));
    }

    #[tokio::test]
    async fn batch_sync_aggregates_errors_without_failing_the_whole_batch() {
        let syncer = Syncer::new(
            Arc::new(FixedSource(b"groups: []".to_vec())),
            Arc::new(FailingDeliverer),
            Duration::from_secs(30),
        );
        syncer.register("c1".to_string(), ConfigType::Prometheus);
        syncer.register("c2".to_string(), ConfigType::Alertmanager);

        let result = syncer
            .batch_sync(&[
                ("c1".to_string(), ConfigType::Prometheus),
                ("c2".to_string(), ConfigType::Alertmanager),
            ])
            .await;

        assert!(!result.is_success());
        assert_eq!(result.failed.len(), 2);
    }
}
