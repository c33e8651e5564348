//! Health monitoring sub-module: threshold-driven status escalation over a
//! per-endpoint failure history, refreshed by a single supervised ticking
//! task rather than one task per cluster.

use crate::error::Result;
use crate::model::{Cluster, ClusterHealth, ClusterMetrics, ClusterStatus, EndpointHealth};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;

/// Callback invoked whenever a cluster's aggregate health status changes;
/// the `ClusterManager` wires this to the `LoadBalancer` so the two
/// sub-modules never hold references to each other directly.
pub type HealthObserver = Arc<dyn Fn(&str, ClusterStatus) + Send + Sync>;

pub struct HealthMonitor {
    http: reqwest::Client,
    monitored: RwLock<HashSet<String>>,
    cache: RwLock<HashMap<String, ClusterHealth>>,
    observer: RwLock<Option<HealthObserver>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            monitored: RwLock::new(HashSet::new()),
            cache: RwLock::new(HashMap::new()),
            observer: RwLock::new(None),
        }
    }

    pub fn set_observer(&self, observer: HealthObserver) {
        *self.observer.write().unwrap() = Some(observer);
    }

    pub fn enroll(&self, cluster_id: &str) {
        self.monitored.write().unwrap().insert(cluster_id.to_string());
    }

    pub fn remove(&self, cluster_id: &str) {
        self.monitored.write().unwrap().remove(cluster_id);
        self.cache.write().unwrap().remove(cluster_id);
    }

    /// Returns a copy, never a reference into the cache.
    pub fn get_cached(&self, cluster_id: &str) -> Option<ClusterHealth> {
        self.cache.read().unwrap().get(cluster_id).cloned()
    }

    pub fn all_cached(&self) -> HashMap<String, ClusterHealth> {
        self.cache.read().unwrap().clone()
    }

    /// Start a single scheduler that fires every `interval` and checks every
    /// monitored cluster in parallel. The cache is fully refreshed per round.
    pub fn start(
        self: &Arc<Self>,
        repository: Arc<dyn crate::cluster::ClusterRepository>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let monitored = this.monitored.read().unwrap().clone();
                let targets: Vec<Cluster> = repository
                    .list()
                    .await
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|c| monitored.contains(&c.id))
                    .collect();
                this.check_round(&targets).await;
            }
        })
    }

    async fn check_round(&self, clusters: &[Cluster]) {
        let checks = clusters.iter().map(|c| self.check_cluster(c));
        let results = join_all(checks).await;

        let mut cache = self.cache.write().unwrap();
        for (cluster, health) in clusters.iter().zip(results) {
            let status = health.status;
            cache.insert(cluster.id.clone(), health);
            if let Some(observer) = self.observer.read().unwrap().as_ref() {
                observer(&cluster.id, status);
            }
        }
    }

    /// Probe every endpoint of a single cluster and compute the aggregate
    /// status by escalating through the configured unhealthy threshold.
    pub async fn check_cluster(&self, cluster: &Cluster) -> ClusterHealth {
        let threshold = if cluster.config.health_check.unhealthy_threshold == 0 {
            DEFAULT_UNHEALTHY_THRESHOLD
        } else {
            cluster.config.health_check.unhealthy_threshold
        };

        let previous = self.get_cached(&cluster.id);
        let prev_endpoints: HashMap<&str, &EndpointHealth> = previous
            .as_ref()
            .map(|h| h.endpoints.iter().map(|e| (e.url.as_str(), e)).collect())
            .unwrap_or_default();

        let mut endpoints = Vec::with_capacity(cluster.endpoints.len());
        let mut probe_infra_failure = true;

        for url in &cluster.endpoints {
            let prev_failures = prev_endpoints.get(url.as_str()).map(|e| e.consecutive_failures).unwrap_or(0);
            let probe = self.probe_endpoint(url, &cluster.config.health_check).await;

            match probe {
                Ok(latency_ms) => {
                    probe_infra_failure = false;
                    endpoints.push(EndpointHealth {
                        url: url.clone(),
                        healthy: true,
                        last_probe_latency_ms: latency_ms,
                        consecutive_failures: 0,
                    });
                }
                Err(e) => {
                    debug!(cluster_id = %cluster.id, endpoint = %url, error = %e, "health probe failed");
                    let failures = prev_failures + 1;
                    endpoints.push(EndpointHealth {
                        url: url.clone(),
                        healthy: failures < threshold,
                        last_probe_latency_ms: 0,
                        consecutive_failures: failures,
                    });
                }
            }
        }

        let any_unhealthy = endpoints.iter().any(|e| e.consecutive_failures >= threshold);
        let ha_survives = cluster.config.ha.enabled
            && endpoints.iter().filter(|e| e.healthy).count() as u32
                >= cluster.config.ha.min_healthy_endpoints;

        let status = if endpoints.is_empty() || (probe_infra_failure && endpoints.iter().all(|e| e.consecutive_failures >= threshold)) {
            ClusterStatus::Unknown
        } else if any_unhealthy && !ha_survives {
            ClusterStatus::Error
        } else {
            ClusterStatus::Active
        };

        if status == ClusterStatus::Error {
            warn!(cluster_id = %cluster.id, "cluster marked unhealthy");
        }

        ClusterHealth {
            cluster_id: cluster.id.clone(),
            status,
            endpoints,
            metrics: ClusterMetrics::default(),
            last_check: Utc::now(),
            uptime_secs: previous.map(|h| h.uptime_secs).unwrap_or(0),
        }
    }

    async fn probe_endpoint(
        &self,
        base_url: &str,
        cfg: &crate::model::HealthCheckConfig,
    ) -> Result<u64> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), cfg.path);
        let start = std::time::Instant::now();
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(crate::error::AlertAgentError::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(start.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterConfig, ClusterType};
    use std::collections::{HashMap as Map, HashSet as Set};

    fn cluster_with_endpoint(url: &str) -> Cluster {
        Cluster {
            id: "c1".to_string(),
            name: "c1".to_string(),
            cluster_type: ClusterType::Prometheus,
            endpoints: vec![url.to_string()],
            config: ClusterConfig::default(),
            status: ClusterStatus::Active,
            tags: Set::new(),
            labels: Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_increments_failures_and_marks_error_after_threshold() {
        let monitor = HealthMonitor::new();
        let cluster = cluster_with_endpoint("http://127.0.0.1:1");

        let mut health = monitor.check_cluster(&cluster).await;
        monitor.cache.write().unwrap().insert(cluster.id.clone(), health.clone());
        for _ in 0..3 {
            health = monitor.check_cluster(&cluster).await;
            monitor.cache.write().unwrap().insert(cluster.id.clone(), health.clone());
        }

        assert_eq!(health.status, ClusterStatus::Error);
        assert!(health.endpoints[0].consecutive_failures >= 3);
    }
}
