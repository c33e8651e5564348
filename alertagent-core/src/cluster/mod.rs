//! Cluster Manager. Composes persistence, health monitoring, load
//! balancing, and discovery behind one facade that owns their lifecycles as
//! a single supervised entry point.

pub mod discovery;
pub mod health;
pub mod load_balancer;
pub mod repository;

pub use discovery::{AutoDiscoveryConfig, DiscoveryCallback, DiscoveryFilter, DiscoveryManager, DiscoveryMethod};
pub use health::{HealthMonitor, HealthObserver};
pub use load_balancer::{LoadBalancer, Strategy};
pub use repository::{ClusterRepository, InMemoryClusterRepository};

use crate::error::{AlertAgentError, Result};
use crate::model::{Cluster, ClusterId, ClusterStatus, ClusterType};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

pub struct ClusterManager {
    repository: Arc<dyn ClusterRepository>,
    health: Arc<HealthMonitor>,
    load_balancer: Arc<LoadBalancer>,
    discovery: Arc<DiscoveryManager>,
    health_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ClusterManager {
    pub fn new(strategy: Strategy) -> Self {
        Self::with_repository(Arc::new(InMemoryClusterRepository::default()), strategy)
    }

    pub fn with_repository(repository: Arc<dyn ClusterRepository>, strategy: Strategy) -> Self {
        let load_balancer = Arc::new(LoadBalancer::new(strategy));
        let health = Arc::new(HealthMonitor::new());

        let lb_for_observer = Arc::clone(&load_balancer);
        health.set_observer(Arc::new(move |cluster_id, status| {
            if status != ClusterStatus::Active {
                lb_for_observer.record_outcome(cluster_id, 0.0, false);
            }
        }));

        Self {
            repository,
            health,
            load_balancer,
            discovery: Arc::new(DiscoveryManager::new()),
            health_task: std::sync::Mutex::new(None),
        }
    }

    /// Validate a cluster config against its per-type rules, plus the
    /// universal checks that apply regardless of type.
    pub fn validate_config(cluster_type: ClusterType, cluster: &Cluster) -> Result<()> {
        let cfg = &cluster.config;

        if cfg.connection.timeout_secs == 0 {
            return Err(AlertAgentError::Validation(
                "connection.timeout_secs must be greater than zero".to_string(),
            ));
        }

        match cluster_type {
            ClusterType::AlertManager => {
                if cfg.connection.max_connections == 0 {
                    return Err(AlertAgentError::Validation(
                        "AlertManager clusters require max_connections > 0".to_string(),
                    ));
                }
            }
            ClusterType::Prometheus | ClusterType::VmAlert => {
                if cfg.connection.timeout_secs < 1 {
                    return Err(AlertAgentError::Validation(
                        "Prometheus/VmAlert clusters require timeout_secs >= 1".to_string(),
                    ));
                }
            }
            ClusterType::Grafana => {
                if cfg.auth.token.as_ref().is_none_or(|t| t.is_empty()) {
                    return Err(AlertAgentError::Validation(
                        "Grafana clusters require a non-empty API token".to_string(),
                    ));
                }
            }
            ClusterType::Custom => {
                tracing::warn!(cluster_id = %cluster.id, "custom cluster type: skipping type-specific validation");
            }
        }

        if cluster.endpoints.is_empty() {
            return Err(AlertAgentError::Validation(
                "cluster must declare at least one endpoint".to_string(),
            ));
        }

        Ok(())
    }

    pub async fn register_cluster(&self, cluster: Cluster) -> Result<()> {
        Self::validate_config(cluster.cluster_type, &cluster)?;
        if self.repository.find_by_name(&cluster.name).await?.is_some() {
            return Err(AlertAgentError::DuplicateName(cluster.name.clone()));
        }
        self.repository.insert(cluster.clone()).await?;
        self.health.enroll(&cluster.id);
        self.load_balancer.track(&cluster.id);
        info!(cluster_id = %cluster.id, "cluster registered");
        Ok(())
    }

    pub async fn unregister_cluster(&self, id: &ClusterId) -> Result<()> {
        self.repository.delete(id).await?;
        self.health.remove(id);
        self.load_balancer.untrack(id);
        info!(cluster_id = %id, "cluster unregistered");
        Ok(())
    }

    pub async fn update_cluster(&self, cluster: Cluster) -> Result<()> {
        Self::validate_config(cluster.cluster_type, &cluster)?;
        self.repository.update(cluster).await
    }

    pub async fn get_cluster(&self, id: &ClusterId) -> Result<Cluster> {
        self.repository.get(id).await
    }

    pub async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        self.repository.list().await
    }

    pub fn health_snapshot(&self, id: &ClusterId) -> Option<crate::model::ClusterHealth> {
        self.health.get_cached(id)
    }

    /// Pick a healthy cluster of the given type via the configured strategy.
    /// Candidates are sorted by ID before reaching the load balancer so
    /// round-robin cycles a fixed order and tie-breaks are deterministic,
    /// independent of the repository's iteration order.
    pub async fn select_cluster(&self, cluster_type: ClusterType) -> Result<Cluster> {
        let all = self.repository.list().await?;
        let mut candidates: Vec<Cluster> = all.into_iter().filter(|c| c.cluster_type == cluster_type).collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        self.load_balancer
            .select(&candidates)
            .cloned()
            .ok_or(AlertAgentError::NoHealthyCluster)
    }

    pub async fn failover(&self, cluster_type: ClusterType, exclude: &ClusterId) -> Result<Cluster> {
        let all = self.repository.list().await?;
        let candidates: Vec<Cluster> = all.into_iter().filter(|c| c.cluster_type == cluster_type).collect();
        self.load_balancer
            .failover(&candidates, exclude)
            .cloned()
            .ok_or(AlertAgentError::NoHealthyCluster)
    }

    pub fn discovery(&self) -> &Arc<DiscoveryManager> {
        &self.discovery
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        &self.load_balancer
    }

    /// Start the background health-check scheduler. Safe to call once; a
    /// second call replaces the previous task.
    pub fn start_health_monitor(self: &Arc<Self>, interval: Duration) {
        let handle = self.health.start(Arc::clone(&self.repository), interval);
        *self.health_task.lock().unwrap() = Some(handle);
    }

    pub fn stop_health_monitor(&self) {
        if let Some(handle) = self.health_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterConfig, HealthCheckConfig};
    use chrono::Utc;
    use std::collections::{HashMap as Map, HashSet as Set};

    fn cluster(id: &str, cluster_type: ClusterType) -> Cluster {
        Cluster {
            id: id.to_string(),
            name: id.to_string(),
            cluster_type,
            endpoints: vec![format!("http://{id}")],
            config: ClusterConfig {
                health_check: HealthCheckConfig::default(),
                ..ClusterConfig::default()
            },
            status: ClusterStatus::Active,
            tags: Set::new(),
            labels: Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn register_then_select_round_trips() {
        let manager = ClusterManager::new(Strategy::RoundRobin);
        manager.register_cluster(cluster("a", ClusterType::Prometheus)).await.unwrap();

        let picked = manager.select_cluster(ClusterType::Prometheus).await.unwrap();
        assert_eq!(picked.id, "a");
    }

    #[tokio::test]
    async fn grafana_cluster_without_token_is_rejected() {
        let manager = ClusterManager::new(Strategy::RoundRobin);
        let c = cluster("g1", ClusterType::Grafana);
        let err = manager.register_cluster(c).await.unwrap_err();
        assert!(matches!(err, AlertAgentError::Validation(_)));
    }

    #[tokio::test]
    async fn selecting_with_no_registered_clusters_returns_no_healthy_cluster() {
        let manager = ClusterManager::new(Strategy::RoundRobin);
        let err = manager.select_cluster(ClusterType::Prometheus).await.unwrap_err();
        assert!(matches!(err, AlertAgentError::NoHealthyCluster));
    }

    #[tokio::test]
    async fn registering_a_duplicate_name_is_rejected() {
        let manager = ClusterManager::new(Strategy::RoundRobin);
        manager.register_cluster(cluster("a", ClusterType::Prometheus)).await.unwrap();

        let mut dup = cluster("b", ClusterType::Prometheus);
        dup.name = "a".to_string();
        let err = manager.register_cluster(dup).await.unwrap_err();
        assert!(matches!(err, AlertAgentError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn unregister_removes_cluster_from_selection() {
        let manager = ClusterManager::new(Strategy::RoundRobin);
        manager.register_cluster(cluster("a", ClusterType::Prometheus)).await.unwrap();
        manager.unregister_cluster(&"a".to_string()).await.unwrap();

        let err = manager.select_cluster(ClusterType::Prometheus).await.unwrap_err();
        assert!(matches!(err, AlertAgentError::NoHealthyCluster));
    }
}
