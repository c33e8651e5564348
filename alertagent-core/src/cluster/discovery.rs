//! Cluster discovery. `Static` is fully implemented; the network-backed
//! methods are typed seams that return `Validation` errors until a concrete
//! backend is wired in.

use crate::error::{AlertAgentError, Result};
use crate::model::{Cluster, ClusterType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DiscoveryMethod {
    Static { clusters: Vec<Cluster> },
    Kubernetes { namespace: String, label_selector: String },
    Consul { service_name: String, datacenter: Option<String> },
    Etcd { prefix: String, endpoints: Vec<String> },
    Dns { srv_record: String },
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    pub cluster_type: Option<ClusterType>,
    pub tag: Option<String>,
}

impl DiscoveryFilter {
    fn matches(&self, cluster: &Cluster) -> bool {
        self.cluster_type.map(|t| t == cluster.cluster_type).unwrap_or(true)
            && self
                .tag
                .as_ref()
                .map(|t| cluster.tags.contains(t))
                .unwrap_or(true)
    }
}

/// Invoked once per matched cluster when auto-discovery's `auto_register` is
/// set; the `ClusterManager` wires this to `register_cluster` so discovery
/// never has to know about registration itself.
pub type DiscoveryCallback = Arc<dyn Fn(Cluster) + Send + Sync>;

/// Parameters for [`DiscoveryManager::enable_auto_discovery`]: how often to
/// re-discover, what to filter for, and whether matches should be
/// auto-registered via the callback.
#[derive(Clone)]
pub struct AutoDiscoveryConfig {
    pub filter: DiscoveryFilter,
    pub interval: Duration,
    pub auto_register: bool,
}

pub struct DiscoveryManager {
    auto_discovery_enabled: RwLock<bool>,
    methods: RwLock<HashMap<String, DiscoveryMethod>>,
    callback: RwLock<Option<DiscoveryCallback>>,
    scheduler: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Default for DiscoveryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryManager {
    pub fn new() -> Self {
        Self {
            auto_discovery_enabled: RwLock::new(false),
            methods: RwLock::new(HashMap::new()),
            callback: RwLock::new(None),
            scheduler: std::sync::Mutex::new(None),
        }
    }

    pub fn set_callback(&self, callback: DiscoveryCallback) {
        *self.callback.write().unwrap() = Some(callback);
    }

    /// Start a scheduler that re-discovers every `cfg.interval` and, when
    /// `cfg.auto_register` is set, invokes the registered callback once per
    /// matched cluster. Safe to call again; a second call replaces the
    /// previous scheduler rather than running two in parallel.
    pub fn enable_auto_discovery(self: &Arc<Self>, cfg: AutoDiscoveryConfig) {
        *self.auto_discovery_enabled.write().unwrap() = true;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cfg.interval);
            loop {
                ticker.tick().await;
                match this.discover(&cfg.filter).await {
                    Ok(found) => {
                        if cfg.auto_register {
                            let callback = this.callback.read().unwrap().clone();
                            if let Some(callback) = callback {
                                for cluster in found {
                                    callback(cluster);
                                }
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "auto-discovery round failed"),
                }
            }
        });

        if let Some(previous) = self.scheduler.lock().unwrap().replace(handle) {
            previous.abort();
        }
    }

    pub fn disable_auto_discovery(&self) {
        *self.auto_discovery_enabled.write().unwrap() = false;
        if let Some(handle) = self.scheduler.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn is_auto_discovery_enabled(&self) -> bool {
        *self.auto_discovery_enabled.read().unwrap()
    }

    pub fn register_method(&self, name: impl Into<String>, method: DiscoveryMethod) {
        self.methods.write().unwrap().insert(name.into(), method);
    }

    pub fn unregister_method(&self, name: &str) {
        self.methods.write().unwrap().remove(name);
    }

    /// Run every registered method and return the union of discovered
    /// clusters matching `filter`. Non-static methods are not yet backed by a
    /// live client and surface as a `Validation` error rather than silently
    /// returning nothing.
    pub async fn discover(&self, filter: &DiscoveryFilter) -> Result<Vec<Cluster>> {
        let methods = self.methods.read().unwrap().clone();
        let mut found = Vec::new();

        for (name, method) in methods {
            match method {
                DiscoveryMethod::Static { clusters } => {
                    found.extend(clusters.into_iter().filter(|c| filter.matches(c)));
                }
                DiscoveryMethod::Kubernetes { .. }
                | DiscoveryMethod::Consul { .. }
                | DiscoveryMethod::Etcd { .. }
                | DiscoveryMethod::Dns { .. } => {
                    return Err(AlertAgentError::Validation(format!(
                        "discovery method '{name}' has no backend configured"
                    )));
                }
            }
        }

        Ok(found)
    }
}

impl Clone for DiscoveryMethod {
    fn clone(&self) -> Self {
        match self {
            DiscoveryMethod::Static { clusters } => DiscoveryMethod::Static { clusters: clusters.clone() },
            DiscoveryMethod::Kubernetes { namespace, label_selector } => DiscoveryMethod::Kubernetes {
                namespace: namespace.clone(),
                label_selector: label_selector.clone(),
            },
            DiscoveryMethod::Consul { service_name, datacenter } => DiscoveryMethod::Consul {
                service_name: service_name.clone(),
                datacenter: datacenter.clone(),
            },
            DiscoveryMethod::Etcd { prefix, endpoints } => DiscoveryMethod::Etcd {
                prefix: prefix.clone(),
                endpoints: endpoints.clone(),
            },
            DiscoveryMethod::Dns { srv_record } => DiscoveryMethod::Dns { srv_record: srv_record.clone() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterConfig, ClusterStatus};
    use chrono::Utc;
    use std::collections::{HashMap as Map, HashSet as Set};

    fn cluster(id: &str, tag: &str) -> Cluster {
        let mut tags = Set::new();
        tags.insert(tag.to_string());
        Cluster {
            id: id.to_string(),
            name: id.to_string(),
            cluster_type: ClusterType::Prometheus,
            endpoints: vec![format!("http://{id}")],
            config: ClusterConfig::default(),
            status: ClusterStatus::Active,
            tags,
            labels: Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn static_discovery_filters_by_tag() {
        let manager = DiscoveryManager::new();
        manager.register_method(
            "seed",
            DiscoveryMethod::Static {
                clusters: vec![cluster("a", "prod"), cluster("b", "staging")],
            },
        );

        let filter = DiscoveryFilter {
            cluster_type: None,
            tag: Some("prod".to_string()),
        };
        let found = manager.discover(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[tokio::test]
    async fn enable_auto_discovery_invokes_callback_for_matched_clusters() {
        let manager = Arc::new(DiscoveryManager::new());
        manager.register_method(
            "seed",
            DiscoveryMethod::Static {
                clusters: vec![cluster("a", "prod")],
            },
        );

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_for_cb = Arc::clone(&seen);
        manager.set_callback(Arc::new(move |cluster| {
            seen_for_cb.lock().unwrap().push(cluster.id);
        }));

        manager.enable_auto_discovery(AutoDiscoveryConfig {
            filter: DiscoveryFilter::default(),
            interval: Duration::from_millis(5),
            auto_register: true,
        });
        assert!(manager.is_auto_discovery_enabled());

        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.disable_auto_discovery();

        assert!(!seen.lock().unwrap().is_empty());
        assert!(!manager.is_auto_discovery_enabled());
    }

    #[tokio::test]
    async fn unbacked_method_surfaces_as_validation_error() {
        let manager = DiscoveryManager::new();
        manager.register_method(
            "k8s",
            DiscoveryMethod::Kubernetes {
                namespace: "monitoring".to_string(),
                label_selector: "app=alertmanager".to_string(),
            },
        );

        let err = manager.discover(&DiscoveryFilter::default()).await.unwrap_err();
        assert!(matches!(err, AlertAgentError::Validation(_)));
    }
}
