//! Opaque cluster persistence boundary: the Cluster Manager exclusively owns
//! `Cluster`/`ClusterHealth`, but the concrete storage is a pluggable
//! collaborator behind this trait.

use crate::error::{AlertAgentError, Result};
use crate::model::{Cluster, ClusterId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait ClusterRepository: Send + Sync {
    async fn insert(&self, cluster: Cluster) -> Result<()>;
    async fn update(&self, cluster: Cluster) -> Result<()>;
    async fn delete(&self, id: &ClusterId) -> Result<()>;
    async fn get(&self, id: &ClusterId) -> Result<Cluster>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Cluster>>;
    async fn list(&self) -> Result<Vec<Cluster>>;
}

/// Default in-process implementation; the repository is the single source of
/// truth, so every read here returns an owned copy, never a reference into
/// the lock.
#[derive(Default)]
pub struct InMemoryClusterRepository {
    clusters: RwLock<HashMap<ClusterId, Cluster>>,
}

#[async_trait]
impl ClusterRepository for InMemoryClusterRepository {
    async fn insert(&self, cluster: Cluster) -> Result<()> {
        let mut clusters = self.clusters.write().unwrap();
        if clusters.contains_key(&cluster.id) {
            return Err(AlertAgentError::Conflict(format!(
                "cluster '{}' already exists",
                cluster.id
            )));
        }
        clusters.insert(cluster.id.clone(), cluster);
        Ok(())
    }

    async fn update(&self, cluster: Cluster) -> Result<()> {
        let mut clusters = self.clusters.write().unwrap();
        if !clusters.contains_key(&cluster.id) {
            return Err(AlertAgentError::NotFound {
                resource: "cluster",
                id: cluster.id,
            });
        }
        clusters.insert(cluster.id.clone(), cluster);
        Ok(())
    }

    async fn delete(&self, id: &ClusterId) -> Result<()> {
        let mut clusters = self.clusters.write().unwrap();
        clusters
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AlertAgentError::NotFound {
                resource: "cluster",
                id: id.clone(),
            })
    }

    async fn get(&self, id: &ClusterId) -> Result<Cluster> {
        self.clusters
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AlertAgentError::NotFound {
                resource: "cluster",
                id: id.clone(),
            })
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Cluster>> {
        Ok(self
            .clusters
            .read()
            .unwrap()
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Cluster>> {
        Ok(self.clusters.read().unwrap().values().cloned().collect())
    }
}
