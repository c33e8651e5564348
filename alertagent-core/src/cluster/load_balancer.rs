//! Load balancing sub-module. Selection is driven by a monotonic
//! per-cluster-set counter rather than wall-clock time, so round-robin and
//! weighted selection are deterministic and independent of call timing.

use crate::model::{Cluster, ClusterLoad};
use rand::Rng;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    Weighted,
    LeastConnections,
    Random,
    HealthyOnly,
}

/// Tracks per-cluster load and a monotonic selection counter; the counter
/// advances once per `select` call regardless of strategy so round robin
/// never depends on wall-clock time.
pub struct LoadBalancer {
    strategy: Strategy,
    loads: RwLock<HashMap<String, ClusterLoad>>,
    counter: AtomicU64,
}

impl LoadBalancer {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            loads: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn track(&self, cluster_id: &str) {
        self.loads
            .write()
            .unwrap()
            .entry(cluster_id.to_string())
            .or_insert_with(|| ClusterLoad::new(cluster_id.to_string()));
    }

    pub fn untrack(&self, cluster_id: &str) {
        self.loads.write().unwrap().remove(cluster_id);
    }

    pub fn record_outcome(&self, cluster_id: &str, latency_ms: f64, success: bool) {
        if let Some(load) = self.loads.write().unwrap().get_mut(cluster_id) {
            load.record_outcome(latency_ms, success);
        }
    }

    pub fn load_snapshot(&self, cluster_id: &str) -> Option<ClusterLoad> {
        self.loads.read().unwrap().get(cluster_id).cloned()
    }

    /// Select one cluster from `candidates` per the configured strategy.
    /// Clusters whose tracked `health_score` has dropped to or below 0.5 are
    /// excluded from every strategy, not only `HealthyOnly` — an unhealthy
    /// cluster is never handed out except via explicit failover.
    pub fn select<'a>(&self, candidates: &'a [Cluster]) -> Option<&'a Cluster> {
        let loads = self.loads.read().unwrap();
        let eligible: Vec<&Cluster> = candidates
            .iter()
            .filter(|c| loads.get(&c.id).map(|l| l.is_healthy()).unwrap_or(true))
            .collect();

        if eligible.is_empty() {
            return None;
        }

        let tick = self.counter.fetch_add(1, Ordering::Relaxed);

        let chosen = match self.strategy {
            Strategy::RoundRobin => eligible[(tick as usize) % eligible.len()],
            Strategy::HealthyOnly => *eligible
                .iter()
                .max_by(|a, b| {
                    let (sa, ra) = loads
                        .get(&a.id)
                        .map(|l| (l.health_score, l.avg_response_time_ms))
                        .unwrap_or((1.0, 0.0));
                    let (sb, rb) = loads
                        .get(&b.id)
                        .map(|l| (l.health_score, l.avg_response_time_ms))
                        .unwrap_or((1.0, 0.0));
                    sa.partial_cmp(&sb)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal))
                })
                .unwrap(),
            Strategy::Random => {
                let idx = rand::thread_rng().gen_range(0..eligible.len());
                eligible[idx]
            }
            Strategy::LeastConnections => *eligible
                .iter()
                .min_by_key(|c| loads.get(&c.id).map(|l| l.connections).unwrap_or(0))
                .unwrap(),
            Strategy::Weighted => {
                let total_weight: f64 = eligible
                    .iter()
                    .map(|c| loads.get(&c.id).map(|l| l.weight).unwrap_or(1.0))
                    .sum();
                let mut target = (tick as f64 % 1000.0) / 1000.0 * total_weight;
                let mut pick = eligible[0];
                for c in &eligible {
                    let w = loads.get(&c.id).map(|l| l.weight).unwrap_or(1.0);
                    if target < w {
                        pick = c;
                        break;
                    }
                    target -= w;
                }
                pick
            }
        };

        Some(chosen)
    }

    /// Failover: pick the healthiest remaining candidate after excluding a
    /// known-bad cluster, ignoring the configured strategy entirely.
    pub fn failover<'a>(&self, candidates: &'a [Cluster], exclude: &str) -> Option<&'a Cluster> {
        let loads = self.loads.read().unwrap();
        candidates
            .iter()
            .filter(|c| c.id != exclude)
            .max_by(|a, b| {
                let sa = loads.get(&a.id).map(|l| l.health_score).unwrap_or(0.0);
                let sb = loads.get(&b.id).map(|l| l.health_score).unwrap_or(0.0);
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterConfig, ClusterStatus, ClusterType};
    use chrono::Utc;
    use std::collections::{HashMap as Map, HashSet as Set};

    fn cluster(id: &str) -> Cluster {
        Cluster {
            id: id.to_string(),
            name: id.to_string(),
            cluster_type: ClusterType::Prometheus,
            endpoints: vec![format!("http://{id}")],
            config: ClusterConfig::default(),
            status: ClusterStatus::Active,
            tags: Set::new(),
            labels: Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn round_robin_cycles_deterministically_without_sleeping() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let clusters = vec![cluster("a"), cluster("b"), cluster("c")];
        for c in &clusters {
            lb.track(&c.id);
        }

        let picks: Vec<&str> = (0..6)
            .map(|_| lb.select(&clusters).unwrap().id.as_str())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn unhealthy_cluster_is_excluded_from_every_strategy() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let clusters = vec![cluster("a"), cluster("b")];
        lb.track("a");
        lb.track("b");
        for _ in 0..10 {
            lb.record_outcome("a", 10.0, false);
        }

        for _ in 0..4 {
            let picked = lb.select(&clusters).unwrap();
            assert_eq!(picked.id, "b");
        }
    }

    #[test]
    fn healthy_only_picks_highest_score_tie_broken_by_lowest_response_time() {
        let lb = LoadBalancer::new(Strategy::HealthyOnly);
        let clusters = vec![cluster("a"), cluster("b"), cluster("c")];
        for c in &clusters {
            lb.track(&c.id);
        }

        // "a" and "b" both converge to the same health_score after one
        // successful outcome; "b" has the lower average response time.
        lb.record_outcome("a", 50.0, true);
        lb.record_outcome("b", 5.0, true);
        lb.record_outcome("c", 5.0, false);

        let picked = lb.select(&clusters).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn failover_prefers_highest_health_score_excluding_the_bad_cluster() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let clusters = vec![cluster("a"), cluster("b"), cluster("c")];
        for c in &clusters {
            lb.track(&c.id);
        }
        lb.record_outcome("b", 5.0, true);
        lb.record_outcome("b", 5.0, true);

        let picked = lb.failover(&clusters, "a").unwrap();
        assert_eq!(picked.id, "b");
    }
}
