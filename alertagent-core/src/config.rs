//! Control-plane configuration: `toml`-backed, `Default`-derived, writes a
//! default file on first run.

use crate::cluster::Strategy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub health: HealthConfig,
    pub load_balancer: LoadBalancerConfig,
    pub syncer: SyncerConfig,
    pub queue: QueueConfig,
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub check_interval_secs: u64,
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub strategy: LoadBalancerStrategy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerStrategy {
    RoundRobin,
    Weighted,
    LeastConnections,
    Random,
    HealthyOnly,
}

impl From<LoadBalancerStrategy> for Strategy {
    fn from(value: LoadBalancerStrategy) -> Self {
        match value {
            LoadBalancerStrategy::RoundRobin => Strategy::RoundRobin,
            LoadBalancerStrategy::Weighted => Strategy::Weighted,
            LoadBalancerStrategy::LeastConnections => Strategy::LeastConnections,
            LoadBalancerStrategy::Random => Strategy::Random,
            LoadBalancerStrategy::HealthyOnly => Strategy::HealthyOnly,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncerConfig {
    pub sync_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub redis_url: Option<String>,
    pub worker_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0:8090".to_string(),
                shutdown_grace_secs: 30,
            },
            health: HealthConfig {
                check_interval_secs: 30,
                probe_timeout_secs: 5,
            },
            load_balancer: LoadBalancerConfig {
                strategy: LoadBalancerStrategy::RoundRobin,
            },
            syncer: SyncerConfig { sync_interval_secs: 60 },
            queue: QueueConfig {
                redis_url: Some("redis://127.0.0.1:6379".to_string()),
                worker_concurrency: 4,
            },
            database_path: "~/.local/share/alertagent/alertagent.db".to_string(),
        }
    }
}

impl Config {
    pub async fn load(config_path: Option<&str>) -> Result<Self> {
        let path = match config_path {
            Some(p) => PathBuf::from(p),
            None => {
                let config_dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("could not find config directory"))?;
                config_dir.join("alertagent").join("alertagent.toml")
            }
        };

        if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Config::default();
            config.save(&path).await?;
            Ok(config)
        }
    }

    pub async fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_with_missing_path_writes_and_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertagent.toml");

        let loaded = Config::load(Some(path.to_str().unwrap())).await.unwrap();
        assert_eq!(loaded.server.bind_addr, Config::default().server.bind_addr);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn load_round_trips_an_edited_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertagent.toml");

        let mut config = Config::default();
        config.queue.worker_concurrency = 16;
        config.save(&path).await.unwrap();

        let reloaded = Config::load(Some(path.to_str().unwrap())).await.unwrap();
        assert_eq!(reloaded.queue.worker_concurrency, 16);
    }
}
