//! Core data model: `Cluster`, `ClusterHealth`, `ClusterLoad`, `SyncStatus`,
//! and the shared `ConfigType` tag. `ConfigTemplate` lives in
//! [`crate::template`] since it is owned end-to-end by the template engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub type ClusterId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    AlertManager,
    Prometheus,
    VmAlert,
    Grafana,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Active,
    Inactive,
    Maintenance,
    Error,
    Unknown,
}

/// `config_type` as carried by the distribution plane and the sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    Prometheus,
    Alertmanager,
    Vmalert,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl AuthConfig {
    pub fn has_credential(&self) -> bool {
        self.username.as_ref().is_some_and(|s| !s.is_empty())
            || self.token.as_ref().is_some_and(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub max_connections: u32,
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    pub enabled: bool,
    pub ca_cert_path: Option<String>,
    pub skip_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/-/healthy".to_string(),
            interval_secs: 30,
            timeout_secs: 5,
            unhealthy_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub config_type: ConfigType,
    pub sync_interval_secs: u64,
    pub reload_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HaConfig {
    pub enabled: bool,
    /// Minimum number of endpoints that must stay healthy for the cluster to
    /// be considered up.
    pub min_healthy_endpoints: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub auth: AuthConfig,
    pub connection: ConnectionConfig,
    pub tls: TlsConfig,
    pub health_check: HealthCheckConfig,
    pub sync: Option<SyncConfig>,
    pub ha: HaConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            connection: ConnectionConfig::default(),
            tls: TlsConfig::default(),
            health_check: HealthCheckConfig::default(),
            sync: None,
            ha: HaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub cluster_type: ClusterType,
    /// First element is the primary endpoint.
    pub endpoints: Vec<String>,
    pub config: ClusterConfig,
    pub status: ClusterStatus,
    pub tags: HashSet<String>,
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    pub fn primary_endpoint(&self) -> Option<&str> {
        self.endpoints.first().map(String::as_str)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub url: String,
    pub healthy: bool,
    pub last_probe_latency_ms: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterMetrics {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_percent: f32,
    pub request_count: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub cluster_id: ClusterId,
    pub status: ClusterStatus,
    pub endpoints: Vec<EndpointHealth>,
    pub metrics: ClusterMetrics,
    pub last_check: DateTime<Utc>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterLoad {
    pub cluster_id: ClusterId,
    pub weight: f64,
    pub connections: u64,
    pub avg_response_time_ms: f64,
    pub health_score: f64,
    pub last_used: DateTime<Utc>,
}

impl ClusterLoad {
    pub fn new(cluster_id: ClusterId) -> Self {
        Self {
            cluster_id,
            weight: 1.0,
            connections: 0,
            avg_response_time_ms: 0.0,
            health_score: 1.0,
            last_used: Utc::now(),
        }
    }

    /// EWMA smoothing factor for response-time tracking.
    const EWMA_ALPHA: f64 = 0.2;

    pub fn record_outcome(&mut self, latency_ms: f64, success: bool) {
        self.avg_response_time_ms = if self.avg_response_time_ms == 0.0 {
            latency_ms
        } else {
            Self::EWMA_ALPHA * latency_ms + (1.0 - Self::EWMA_ALPHA) * self.avg_response_time_ms
        };

        self.health_score = if success {
            (self.health_score + 1.0) / 2.0
        } else {
            self.health_score * 0.8
        };

        self.last_used = Utc::now();
    }

    pub fn is_healthy(&self) -> bool {
        self.health_score > 0.5
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Pending,
    InProgress,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub cluster_id: ClusterId,
    pub config_type: ConfigType,
    pub phase: SyncPhase,
    pub last_sync: Option<DateTime<Utc>>,
    pub next_sync: DateTime<Utc>,
    pub version: String,
    pub config_hash: Option<String>,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

impl SyncStatus {
    pub fn pending(cluster_id: ClusterId, config_type: ConfigType) -> Self {
        Self {
            cluster_id,
            config_type,
            phase: SyncPhase::Pending,
            last_sync: None,
            next_sync: Utc::now(),
            version: "0".to_string(),
            config_hash: None,
            last_error: None,
            retry_count: 0,
        }
    }

    pub fn mark_success(&mut self, hash: String, sync_interval: std::time::Duration) {
        self.phase = SyncPhase::Success;
        self.last_sync = Some(Utc::now());
        self.config_hash = Some(hash);
        self.last_error = None;
        self.next_sync = Utc::now() + chrono::Duration::from_std(sync_interval).unwrap_or_default();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, sync_interval: std::time::Duration) {
        self.phase = SyncPhase::Failed;
        self.last_error = Some(error.into());
        self.retry_count += 1;
        self.next_sync = Utc::now() + chrono::Duration::from_std(sync_interval).unwrap_or_default();
    }
}

/// Runtime-only configuration passed to the sidecar process; not persisted
/// anywhere — it is reconstructed from env/CLI on every restart.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub central_endpoint: String,
    pub cluster_id: ClusterId,
    pub config_type: ConfigType,
    pub config_path: std::path::PathBuf,
    pub reload_url: String,
    pub sync_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub health_port: u16,
}
