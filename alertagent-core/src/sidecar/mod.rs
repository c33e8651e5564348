//! Shared sidecar logic: schema validators, atomic config writes, and the
//! retry/back-off policy. The binary in `alertagent-sidecar` wires these
//! into a process with a local health HTTP surface, acting on local state
//! before reporting it upstream.

pub mod validate;

pub use validate::validate_config;

use crate::error::{AlertAgentError, Result};
use crate::model::ConfigType;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const RETRYABLE_SUBSTRINGS: &[&str] = &[
    "connection refused",
    "timeout",
    "temporary failure",
    "network unreachable",
];

pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    /// `initialDelay × backoffFactor^attempt`, clamped to `maxDelay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `op` with retries governed by `policy`, retrying only when the error
/// message matches one of the retryable substrings.
pub async fn with_retry<T, F, Fut>(policy: &BackoffPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && is_retryable_message(&e.to_string()) => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, ?delay, error = %e, "retrying after transient error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Write `bytes` to `path` atomically: write to `{path}.tmp`, then rename
/// over `path`. On rename failure the temp file is removed and the original
/// error surfaces as `WriteError`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| AlertAgentError::WriteError(e.to_string()))?;

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(AlertAgentError::WriteError(e.to_string()));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Syncing,
    Success,
    Error,
}

/// Local sidecar state machine: `Idle -> Syncing -> {Success,Error} -> Idle`.
/// A new tick only starts once the previous attempt has returned to `Idle`.
#[derive(Debug, Clone)]
pub struct SidecarState {
    pub phase: SyncPhase,
    pub last_sync: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
    pub sync_count: u64,
    pub error_count: u64,
    pub last_hash: Option<String>,
    pub config_size: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl Default for SidecarState {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            last_sync: None,
            last_error: None,
            sync_count: 0,
            error_count: 0,
            last_hash: None,
            config_size: 0,
            started_at: chrono::Utc::now(),
        }
    }
}

impl SidecarState {
    pub fn begin_sync(&mut self) {
        self.phase = SyncPhase::Syncing;
    }

    pub fn complete_success(&mut self, hash: String, config_size: usize) {
        self.phase = SyncPhase::Success;
        self.last_sync = Some(chrono::Utc::now());
        self.last_hash = Some(hash);
        self.config_size = config_size;
        self.sync_count += 1;
        self.last_error = None;
    }

    pub fn complete_error(&mut self, error: impl Into<String>) {
        self.phase = SyncPhase::Error;
        self.last_error = Some(error.into());
        self.error_count += 1;
    }

    pub fn return_to_idle(&mut self) {
        self.phase = SyncPhase::Idle;
    }

    /// The config was unchanged (a 304 or a matching locally-computed hash):
    /// no file write, no reload, but it still counts as a completed sync.
    pub fn complete_unchanged(&mut self) {
        self.phase = SyncPhase::Idle;
        self.last_sync = Some(chrono::Utc::now());
        self.sync_count += 1;
        self.last_error = None;
    }

    pub fn is_healthy(&self) -> bool {
        !matches!(self.phase, SyncPhase::Error)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.phase, SyncPhase::Idle | SyncPhase::Syncing | SyncPhase::Success)
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.sync_count + self.error_count;
        if total == 0 {
            1.0
        } else {
            self.sync_count as f64 / total as f64
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_seconds()
    }
}

/// Determines `config_type`-specific reload URL path suffix: Prometheus,
/// Alertmanager, and VMAlert all share the `/-/reload` convention.
pub fn default_reload_path(_config_type: ConfigType) -> &'static str {
    "/-/reload"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_substrings_are_case_insensitive() {
        assert!(is_retryable_message("Connection Refused by peer"));
        assert!(is_retryable_message("operation TIMEOUT"));
        assert!(!is_retryable_message("schema validation failed"));
    }

    #[test]
    fn backoff_delay_clamps_to_max() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(10), policy.max_delay);
    }

    #[test]
    fn unchanged_config_still_counts_as_a_synced_tick() {
        let mut state = SidecarState::default();
        state.begin_sync();
        state.complete_error("previous attempt failed");
        assert_eq!(state.error_count, 1);

        state.begin_sync();
        state.complete_unchanged();

        assert_eq!(state.phase, SyncPhase::Idle);
        assert_eq!(state.sync_count, 1);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn write_atomic_round_trips_through_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alertmanager.yml");
        write_atomic(&path, b"route:\n  receiver: default\n").await.unwrap();

        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"route:\n  receiver: default\n");
        assert!(!dir.path().join("alertmanager.yml.tmp").exists());
    }

    #[tokio::test]
    async fn with_retry_gives_up_on_non_retryable_error() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..BackoffPolicy::default()
        };
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<()> = with_retry(&policy, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(AlertAgentError::Validation("bad config".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
