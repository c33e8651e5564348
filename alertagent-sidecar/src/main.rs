mod client;
mod config;
mod health_server;

use crate::client::{CentralClient, StatusReport};
use crate::config::SidecarArgs;
use alertagent_core::error::{AlertAgentError, Result};
use alertagent_core::model::ConfigType;
use alertagent_core::sidecar::{self, SidecarState};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

struct Agent {
    client: CentralClient,
    state: Arc<Mutex<SidecarState>>,
    config_path: PathBuf,
    reload_url: String,
    config_type: ConfigType,
    cluster_id: String,
}

impl Agent {
    /// One full pull→validate→write→reload attempt. Returns `Ok(true)` when
    /// a new config was actually applied (used only for logging).
    async fn sync_once(&self) -> Result<bool> {
        self.state.lock().await.begin_sync();

        let result = self.sync_attempt().await;

        let mut guard = self.state.lock().await;
        match &result {
            Ok(Some((hash, size))) => guard.complete_success(hash.clone(), *size),
            Ok(None) => guard.complete_unchanged(),
            Err(e) => guard.complete_error(e.to_string()),
        }
        drop(guard);

        self.report_status(&result).await;

        match result {
            Ok(applied) => Ok(applied.is_some()),
            Err(e) => Err(e),
        }
    }

    async fn sync_attempt(&self) -> Result<Option<(String, usize)>> {
        let last_hash = self.state.lock().await.last_hash.clone();

        let pulled = self.client.pull_config(last_hash.as_deref()).await?;
        let Some(pulled) = pulled else {
            return Ok(None);
        };
        if last_hash.as_deref() == Some(pulled.hash.as_str()) {
            return Ok(None);
        }
        let body = pulled.body.expect("pull_config always sets body when Some");

        sidecar::validate_config(self.config_type, &body)?;
        sidecar::write_atomic(&self.config_path, &body).await?;
        self.trigger_reload().await?;

        Ok(Some((pulled.hash, body.len())))
    }

    async fn trigger_reload(&self) -> Result<()> {
        let http = reqwest::Client::new();
        let response = http
            .post(&self.reload_url)
            .send()
            .await
            .map_err(AlertAgentError::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AlertAgentError::ReloadFailed(format!("{status}: {body}")));
        }
        Ok(())
    }

    async fn report_status(&self, result: &Result<Option<(String, usize)>>) {
        let guard = self.state.lock().await;
        let (status, error_message) = match result {
            Ok(_) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };
        let report = StatusReport {
            cluster_id: &self.cluster_id,
            config_type: self.config_type,
            status,
            sync_time: chrono::Utc::now(),
            config_hash: guard.last_hash.as_deref(),
            error_message: error_message.as_deref(),
        };
        drop(guard);

        // Failure here is logged but never escalated.
        if let Err(e) = self.client.report_status(&report).await {
            warn!(error = %e, "status report to central plane failed");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = SidecarArgs::parse();

    tracing_subscriber::fmt().with_env_filter("info").init();

    let config_type: ConfigType = args.config_type.into();
    let client = CentralClient::new(&args, config_type).context("failed to build central-plane HTTP client")?;
    let state = Arc::new(Mutex::new(SidecarState::default()));

    let agent = Arc::new(Agent {
        client,
        state: Arc::clone(&state),
        config_path: PathBuf::from(&args.config_path),
        reload_url: args.reload_url.clone(),
        config_type,
        cluster_id: args.cluster_id.clone(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.http_port))
        .await
        .with_context(|| format!("failed to bind health port {}", args.http_port))?;
    let router = health_server::router(Arc::clone(&state));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "health server exited");
        }
    });

    info!(cluster_id = %agent.cluster_id, config_type = ?config_type, "starting sidecar sync loop");

    let backoff = args.backoff_policy();
    let agent_for_initial = Arc::clone(&agent);
    sidecar::with_retry(&backoff, || {
        let agent = Arc::clone(&agent_for_initial);
        async move { agent.sync_once().await.map(|_| ()) }
    })
    .await
    .ok();

    let mut ticker = tokio::time::interval(args.sync_interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let backoff = args.backoff_policy();
        let outcome = sidecar::with_retry(&backoff, || {
            let agent = Arc::clone(&agent);
            async move { agent.sync_once().await.map(|_| ()) }
        })
        .await;

        if let Err(e) = outcome {
            error!(error = %e, "sidecar sync attempt failed after retries");
        }
    }
}
