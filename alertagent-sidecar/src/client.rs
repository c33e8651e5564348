//! Central-plane HTTP client: conditional-GET config pull and status report.

use crate::config::SidecarArgs;
use alertagent_core::error::{AlertAgentError, Result};
use alertagent_core::model::ConfigType;
use reqwest::StatusCode;
use serde::Serialize;

pub struct ConfigPull {
    /// `None` when the server returned 304 against our `last_hash`.
    pub body: Option<Vec<u8>>,
    pub hash: String,
}

pub struct CentralClient {
    http: reqwest::Client,
    endpoint: String,
    cluster_id: String,
    config_type: ConfigType,
}

impl CentralClient {
    pub fn new(args: &SidecarArgs, config_type: ConfigType) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(args.http_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: args.alertagent_endpoint.trim_end_matches('/').to_string(),
            cluster_id: args.cluster_id.clone(),
            config_type,
        })
    }

    /// `GET /api/v1/config/sync?cluster_id&type` with `If-None-Match: {last_hash}`.
    pub async fn pull_config(&self, last_hash: Option<&str>) -> Result<Option<ConfigPull>> {
        let mut request = self
            .http
            .get(format!("{}/api/v1/config/sync", self.endpoint))
            .query(&[("cluster_id", self.cluster_id.as_str()), ("type", config_type_str(self.config_type))]);

        if let Some(hash) = last_hash {
            request = request.header("If-None-Match", hash);
        }

        let response = request.send().await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AlertAgentError::Transport(format!(
                "config pull returned {}",
                response.status()
            )));
        }

        let hash = response
            .headers()
            .get("X-Config-Hash")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await?.to_vec();
        let hash = hash.unwrap_or_else(|| alertagent_core::syncer::config_hash(&body));

        Ok(Some(ConfigPull { body: Some(body), hash }))
    }

    /// `POST /api/v1/config/sync/status`; failures are logged by the caller,
    /// never escalated.
    pub async fn report_status(&self, report: &StatusReport<'_>) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/api/v1/config/sync/status", self.endpoint))
            .json(report)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AlertAgentError::Transport(format!(
                "status report returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct StatusReport<'a> {
    pub cluster_id: &'a str,
    pub config_type: ConfigType,
    pub status: &'a str,
    pub sync_time: chrono::DateTime<chrono::Utc>,
    pub config_hash: Option<&'a str>,
    pub error_message: Option<&'a str>,
}

fn config_type_str(config_type: ConfigType) -> &'static str {
    match config_type {
        ConfigType::Prometheus => "prometheus",
        ConfigType::Alertmanager => "alertmanager",
        ConfigType::Vmalert => "vmalert",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_type_query_values_are_lowercase() {
        assert_eq!(config_type_str(ConfigType::Prometheus), "prometheus");
        assert_eq!(config_type_str(ConfigType::Alertmanager), "alertmanager");
        assert_eq!(config_type_str(ConfigType::Vmalert), "vmalert");
    }
}
