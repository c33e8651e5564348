//! Sidecar configuration: env/CLI layered over defaults, using the same
//! `clap(env)`-over-`Config` layering as the root daemon binary.

use alertagent_core::model::ConfigType;
use alertagent_core::sidecar::BackoffPolicy;
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "alertagent-sidecar")]
#[command(about = "Sidecar agent that syncs and reloads one alerting back-end")]
pub struct SidecarArgs {
    /// Base URL of the control plane, e.g. https://alertagent.internal
    #[arg(long, env = "ALERTAGENT_ENDPOINT")]
    pub alertagent_endpoint: String,

    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: String,

    #[arg(long, env = "CONFIG_TYPE")]
    pub config_type: ConfigTypeArg,

    #[arg(long, env = "CONFIG_PATH")]
    pub config_path: String,

    #[arg(long, env = "RELOAD_URL")]
    pub reload_url: String,

    #[arg(long, env = "SYNC_INTERVAL", default_value = "30s", value_parser = parse_duration)]
    pub sync_interval: Duration,

    #[arg(long, env = "HTTP_PORT", default_value = "8080")]
    pub http_port: u16,

    #[arg(long, env = "HTTP_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub http_timeout: Duration,

    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    #[arg(long, env = "RETRY_BACKOFF", default_value = "5s", value_parser = parse_duration)]
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum ConfigTypeArg {
    Prometheus,
    Alertmanager,
    Vmalert,
}

impl From<ConfigTypeArg> for ConfigType {
    fn from(value: ConfigTypeArg) -> Self {
        match value {
            ConfigTypeArg::Prometheus => ConfigType::Prometheus,
            ConfigTypeArg::Alertmanager => ConfigType::Alertmanager,
            ConfigTypeArg::Vmalert => ConfigType::Vmalert,
        }
    }
}

impl SidecarArgs {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: self.retry_backoff,
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_retries: self.max_retries,
        }
    }
}

/// Accepts a bare integer (seconds) or a `humantime`-style suffix (`30s`, `5m`).
fn parse_duration(raw: &str) -> Result<Duration, String> {
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let (num, unit) = raw.split_at(raw.len() - 1);
    let n: u64 = num.parse().map_err(|_| format!("invalid duration: {raw}"))?;
    match unit {
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(format!("invalid duration suffix in: {raw}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("bogus").is_err());
    }
}
