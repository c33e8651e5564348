use alertagent_core::queue::{
    AiAnalysisHandler, ConfigSyncHandler, HttpModelClient, HttpNotifierAdapter,
    InMemoryAlertRepository, NotificationHandler, QUEUE_AI_ANALYSIS, QUEUE_CONFIG_SYNC,
    QUEUE_NOTIFICATION, RedisTaskQueue, WorkerPool,
};
use alertagent_core::syncer::{ConfigDeliverer, ConfigSource, Syncer};
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

#[derive(Parser)]
#[command(name = "alertagent-worker")]
#[command(about = "Worker pool hosting AIAnalysis, Notification, and ConfigSync handlers")]
struct Cli {
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    #[arg(long, env = "WORKER_CONCURRENCY", default_value = "4")]
    concurrency: usize,

    #[arg(long, env = "MODEL_ENDPOINT", default_value = "http://127.0.0.1:11434/analyze")]
    model_endpoint: String,

    /// Comma-separated `channel=webhook_url` pairs, e.g. `slack=https://hooks/x,email=https://hooks/y`
    #[arg(long, env = "NOTIFIER_WEBHOOKS", default_value = "")]
    notifier_webhooks: String,
}

fn parse_webhooks(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(channel, url)| (channel.to_string(), url.to_string()))
        .collect()
}

/// `Syncer` collaborators the worker doesn't own: the control-plane daemon
/// wires the real template-backed source and HTTP deliverer. `ConfigSync`
/// tasks dispatched here only re-trigger a sync already scheduled centrally.
struct NoopConfigSource;

#[async_trait::async_trait]
impl ConfigSource for NoopConfigSource {
    async fn resolve(
        &self,
        cluster_id: &alertagent_core::model::ClusterId,
        _config_type: alertagent_core::model::ConfigType,
    ) -> alertagent_core::Result<Vec<u8>> {
        Err(alertagent_core::AlertAgentError::NotFound {
            resource: "config source",
            id: cluster_id.clone(),
        })
    }
}

struct NoopConfigDeliverer;

#[async_trait::async_trait]
impl ConfigDeliverer for NoopConfigDeliverer {
    async fn deliver(
        &self,
        _cluster_id: &alertagent_core::model::ClusterId,
        _config_type: alertagent_core::model::ConfigType,
        _bytes: &[u8],
    ) -> alertagent_core::Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_env_filter("info").init();

    let queue = Arc::new(
        RedisTaskQueue::connect(&cli.redis_url)
            .await
            .context("failed to connect to redis")?,
    );

    let mut pool = WorkerPool::new(queue.clone(), cli.concurrency);

    let model_client = Arc::new(HttpModelClient::new(cli.model_endpoint));
    let alert_repository = Arc::new(InMemoryAlertRepository::default());
    pool.register_handler(
        QUEUE_AI_ANALYSIS,
        Arc::new(AiAnalysisHandler::new(model_client, alert_repository)),
    );

    let webhooks = parse_webhooks(&cli.notifier_webhooks);
    let notifier = Arc::new(HttpNotifierAdapter::new(webhooks));
    pool.register_handler(QUEUE_NOTIFICATION, Arc::new(NotificationHandler::new(notifier)));

    let syncer = Arc::new(Syncer::new(
        Arc::new(NoopConfigSource),
        Arc::new(NoopConfigDeliverer),
        Duration::from_secs(60),
    ));
    pool.register_handler(QUEUE_CONFIG_SYNC, Arc::new(ConfigSyncHandler::new(syncer)));

    let pool = Arc::new(pool);
    pool.start();
    info!(concurrency = cli.concurrency, "worker pool started");

    signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutting down worker pool");
    pool.stop();

    Ok(())
}
