use alertagent_core::cluster::{ClusterManager, Strategy};
use alertagent_core::config::Config;
use alertagent_core::queue::{InMemoryTaskQueue, WorkerPool};
use alertagent_core::syncer::Syncer;
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "alertagentd")]
#[command(about = "Control plane for a fleet of alerting back-ends")]
#[command(version)]
struct Cli {
    /// Path to alertagent.toml; defaults to the platform config directory
    #[arg(short, long)]
    config: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

struct Daemon {
    cluster_manager: Arc<ClusterManager>,
    syncer: Arc<Syncer>,
    worker_pool: Arc<WorkerPool>,
    running: Arc<AtomicBool>,
}

impl Daemon {
    async fn new(config: &Config) -> Result<Self> {
        info!("initializing AlertAgent control plane");

        let strategy: Strategy = config.load_balancer.strategy.into();
        let cluster_manager = Arc::new(ClusterManager::new(strategy));

        let source = Arc::new(NoopConfigSource);
        let deliverer = Arc::new(NoopConfigDeliverer);
        let syncer = Arc::new(Syncer::new(
            source,
            deliverer,
            Duration::from_secs(config.syncer.sync_interval_secs),
        ));

        let queue = Arc::new(InMemoryTaskQueue::default());
        let worker_pool = Arc::new(WorkerPool::new(queue, config.queue.worker_concurrency));

        Ok(Self {
            cluster_manager,
            syncer,
            worker_pool,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn start(&self, health_interval: Duration) -> Result<()> {
        info!("starting AlertAgent control plane");
        self.running.store(true, Ordering::SeqCst);

        self.cluster_manager.start_health_monitor(health_interval);
        self.syncer.start();
        self.worker_pool.start();

        self.run_daemon_loop().await
    }

    async fn run_daemon_loop(&self) -> Result<()> {
        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("received shutdown signal, stopping gracefully");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
        self.stop().await
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.cluster_manager.stop_health_monitor();
        self.worker_pool.stop();
        info!("AlertAgent control plane stopped");
        Ok(())
    }
}

/// `ConfigSource`/`ConfigDeliverer` wired to the real template engine and
/// back-end HTTP clients by the deployment; these no-op stand-ins keep the
/// daemon runnable standalone.
struct NoopConfigSource;

#[async_trait::async_trait]
impl alertagent_core::syncer::ConfigSource for NoopConfigSource {
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
impl alertagent_core::syncer::ConfigDeliverer for NoopConfigDeliverer {
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

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(cli.config.as_deref())
        .await
        .context("failed to load configuration")?;

    let daemon = Daemon::new(&config).await.context("failed to initialize daemon")?;
    let health_interval = Duration::from_secs(config.health.check_interval_secs);
    daemon.start(health_interval).await
}
