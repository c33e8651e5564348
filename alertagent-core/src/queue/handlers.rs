//! Task handlers and the collaborator traits they depend on. `ModelClient`/
//! `NotifierAdapter` shape inputs only — their full product contract (model
//! providers, notification channels) lives outside this repo.

use crate::error::{AlertAgentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Dispatch target for one queue name; handlers register themselves at boot.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &super::Task) -> Result<()>;
}

/// Boundary the `AIAnalysis` handler writes analysis results through.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn attach_analysis(&self, alert_id: &str, analysis: &str) -> Result<()>;
}

/// Opaque model HTTP client contract (shape only — no provider-specific logic).
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn analyze(&self, alert_id: &str, model: &str, prompt: &str) -> Result<String>;
}

/// Opaque per-channel notifier contract.
#[async_trait]
pub trait NotifierAdapter: Send + Sync {
    async fn send(&self, channel: &str, recipient: &str, message: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysisPayload {
    pub alert_id: String,
    pub model: String,
    pub prompt: String,
}

pub struct AiAnalysisHandler {
    model_client: Arc<dyn ModelClient>,
    alert_repository: Arc<dyn AlertRepository>,
}

impl AiAnalysisHandler {
    pub fn new(model_client: Arc<dyn ModelClient>, alert_repository: Arc<dyn AlertRepository>) -> Self {
        Self { model_client, alert_repository }
    }
}

#[async_trait]
impl TaskHandler for AiAnalysisHandler {
    async fn handle(&self, task: &super::Task) -> Result<()> {
        let payload: AiAnalysisPayload = serde_json::from_value(task.payload.clone())?;
        let analysis = self
            .model_client
            .analyze(&payload.alert_id, &payload.model, &payload.prompt)
            .await?;
        self.alert_repository.attach_analysis(&payload.alert_id, &analysis).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub message: String,
    pub recipients: Vec<String>,
    pub channels: Vec<String>,
}

pub struct NotificationHandler {
    notifier: Arc<dyn NotifierAdapter>,
}

impl NotificationHandler {
    pub fn new(notifier: Arc<dyn NotifierAdapter>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl TaskHandler for NotificationHandler {
    async fn handle(&self, task: &super::Task) -> Result<()> {
        let payload: NotificationPayload = serde_json::from_value(task.payload.clone())?;

        let mut delivered = 0usize;
        let mut errors = Vec::new();

        for channel in &payload.channels {
            for recipient in &payload.recipients {
                match self.notifier.send(channel, recipient, &payload.message).await {
                    Ok(()) => delivered += 1,
                    Err(e) => errors.push(format!("{channel}/{recipient}: {e}")),
                }
            }
        }

        if delivered == 0 {
            return Err(AlertAgentError::Transport(format!(
                "all notification channels failed: {}",
                errors.join("; ")
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSyncPayload {
    pub cluster_id: String,
    pub config_type: crate::model::ConfigType,
}

pub struct ConfigSyncHandler {
    syncer: Arc<crate::syncer::Syncer>,
}

impl ConfigSyncHandler {
    pub fn new(syncer: Arc<crate::syncer::Syncer>) -> Self {
        Self { syncer }
    }
}

#[async_trait]
impl TaskHandler for ConfigSyncHandler {
    async fn handle(&self, task: &super::Task) -> Result<()> {
        let payload: ConfigSyncPayload = serde_json::from_value(task.payload.clone())?;
        self.syncer
            .batch_sync(&[(payload.cluster_id, payload.config_type)])
            .await;
        Ok(())
    }
}

/// In-memory default for [`AlertRepository`], used by tests and by any
/// deployment not yet wired to the real alert store.
#[derive(Default)]
pub struct InMemoryAlertRepository {
    analyses: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl AlertRepository for InMemoryAlertRepository {
    async fn attach_analysis(&self, alert_id: &str, analysis: &str) -> Result<()> {
        self.analyses.write().await.insert(alert_id.to_string(), analysis.to_string());
        Ok(())
    }
}

impl InMemoryAlertRepository {
    pub async fn analysis_for(&self, alert_id: &str) -> Option<String> {
        self.analyses.read().await.get(alert_id).cloned()
    }
}

/// Concrete `reqwest`-based model client: posts `{alert_id, model, prompt}`
/// to a configured endpoint and returns the response body as the analysis
/// text. Shapes the input contract only — no provider-specific logic.
pub struct HttpModelClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpModelClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Serialize)]
struct ModelRequest<'a> {
    alert_id: &'a str,
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct ModelResponse {
    analysis: String,
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn analyze(&self, alert_id: &str, model: &str, prompt: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&ModelRequest { alert_id, model, prompt })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AlertAgentError::Transport(format!(
                "model endpoint returned {}",
                response.status()
            )));
        }

        let parsed: ModelResponse = response.json().await?;
        Ok(parsed.analysis)
    }
}

/// Concrete `reqwest`-based notifier: posts `{recipient, message}` to a
/// per-channel webhook URL. Channel -> URL mapping is supplied at
/// construction; unknown channels surface as `Validation`.
pub struct HttpNotifierAdapter {
    http: reqwest::Client,
    webhooks: HashMap<String, String>,
}

impl HttpNotifierAdapter {
    pub fn new(webhooks: HashMap<String, String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhooks,
        }
    }
}

#[derive(Serialize)]
struct NotifyRequest<'a> {
    recipient: &'a str,
    message: &'a str,
}

#[async_trait]
impl NotifierAdapter for HttpNotifierAdapter {
    async fn send(&self, channel: &str, recipient: &str, message: &str) -> Result<()> {
        let url = self
            .webhooks
            .get(channel)
            .ok_or_else(|| AlertAgentError::Validation(format!("no webhook configured for channel '{channel}'")))?;

        let response = self.http.post(url).json(&NotifyRequest { recipient, message }).send().await?;

        if !response.status().is_success() {
            return Err(AlertAgentError::Transport(format!(
                "webhook for channel '{channel}' returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{QUEUE_NOTIFICATION, Task};

    struct AlwaysFails;
    #[async_trait]
    impl NotifierAdapter for AlwaysFails {
        async fn send(&self, _channel: &str, _recipient: &str, _message: &str) -> Result<()> {
            Err(AlertAgentError::Transport("channel down".to_string()))
        }
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl NotifierAdapter for AlwaysSucceeds {
        async fn send(&self, _channel: &str, _recipient: &str, _message: &str) -> Result<()> {
            Ok(())
        }
    }

    fn notification_task() -> Task {
        Task::new(
            QUEUE_NOTIFICATION,
            5,
            serde_json::json!({
                "message": "cluster down",
                "recipients": ["oncall"],
                "channels": ["slack", "email"]
            }),
        )
    }

    #[tokio::test]
    async fn notification_succeeds_if_at_least_one_channel_delivers() {
        struct MixedAdapter;
        #[async_trait]
        impl NotifierAdapter for MixedAdapter {
            async fn send(&self, channel: &str, _recipient: &str, _message: &str) -> Result<()> {
                if channel == "slack" {
                    Ok(())
                } else {
                    Err(AlertAgentError::Transport("smtp timeout".to_string()))
                }
            }
        }

        let handler = NotificationHandler::new(Arc::new(MixedAdapter));
        handler.handle(&notification_task()).await.unwrap();
    }

    #[tokio::test]
    async fn notification_fails_when_every_channel_fails() {
        let handler = NotificationHandler::new(Arc::new(AlwaysFails));
        let err = handler.handle(&notification_task()).await.unwrap_err();
        assert!(matches!(err, AlertAgentError::Transport(_)));
    }

    #[tokio::test]
    async fn notification_succeeding_adapter_handles_all_recipients() {
        let handler = NotificationHandler::new(Arc::new(AlwaysSucceeds));
        handler.handle(&notification_task()).await.unwrap();
    }
}
