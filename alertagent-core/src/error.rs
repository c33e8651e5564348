//! Structured error taxonomy shared by every AlertAgent component.
//!
//! Each variant carries a stable "kind" that the HTTP boundary (an external
//! collaborator) maps to a status code; retry policy is decided purely on the
//! variant, never on string matching against `Display` output.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertAgentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{resource} '{id}' not found")]
    NotFound { resource: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("a cluster named '{0}' already exists")]
    DuplicateName(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config failed schema validation: {0}")]
    SchemaValidation(String),

    #[error("reload failed: {0}")]
    ReloadFailed(String),

    #[error("write error: {0}")]
    WriteError(String),

    #[error("task handler panicked: {0}")]
    HandlerPanic(String),

    #[error("no healthy cluster available")]
    NoHealthyCluster,

    #[error("template error: {0}")]
    Template(#[from] crate::template::TemplateError),

    #[error("queue error: {0}")]
    Queue(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_yaml::Error> for AlertAgentError {
    fn from(err: serde_yaml::Error) -> Self {
        AlertAgentError::SchemaValidation(err.to_string())
    }
}

impl From<serde_json::Error> for AlertAgentError {
    fn from(err: serde_json::Error) -> Self {
        AlertAgentError::Validation(err.to_string())
    }
}

impl From<reqwest::Error> for AlertAgentError {
    fn from(err: reqwest::Error) -> Self {
        AlertAgentError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for AlertAgentError {
    fn from(err: std::io::Error) -> Self {
        AlertAgentError::WriteError(err.to_string())
    }
}

impl From<toml::de::Error> for AlertAgentError {
    fn from(err: toml::de::Error) -> Self {
        AlertAgentError::Validation(format!("TOML parsing error: {err}"))
    }
}

impl AlertAgentError {
    /// Whether a caller should retry this error class: `Transport` and
    /// `ReloadFailed` are retried with back-off, everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AlertAgentError::Transport(_) | AlertAgentError::ReloadFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AlertAgentError>;
