pub mod cluster;
pub mod config;
pub mod error;
pub mod model;
pub mod queue;
pub mod sidecar;
pub mod syncer;
pub mod template;

pub use cluster::ClusterManager;
pub use config::Config;
pub use error::{AlertAgentError, Result};
pub use model::*;
pub use queue::{Task, TaskQueue, WorkerPool};
pub use syncer::Syncer;
pub use template::TemplateEngine;
