//! Template Engine: render & validate cluster configs from named templates
//! plus caller-supplied variables.
//!
//! A registry keyed by string ID, one in-memory map, write-through to an
//! opaque store, async `Result`-returning operations throughout.

mod render;

pub use render::{RenderError, render};

use crate::model::ClusterType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

pub type TemplateId = String;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    NotFound(TemplateId),

    #[error("template '{0}' already exists")]
    Duplicate(TemplateId),

    #[error("failed to parse template: {0}")]
    Parse(#[from] RenderError),
}

type Result<T> = std::result::Result<T, TemplateError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigTemplate {
    pub id: TemplateId,
    pub name: String,
    pub cluster_type: ClusterType,
    pub body: String,
    pub default_variables: HashMap<String, String>,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateStats {
    pub render_count: u64,
    pub last_rendered: Option<DateTime<Utc>>,
}

/// Opaque write-through store; persistence is a pluggable concern kept
/// behind a trait rather than baked into the engine.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn put(&self, template: &ConfigTemplate) -> anyhow::Result<()>;
    async fn delete(&self, id: &TemplateId) -> anyhow::Result<()>;
}

/// A store that does nothing — the default when no external store is wired
/// up, matching the in-memory-first posture used throughout this crate.
pub struct NullTemplateStore;

#[async_trait]
impl TemplateStore for NullTemplateStore {
    async fn put(&self, _template: &ConfigTemplate) -> anyhow::Result<()> {
        Ok(())
    }
    async fn delete(&self, _id: &TemplateId) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory `TemplateStore` used by tests that want to assert write-through
/// behavior without a real backing store.
#[derive(Default)]
pub struct InMemoryTemplateStore {
    written: RwLock<HashMap<TemplateId, ConfigTemplate>>,
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn put(&self, template: &ConfigTemplate) -> anyhow::Result<()> {
        self.written.write().unwrap().insert(template.id.clone(), template.clone());
        Ok(())
    }
    async fn delete(&self, id: &TemplateId) -> anyhow::Result<()> {
        self.written.write().unwrap().remove(id);
        Ok(())
    }
}

struct Entry {
    template: ConfigTemplate,
    parsed: render::ParsedTemplate,
    stats: TemplateStats,
}

/// In-memory `TemplateId -> (ConfigTemplate, parsed template)` registry with
/// write-through to an opaque store.
pub struct TemplateEngine {
    entries: RwLock<HashMap<TemplateId, Entry>>,
    store: Box<dyn TemplateStore>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new(Box::new(NullTemplateStore))
    }
}

impl TemplateEngine {
    pub fn new(store: Box<dyn TemplateStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub async fn create(
        &self,
        id: TemplateId,
        name: String,
        cluster_type: ClusterType,
        body: String,
        default_variables: HashMap<String, String>,
    ) -> Result<ConfigTemplate> {
        {
            let entries = self.entries.read().unwrap();
            if entries.contains_key(&id) {
                return Err(TemplateError::Duplicate(id));
            }
        }

        // Parse-before-store invariant: a stored template is always parseable.
        let parsed = render::parse(&body)?;
        let now = Utc::now();
        let template = ConfigTemplate {
            id: id.clone(),
            name,
            cluster_type,
            body,
            default_variables,
            version: "1.0.0".to_string(),
            created_at: now,
            updated_at: now,
        };

        self.store.put(&template).await.map_err(RenderError::from)?;

        self.entries.write().unwrap().insert(
            id,
            Entry {
                template: template.clone(),
                parsed,
                stats: TemplateStats::default(),
            },
        );

        Ok(template)
    }

    pub async fn update(
        &self,
        id: &TemplateId,
        body: String,
        default_variables: Option<HashMap<String, String>>,
    ) -> Result<ConfigTemplate> {
        let parsed = render::parse(&body)?;

        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| TemplateError::NotFound(id.clone()))?;

        entry.template.body = body;
        if let Some(vars) = default_variables {
            entry.template.default_variables = vars;
        }
        entry.template.updated_at = Utc::now();
        entry.parsed = parsed;

        Ok(entry.template.clone())
    }

    pub async fn delete(&self, id: &TemplateId) -> Result<()> {
        let removed = self.entries.write().unwrap().remove(id);
        if removed.is_none() {
            return Err(TemplateError::NotFound(id.clone()));
        }
        self.store.delete(id).await.map_err(RenderError::from)?;
        Ok(())
    }

    pub fn get(&self, id: &TemplateId) -> Result<ConfigTemplate> {
        self.entries
            .read()
            .unwrap()
            .get(id)
            .map(|e| e.template.clone())
            .ok_or_else(|| TemplateError::NotFound(id.clone()))
    }

    pub fn list_by_cluster_type(&self, cluster_type: ClusterType) -> Vec<ConfigTemplate> {
        self.entries
            .read()
            .unwrap()
            .values()
            .filter(|e| e.template.cluster_type == cluster_type)
            .map(|e| e.template.clone())
            .collect()
    }

    /// Merge default variables with caller vars (caller wins), then execute.
    pub fn render(&self, id: &TemplateId, vars: &HashMap<String, String>) -> Result<String> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| TemplateError::NotFound(id.clone()))?;

        let mut merged = entry.template.default_variables.clone();
        merged.extend(vars.clone());

        let output = render::execute(&entry.parsed, &merged)?;

        entry.stats.render_count += 1;
        entry.stats.last_rendered = Some(Utc::now());

        Ok(output)
    }

    pub fn validate_syntax(&self, body: &str) -> Result<()> {
        render::parse(body)?;
        Ok(())
    }

    /// Dry-run: verifies every placeholder in the template resolves given the
    /// supplied variables (combined with defaults), without producing output.
    pub fn validate_variables(
        &self,
        id: &TemplateId,
        vars: &HashMap<String, String>,
    ) -> Result<()> {
        self.render(id, vars).map(|_| ())
    }

    pub async fn clone_template(
        &self,
        source_id: &TemplateId,
        new_id: TemplateId,
    ) -> Result<ConfigTemplate> {
        let source = self.get(source_id)?;
        self.create(
            new_id,
            format!("{} (copy)", source.name),
            source.cluster_type,
            source.body,
            source.default_variables,
        )
        .await
    }

    pub fn export(&self, id: &TemplateId) -> Result<String> {
        let template = self.get(id)?;
        serde_json::to_string_pretty(&template)
            .map_err(|e| TemplateError::Parse(RenderError::Evaluation(e.to_string())))
    }

    pub async fn import(&self, json: &str) -> Result<ConfigTemplate> {
        let template: ConfigTemplate = serde_json::from_str(json)
            .map_err(|e| TemplateError::Parse(RenderError::Evaluation(e.to_string())))?;
        self.create(
            template.id,
            template.name,
            template.cluster_type,
            template.body,
            template.default_variables,
        )
        .await
    }

    pub fn stats(&self, id: &TemplateId) -> Result<TemplateStats> {
        self.entries
            .read()
            .unwrap()
            .get(id)
            .map(|e| e.stats.clone())
            .ok_or_else(|| TemplateError::NotFound(id.clone()))
    }
}

impl From<anyhow::Error> for RenderError {
    fn from(err: anyhow::Error) -> Self {
        RenderError::Evaluation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TemplateEngine {
        TemplateEngine::default()
    }

    #[tokio::test]
    async fn create_then_get_round_trip() {
        let engine = engine();
        let created = engine
            .create(
                "t1".to_string(),
                "Prometheus rules".to_string(),
                ClusterType::Prometheus,
                "groups:\n- name: {{.group_name}}\n".to_string(),
                HashMap::new(),
            )
            .await
            .unwrap();

        let fetched = engine.get(&created.id).unwrap();
        assert_eq!(fetched.id, "t1");
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let engine = engine();
        engine
            .create(
                "dup".to_string(),
                "n".to_string(),
                ClusterType::Prometheus,
                "body".to_string(),
                HashMap::new(),
            )
            .await
            .unwrap();

        let err = engine
            .create(
                "dup".to_string(),
                "n".to_string(),
                ClusterType::Prometheus,
                "body".to_string(),
                HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::Duplicate(_)));
    }

    #[tokio::test]
    async fn bad_syntax_rejects_the_write() {
        let engine = engine();
        let err = engine
            .create(
                "bad".to_string(),
                "n".to_string(),
                ClusterType::Prometheus,
                "{{.unterminated".to_string(),
                HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::Parse(_)));
    }

    #[tokio::test]
    async fn render_merges_defaults_caller_wins() {
        let engine = engine();
        let mut defaults = HashMap::new();
        defaults.insert("env".to_string(), "staging".to_string());

        engine
            .create(
                "t2".to_string(),
                "n".to_string(),
                ClusterType::Prometheus,
                "env={{.env}}".to_string(),
                defaults,
            )
            .await
            .unwrap();

        let out = engine.render(&"t2".to_string(), &HashMap::new()).unwrap();
        assert_eq!(out, "env=staging");

        let mut overrides = HashMap::new();
        overrides.insert("env".to_string(), "prod".to_string());
        let out = engine.render(&"t2".to_string(), &overrides).unwrap();
        assert_eq!(out, "env=prod");
    }

    #[tokio::test]
    async fn export_import_round_trip_renders_identically() {
        let source = engine();
        let mut defaults = HashMap::new();
        defaults.insert("name".to_string(), "g1".to_string());
        source
            .create(
                "t3".to_string(),
                "n".to_string(),
                ClusterType::Prometheus,
                "group={{upper .name}}".to_string(),
                defaults,
            )
            .await
            .unwrap();

        let exported = source.export(&"t3".to_string()).unwrap();
        let target = engine();
        target.import(&exported).await.unwrap();

        let a = source.render(&"t3".to_string(), &HashMap::new()).unwrap();
        let b = target.render(&"t3".to_string(), &HashMap::new()).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn missing_required_variable_is_a_render_error() {
        let engine = engine();
        engine
            .create(
                "t4".to_string(),
                "n".to_string(),
                ClusterType::Prometheus,
                "{{.missing}}".to_string(),
                HashMap::new(),
            )
            .await
            .unwrap();

        let err = engine.render(&"t4".to_string(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Parse(RenderError::MissingVariable(_))));
    }
}
