use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const ENV_PREFIX: &str = "MEMESENSE";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub workflow: WorkflowSettings,
    pub ingest: IngestSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub visual_analysis_ms: u64,
    pub text_processing_ms: u64,
    pub classification_ms: u64,
    /// Upper bound on a single scorer call once the last stage has elapsed.
    pub classify_timeout_ms: u64,
    /// Probability that the stub scorer labels an image explicit.
    pub explicit_rate: f64,
    /// Seeds the stub scorer, mostly useful for reproducible demos.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestSettings {
    pub strict: bool,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            visual_analysis_ms: 2000,
            text_processing_ms: 1500,
            classification_ms: 1000,
            classify_timeout_ms: 10_000,
            explicit_rate: 0.5,
            seed: None,
        }
    }
}

impl WorkflowSettings {
    pub fn classify_timeout(&self) -> Duration {
        Duration::from_millis(self.classify_timeout_ms)
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            strict: false,
            allowed_extensions: vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()],
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Layers built-in defaults, an optional settings file and `MEMESENSE__*`
    /// environment variables, in that order.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}
