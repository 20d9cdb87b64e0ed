use crate::config::{AppSettings, TrainingConfig};
use anyhow::{Context, Result};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppContext {
    settings: AppSettings,
}

impl AppContext {
    pub fn initialize() -> Result<Self> {
        Ok(Self {
            settings: AppSettings::from_env()?,
        })
    }

    pub fn with_settings(settings: AppSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn http_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")
    }

    /// The override path wins over `TRAINING_CONFIG`; neither means built-in defaults.
    pub fn training_config(&self, override_path: Option<&Path>) -> Result<TrainingConfig> {
        let path = override_path.or(self.settings.training_config_path.as_deref());
        TrainingConfig::load(path)
    }
}
