use crate::model::ConfigError;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub base_url: String,
    pub vehicle_type: i32,
    pub max_retries: u32,
    pub backoff_millis: u64,
    pub request_timeout_seconds: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            base_url: "https://veiculos.fipe.org.br/api/veiculos".to_string(),
            vehicle_type: 1,
            max_retries: 5,
            backoff_millis: 1000,
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    pub lookup_timeout_seconds: u64,
    pub dashboard_timeout_seconds: u64,
    pub import: ImportConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "fipe.db".to_string(),
            lookup_timeout_seconds: 10,
            dashboard_timeout_seconds: 30,
            import: ImportConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_seconds)
    }

    pub fn dashboard_timeout(&self) -> Duration {
        Duration::from_secs(self.dashboard_timeout_seconds)
    }
}

/// Reads the JSON config at `path`. A missing file yields the defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("No config at {}, using defaults", path.display());
            return Ok(AppConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
