use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::RwLock,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Overrides the default database location next to the working directory.
    pub database_path: Option<PathBuf>,
    pub use_24_hour_clock: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            use_24_hour_clock: true,
        }
    }
}

pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<AppConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            AppConfig::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn config(&self) -> AppConfig {
        self.data.read().unwrap().clone()
    }

    pub fn update(&self, config: AppConfig) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            *guard = config.clone();
        }

        let contents =
            serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))?;

        Ok(())
    }
}
