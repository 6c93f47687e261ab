use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::enrich::DEFAULT_BATCH_SIZE;
use crate::error::ExportError;

pub const DEFAULT_CONFIG_FILE: &str = "rnac-export.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default = "default_results_dir")]
    pub results_dir: Utf8PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub sequence: SequenceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SequenceConfig {
    #[serde(default = "default_esl_binary")]
    pub esl_binary: Utf8PathBuf,
    #[serde(default)]
    pub fasta: Option<Utf8PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            batch_size: default_batch_size(),
            search: SearchConfig::default(),
            database_url: None,
            sequence: SequenceConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            esl_binary: default_esl_binary(),
            fasta: None,
        }
    }
}

impl SearchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ExportConfig, ExportError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            ExportConfig::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| ExportError::ConfigRead(config_path.clone()))?;
            Self::parse(&content)?
        };

        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    pub fn parse(content: &str) -> Result<ExportConfig, ExportError> {
        serde_json::from_str(content).map_err(|err| ExportError::ConfigParse(err.to_string()))
    }

    pub fn apply_overrides<F>(mut config: ExportConfig, lookup: F) -> Result<ExportConfig, ExportError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup("RNAC_EXPORT_DATABASE_URL") {
            config.database_url = Some(value.trim().to_string());
        }
        if let Some(value) = lookup("RNAC_EXPORT_ESL_BINARY") {
            config.sequence.esl_binary = Utf8PathBuf::from(value.trim());
        }
        if let Some(value) = lookup("RNAC_EXPORT_FASTA") {
            config.sequence.fasta = Some(Utf8PathBuf::from(value.trim()));
        }
        if let Some(value) = lookup("RNAC_EXPORT_RESULTS_DIR") {
            config.results_dir = Utf8PathBuf::from(value.trim());
        }

        Self::validate(config)
    }

    fn validate(config: ExportConfig) -> Result<ExportConfig, ExportError> {
        if config.batch_size == 0 {
            return Err(ExportError::ConfigParse(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if config.search.max_attempts == 0 {
            return Err(ExportError::ConfigParse(
                "search.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

fn default_results_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("results")
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_attempts() -> usize {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_esl_binary() -> Utf8PathBuf {
    Utf8PathBuf::from("esl-sfetch")
}
