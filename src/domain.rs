use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ExportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ExportFormat {
    #[serde(rename = "txt")]
    #[value(name = "txt", alias = "list")]
    List,
    #[serde(rename = "json")]
    #[value(name = "json", alias = "structured")]
    Structured,
    #[serde(rename = "fasta")]
    #[value(name = "fasta", alias = "sequence")]
    Sequence,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::List => "txt.gz",
            ExportFormat::Structured => "json.gz",
            ExportFormat::Sequence => "fasta.gz",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::List => write!(f, "txt"),
            ExportFormat::Structured => write!(f, "json"),
            ExportFormat::Sequence => write!(f, "fasta"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "txt" | "list" => Ok(ExportFormat::List),
            "json" | "structured" => Ok(ExportFormat::Structured),
            "fasta" | "sequence" => Ok(ExportFormat::Sequence),
            _ => Err(ExportError::InvalidFormat(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ExportError;

    // Job ids end up in file names, so only a conservative character set is accepted.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed.len() <= 128
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
        if !is_valid {
            return Err(ExportError::InvalidRequest(format!("invalid job id: {value}")));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// A validated search URL together with the query text it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    url: Url,
    query: String,
}

impl SearchQuery {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

impl FromStr for SearchQuery {
    type Err = ExportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ExportError::InvalidRequest("empty search url".to_string()));
        }
        let url = Url::parse(trimmed)
            .map_err(|err| ExportError::InvalidRequest(format!("{trimmed}: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ExportError::InvalidRequest(format!(
                "search url must be http(s): {trimmed}"
            )));
        }
        let query = url
            .query_pairs()
            .find(|(key, _)| key == "query")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        Ok(Self { url, query })
    }
}
