use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Partition, SourceMode};
use crate::error::ScryerError;

pub const DEFAULT_CONFIG_FILE: &str = "mgscryer.json";
pub const PAGE_SIZE: usize = 100_000;
pub const REQUEST_DELAY_MS: u64 = 100;
pub const PORTAL_URL: &str = "https://www.ebi.ac.uk/ena/portal/api/";
pub const BROWSER_URL: &str = "https://www.ebi.ac.uk/ena/browser/api/";

pub const DEFAULT_PARTITIONS: [(u32, &str); 4] = [
    (256318, "metagenomics"),
    (9606, "human"),
    (33208, "animal"),
    (33090, "green plants"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub partitions: Vec<Partition>,
    pub page_size: usize,
    pub request_delay: Duration,
    pub portal_url: String,
    pub browser_url: String,
    pub mode: SourceMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS
                .iter()
                .map(|(tax_id, label)| Partition::new(*tax_id, label))
                .collect(),
            page_size: PAGE_SIZE,
            request_delay: Duration::from_millis(REQUEST_DELAY_MS),
            portal_url: PORTAL_URL.to_string(),
            browser_url: BROWSER_URL.to_string(),
            mode: SourceMode::Flat,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub portal_url: Option<String>,
    #[serde(default)]
    pub browser_url: Option<String>,
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
    #[serde(default)]
    pub mode: Option<SourceMode>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<SyncConfig, ScryerError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(SyncConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ScryerError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ScryerError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<SyncConfig, ScryerError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(ScryerError::UnsupportedSchema(schema_version));
        }

        let defaults = SyncConfig::default();
        Ok(SyncConfig {
            portal_url: base_url(config.portal_url, defaults.portal_url)?,
            browser_url: base_url(config.browser_url, defaults.browser_url)?,
            request_delay: config
                .request_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_delay),
            mode: config.mode.unwrap_or(defaults.mode),
            ..defaults
        })
    }
}

fn base_url(value: Option<String>, default: String) -> Result<String, ScryerError> {
    let Some(value) = value else {
        return Ok(default);
    };
    let value = value.trim();
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ScryerError::ConfigParse(format!(
            "endpoint must be an http(s) URL: {value}"
        )));
    }
    if value.ends_with('/') {
        Ok(value.to_string())
    } else {
        Ok(format!("{value}/"))
    }
}
