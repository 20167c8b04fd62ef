use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::DEFAULT_KEYWORD_COLUMN;
use crate::error::ArpError;
use crate::orchestrator::{
    BulkOptions, DEFAULT_CONCURRENCY, DEFAULT_PAGE_SIZE, LARGE_RESULT_THRESHOLD,
};
use crate::suggest::DEFAULT_DEBOUNCE;

pub const DEFAULT_CONFIG_FILE: &str = "arp.json";
pub const DEFAULT_API_BASE_URL: &str = "https://contratos.sistema.gov.br";
pub const DEFAULT_LOOKUP_BASE_URL: &str = "https://cnbs.estaleiro.serpro.gov.br";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const API_BASE_URL_ENV: &str = "ARP_API_BASE_URL";
pub const LOOKUP_BASE_URL_ENV: &str = "ARP_LOOKUP_BASE_URL";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub lookup_base_url: Option<String>,
    #[serde(default)]
    pub keyword_column: Option<String>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub large_result_threshold: Option<u64>,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub cache_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub api_base_url: String,
    pub lookup_base_url: String,
    pub keyword_column: String,
    pub bulk: BulkOptions,
    pub debounce: Duration,
    pub timeout: Duration,
    pub cache_dir: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `arp.json` in the working directory when no path is
    /// given. A missing default file resolves to defaults; a missing
    /// explicit file is an error.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ArpError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| ArpError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| ArpError::ConfigParse(err.to_string()))?
        };

        let mut resolved = Self::resolve_config(config)?;
        if let Some(url) = env_override(API_BASE_URL_ENV) {
            resolved.api_base_url = url;
        }
        if let Some(url) = env_override(LOOKUP_BASE_URL_ENV) {
            resolved.lookup_base_url = url;
        }
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ArpError> {
        let page_size = config.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(ArpError::ConfigParse("page_size must be positive".to_string()));
        }
        let concurrency = config.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(ArpError::ConfigParse("concurrency must be positive".to_string()));
        }

        Ok(ResolvedConfig {
            api_base_url: config
                .api_base_url
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            lookup_base_url: config
                .lookup_base_url
                .unwrap_or_else(|| DEFAULT_LOOKUP_BASE_URL.to_string()),
            keyword_column: config
                .keyword_column
                .filter(|column| !column.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_KEYWORD_COLUMN.to_string()),
            bulk: BulkOptions {
                page_size,
                concurrency,
                large_result_threshold: config
                    .large_result_threshold
                    .unwrap_or(LARGE_RESULT_THRESHOLD),
            },
            debounce: config
                .debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DEBOUNCE),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            cache_dir: config.cache_dir.map(Utf8PathBuf::from),
        })
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
