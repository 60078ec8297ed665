//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use nftline_core::{HttpSettings, RetryPolicy};
use nftline_ingest::{Chain, DensityPolicy, FrontierPolicy, SchedulerConfig};
use nftline_queue::Dataset;
use serde::Deserialize;

/// Global configuration for nftline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub scheduler: SchedulerSection,
    pub queue: QueueConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub chain: String,
    /// Overrides the chain's public endpoint
    pub base_url: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    /// Sent as `x-system` with every request
    pub system_id: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            chain: "mainnet".to_string(),
            base_url: None,
            api_key: std::env::var("RESERVOIR_API_KEY").ok(),
            system_id: "nftline".to_string(),
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
        }
    }
}

impl ApiConfig {
    pub fn base_url(&self) -> Result<String> {
        if let Some(url) = &self.base_url {
            return Ok(url.clone());
        }
        let chain = Chain::from_name(&self.chain)
            .with_context(|| format!("unknown chain {:?}", self.chain))?;
        Ok(chain.base_url().to_string())
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..HttpSettings::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub dataset: String,
    pub contract: Option<String>,
    pub workers: usize,
    pub upkeepers: usize,
    pub max_records_per_block: u64,
    pub min_split_secs: i64,
    pub rate_limit_delay_ms: u64,
    pub error_delay_ms: u64,
    /// Pause before re-sending a request that got no response
    pub transport_retry_ms: u64,
    pub probe_attempts: u32,
    pub frontier: String,
    pub backup_interval_secs: u64,
    pub use_backup: bool,
    /// Keep running after catching up, polling for re-seeded blocks
    pub follow_poll_secs: Option<u64>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        let scheduler = SchedulerConfig::new(Dataset::Sales);
        Self {
            dataset: Dataset::Sales.as_str().to_string(),
            contract: None,
            workers: scheduler.workers,
            upkeepers: scheduler.upkeepers,
            max_records_per_block: scheduler.density.max_records_per_block,
            min_split_secs: scheduler.density.min_split.num_seconds(),
            rate_limit_delay_ms: scheduler.retry.rate_limit_delay.as_millis() as u64,
            error_delay_ms: scheduler.retry.error_delay.as_millis() as u64,
            transport_retry_ms: nftline_ingest::api::DEFAULT_TRANSPORT_PAUSE.as_millis() as u64,
            probe_attempts: scheduler.probe_attempts,
            frontier: scheduler.frontier.as_str().to_string(),
            backup_interval_secs: scheduler.backup_interval.as_secs(),
            use_backup: scheduler.use_backup,
            follow_poll_secs: None,
        }
    }
}

impl SchedulerSection {
    pub fn dataset(&self) -> Result<Dataset> {
        parse_dataset(&self.dataset).map_err(anyhow::Error::msg)
    }

    /// Scheduler settings for `dataset`
    pub fn to_scheduler(&self, dataset: Dataset) -> Result<SchedulerConfig> {
        let frontier = FrontierPolicy::from_name(&self.frontier)
            .with_context(|| format!("unknown frontier policy {:?}", self.frontier))?;
        Ok(SchedulerConfig {
            dataset,
            contract: self.contract.clone(),
            workers: self.workers,
            upkeepers: self.upkeepers,
            density: DensityPolicy {
                max_records_per_block: self.max_records_per_block,
                min_split: TimeDelta::seconds(self.min_split_secs),
            },
            retry: RetryPolicy {
                rate_limit_delay: Duration::from_millis(self.rate_limit_delay_ms),
                error_delay: Duration::from_millis(self.error_delay_ms),
            },
            frontier,
            probe_attempts: self.probe_attempts,
            backup_interval: Duration::from_secs(self.backup_interval_secs),
            use_backup: self.use_backup,
            follow_poll: self.follow_poll_secs.map(Duration::from_secs),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub dir: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./queue"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
        }
    }
}

/// Clap value parser for dataset names
pub fn parse_dataset(s: &str) -> Result<Dataset, String> {
    Dataset::from_name(s).ok_or_else(|| format!("unknown dataset {s:?} (sales, asks, bids)"))
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./nftline.toml (current directory)
    /// 2. ~/.config/nftline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("nftline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "nftline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.queue.dir, PathBuf::from("./queue"));
        assert_eq!(config.output.dir, PathBuf::from("./data"));
        assert_eq!(config.scheduler.dataset().unwrap(), Dataset::Sales);
        assert_eq!(config.scheduler.rate_limit_delay_ms, 5_000);
        assert_eq!(config.scheduler.error_delay_ms, 0);
        assert_eq!(
            config.api.base_url().unwrap(),
            "https://api.reservoir.tools"
        );
    }

    #[test]
    fn defaults_round_trip_to_scheduler() {
        let section = SchedulerSection::default();
        let scheduler = section.to_scheduler(Dataset::Bids).unwrap();
        assert_eq!(scheduler.dataset, Dataset::Bids);
        assert_eq!(scheduler.density, DensityPolicy::default());
        assert_eq!(scheduler.frontier, FrontierPolicy::Drain);
        assert!(scheduler.validate().is_ok());
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("NFTLINE_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${NFTLINE_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("NFTLINE_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[api]
chain = "polygon"
api_key = "k-123"

[scheduler]
dataset = "asks"
contract = "0xabc"
workers = 8
max_records_per_block = 5000
frontier = "release"
follow_poll_secs = 60

[queue]
dir = "/var/lib/nftline/queue"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.api.base_url().unwrap(),
            "https://api-polygon.reservoir.tools"
        );
        assert_eq!(config.api.api_key.as_deref(), Some("k-123"));
        assert_eq!(config.queue.dir, PathBuf::from("/var/lib/nftline/queue"));
        // Unset keys keep their defaults
        assert_eq!(config.scheduler.probe_attempts, 5);

        let scheduler = config
            .scheduler
            .to_scheduler(config.scheduler.dataset().unwrap())
            .unwrap();
        assert_eq!(scheduler.dataset, Dataset::Asks);
        assert_eq!(scheduler.contract(), Some("0xabc"));
        assert_eq!(scheduler.workers, 8);
        assert_eq!(scheduler.density.max_records_per_block, 5000);
        assert_eq!(scheduler.frontier, FrontierPolicy::Release);
        assert_eq!(scheduler.follow_poll, Some(Duration::from_secs(60)));
    }

    #[test]
    fn rejects_unknown_names() {
        let config: Config = toml::from_str("[api]\nchain = \"solana\"\n").unwrap();
        assert!(config.api.base_url().is_err());

        let config: Config = toml::from_str("[scheduler]\nfrontier = \"skip\"\n").unwrap();
        assert!(config.scheduler.to_scheduler(Dataset::Sales).is_err());

        assert!(parse_dataset("transfers").is_err());
        assert_eq!(parse_dataset("BIDS"), Ok(Dataset::Bids));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nftline.toml");
        std::fs::write(&path, "[output]\ndir = \"/tmp/nft\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.output.dir, PathBuf::from("/tmp/nft"));
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
