//! Crawl configuration, loaded from a YAML file and overridable from the
//! CLI. Field names follow the configuration object described for external
//! collaborators: a CLI/YAML loader is out of this crate's core scope, but
//! the shape it must produce is owned here.

pub mod defaults;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PodConfig {
    pub pod_id: usize,
    pub kv_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub pod_count: usize,
    pub fetchers_per_pod: usize,
    pub parsers_per_pod: usize,

    #[serde(default = "defaults::Crawler::fetcher_workers")]
    pub fetcher_workers: usize,
    #[serde(default = "defaults::Crawler::parser_workers")]
    pub parser_workers: usize,

    pub data_dirs: Vec<PathBuf>,
    pub log_dir: PathBuf,
    pub seed_file: PathBuf,
    pub email: String,

    pub max_pages: Option<u64>,
    pub max_duration_seconds: Option<u64>,

    #[serde(default = "defaults::Crawler::max_depth")]
    pub max_depth: u32,

    #[serde(default = "defaults::Crawler::politeness_delay_seconds")]
    pub politeness_delay_seconds: u64,
    #[serde(default = "defaults::Crawler::robots_cache_ttl_seconds")]
    pub robots_cache_ttl_seconds: u64,
    #[serde(default = "defaults::Crawler::robots_error_cache_ttl_seconds")]
    pub robots_error_cache_ttl_seconds: u64,

    #[serde(default = "defaults::Crawler::bloom_capacity")]
    pub bloom_capacity: u64,
    #[serde(default = "defaults::Crawler::bloom_error_rate")]
    pub bloom_error_rate: f64,

    #[serde(default = "defaults::Crawler::parse_queue_soft_limit")]
    pub parse_queue_soft_limit: u64,
    #[serde(default = "defaults::Crawler::parse_queue_hard_limit")]
    pub parse_queue_hard_limit: u64,

    #[serde(default = "defaults::Crawler::enable_cpu_affinity")]
    pub enable_cpu_affinity: bool,

    pub pod_configs: Vec<PodConfig>,

    #[serde(default = "defaults::Crawler::prometheus_port")]
    pub prometheus_port: u16,
    #[serde(default = "defaults::Crawler::user_agent_template")]
    pub user_agent_template: String,

    pub exclude_file: Option<PathBuf>,

    #[serde(default = "defaults::Crawler::resume")]
    pub resume: bool,

    #[serde(default = "defaults::Crawler::timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "defaults::Crawler::connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "defaults::Crawler::dns_cache_ttl_seconds")]
    pub dns_cache_ttl_seconds: u64,
    #[serde(default = "defaults::Crawler::idle_connection_timeout_seconds")]
    pub idle_connection_timeout_seconds: u64,
    #[serde(default = "defaults::Crawler::max_connections_per_host")]
    pub max_connections_per_host: usize,
    #[serde(default = "defaults::Crawler::robots_fetch_timeout_seconds")]
    pub robots_fetch_timeout_seconds: u64,

    #[serde(default = "defaults::Crawler::write_lock_backoff_base_ms")]
    pub write_lock_backoff_base_ms: u64,
    #[serde(default = "defaults::Crawler::write_lock_backoff_max_ms")]
    pub write_lock_backoff_max_ms: u64,
    #[serde(default = "defaults::Crawler::write_lock_deadline_seconds")]
    pub write_lock_deadline_seconds: u64,

    #[serde(default = "defaults::Crawler::frontier_read_attempts")]
    pub frontier_read_attempts: usize,
    #[serde(default = "defaults::Crawler::parse_queue_blpop_timeout_seconds")]
    pub parse_queue_blpop_timeout_seconds: u64,
    #[serde(default = "defaults::Crawler::shutdown_join_timeout_seconds")]
    pub shutdown_join_timeout_seconds: u64,

    /// Path this config was loaded from, so the orchestrator can pass it
    /// verbatim to re-spawned child processes. Not part of the on-disk
    /// YAML; populated by `load`.
    #[serde(skip, default)]
    pub self_path: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| Error::InvalidConfig(format!("{path:?}: {e}")))?;
        config.validate()?;
        config.self_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn cores_per_pod(&self) -> usize {
        self.fetchers_per_pod + self.parsers_per_pod
    }

    pub fn user_agent(&self) -> String {
        self.user_agent_template.replace("{email}", &self.email)
    }

    pub fn kv_url_for_pod(&self, pod_id: usize) -> Option<&str> {
        self.pod_configs
            .iter()
            .find(|p| p.pod_id == pod_id)
            .map(|p| p.kv_url.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.pod_count == 0 {
            return Err(Error::InvalidConfig("pod_count must be > 0".into()));
        }
        if self.data_dirs.is_empty() {
            return Err(Error::InvalidConfig("data_dirs must be non-empty".into()));
        }
        if self.pod_configs.len() != self.pod_count {
            return Err(Error::InvalidConfig(
                "pod_configs must have one entry per pod_count".into(),
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            pod_count: 1,
            fetchers_per_pod: 1,
            parsers_per_pod: 1,
            fetcher_workers: 4,
            parser_workers: 2,
            data_dirs: vec![PathBuf::from("/tmp/crawlpod-test/data")],
            log_dir: PathBuf::from("/tmp/crawlpod-test/logs"),
            seed_file: PathBuf::from("/tmp/crawlpod-test/seeds.txt"),
            email: "test@example.com".to_string(),
            max_pages: Some(10),
            max_duration_seconds: None,
            max_depth: defaults::Crawler::max_depth(),
            politeness_delay_seconds: 1,
            robots_cache_ttl_seconds: defaults::Crawler::robots_cache_ttl_seconds(),
            robots_error_cache_ttl_seconds: defaults::Crawler::robots_error_cache_ttl_seconds(),
            bloom_capacity: 1_000_000,
            bloom_error_rate: 0.01,
            parse_queue_soft_limit: defaults::Crawler::parse_queue_soft_limit(),
            parse_queue_hard_limit: defaults::Crawler::parse_queue_hard_limit(),
            enable_cpu_affinity: false,
            pod_configs: vec![PodConfig {
                pod_id: 0,
                kv_url: "redis://127.0.0.1/".to_string(),
            }],
            prometheus_port: defaults::Crawler::prometheus_port(),
            user_agent_template: defaults::Crawler::user_agent_template(),
            exclude_file: None,
            resume: false,
            timeout_seconds: defaults::Crawler::timeout_seconds(),
            connect_timeout_seconds: defaults::Crawler::connect_timeout_seconds(),
            dns_cache_ttl_seconds: defaults::Crawler::dns_cache_ttl_seconds(),
            idle_connection_timeout_seconds: defaults::Crawler::idle_connection_timeout_seconds(),
            max_connections_per_host: defaults::Crawler::max_connections_per_host(),
            robots_fetch_timeout_seconds: defaults::Crawler::robots_fetch_timeout_seconds(),
            write_lock_backoff_base_ms: defaults::Crawler::write_lock_backoff_base_ms(),
            write_lock_backoff_max_ms: defaults::Crawler::write_lock_backoff_max_ms(),
            write_lock_deadline_seconds: defaults::Crawler::write_lock_deadline_seconds(),
            frontier_read_attempts: defaults::Crawler::frontier_read_attempts(),
            parse_queue_blpop_timeout_seconds:
                defaults::Crawler::parse_queue_blpop_timeout_seconds(),
            shutdown_join_timeout_seconds: defaults::Crawler::shutdown_join_timeout_seconds(),
            self_path: None,
        }
    }
}
