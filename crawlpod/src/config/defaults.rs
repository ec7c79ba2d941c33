//! Default values for optional `Config` fields, mirrored after the
//! `config::defaults::Crawler` associated-function pattern.

pub struct Crawler;

impl Crawler {
    pub fn fetcher_workers() -> usize {
        128
    }

    pub fn parser_workers() -> usize {
        16
    }

    pub fn max_depth() -> u32 {
        10
    }

    pub fn politeness_delay_seconds() -> u64 {
        5
    }

    pub fn robots_cache_ttl_seconds() -> u64 {
        3600
    }

    pub fn robots_error_cache_ttl_seconds() -> u64 {
        3600
    }

    pub fn bloom_capacity() -> u64 {
        10_000_000_000
    }

    pub fn bloom_error_rate() -> f64 {
        0.001
    }

    pub fn parse_queue_soft_limit() -> u64 {
        10_000
    }

    pub fn parse_queue_hard_limit() -> u64 {
        50_000
    }

    pub fn enable_cpu_affinity() -> bool {
        true
    }

    pub fn prometheus_port() -> u16 {
        9090
    }

    pub fn user_agent_template() -> String {
        "crawlpod/0.1 (+mailto:{email})".to_string()
    }

    pub fn resume() -> bool {
        false
    }

    pub fn timeout_seconds() -> u64 {
        30
    }

    pub fn connect_timeout_seconds() -> u64 {
        10
    }

    pub fn dns_cache_ttl_seconds() -> u64 {
        300
    }

    pub fn idle_connection_timeout_seconds() -> u64 {
        30
    }

    pub fn max_connections_per_host() -> usize {
        20
    }

    pub fn robots_fetch_timeout_seconds() -> u64 {
        10
    }

    pub fn write_lock_backoff_base_ms() -> u64 {
        100
    }

    pub fn write_lock_backoff_max_ms() -> u64 {
        2_000
    }

    pub fn write_lock_deadline_seconds() -> u64 {
        30
    }

    pub fn frontier_read_attempts() -> usize {
        8
    }

    pub fn parse_queue_blpop_timeout_seconds() -> u64 {
        5
    }

    pub fn shutdown_join_timeout_seconds() -> u64 {
        10
    }
}
