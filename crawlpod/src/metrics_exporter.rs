//! Multi-process metrics aggregation — §6/§4.13. Every process (the
//! orchestrator's embedded fetcher 0 included) installs its own
//! `metrics`-facade recorder backed by a small per-process Prometheus
//! HTTP listener; the orchestrator then aggregates the counters it needs
//! for stopping conditions by scraping each child's listener directly,
//! since it already knows every child's address (it spawned them).
//!
//! This stands in for spec §6's literal "shared writable directory,
//! workers append, an aggregator reads the union" scheme with the
//! ecosystem-idiomatic mechanism the rest of this pack reaches for
//! (`metrics` + `metrics-exporter-prometheus`) rather than a hand-rolled
//! file format — see DESIGN.md's Open Question resolution.

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::Result;

/// Installs the global `metrics` recorder for the current process, bound
/// to `port` on loopback. Must be called exactly once per process, before
/// the first `metrics::counter!`/`histogram!` call.
pub fn install(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([127, 0, 0, 1], port))
        .install()
        .map_err(|e| crate::error::Error::InvalidConfig(format!("metrics exporter: {e}")))?;
    Ok(())
}

/// Scrapes one process's `/metrics` endpoint and sums the value of every
/// exposition line whose metric name matches `name` (Prometheus text
/// format, `name{labels} value` or `name value`; counters in this crate
/// carry no labels, so a whole-line prefix match is sufficient).
pub async fn scrape_counter(client: &reqwest::Client, port: u16, name: &str) -> Option<f64> {
    let url = format!("http://127.0.0.1:{port}/metrics");
    let body = client.get(&url).send().await.ok()?.text().await.ok()?;
    parse_counter(&body, name)
}

fn parse_counter(body: &str, name: &str) -> Option<f64> {
    let mut total = None;
    for line in body.lines() {
        if line.starts_with('#') {
            continue;
        }
        let Some(rest) = line.strip_prefix(name) else {
            continue;
        };
        if !rest.starts_with(' ') && !rest.starts_with('{') {
            continue;
        }
        let Some(value_str) = rest.rsplit(' ').next() else {
            continue;
        };
        if let Ok(value) = value_str.parse::<f64>() {
            *total.get_or_insert(0.0) += value;
        }
    }
    total
}

/// Sums `metric` across every `(host, port)` listener in `endpoints`,
/// treating an unreachable endpoint (process not yet up, or already
/// exited) as contributing zero rather than failing the whole poll.
pub async fn aggregate(client: &reqwest::Client, endpoints: &[u16], metric: &str) -> f64 {
    let mut total = 0.0;
    for &port in endpoints {
        if let Some(value) = scrape_counter(client, port, metric).await {
            total += value;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_counter_line() {
        let body = "# HELP x\n# TYPE x counter\ncrawlpod_pages_crawled_total 42\n";
        assert_eq!(parse_counter(body, "crawlpod_pages_crawled_total"), Some(42.0));
    }

    #[test]
    fn ignores_unrelated_metrics_with_shared_prefix() {
        let body = "crawlpod_pages_crawled_total 5\ncrawlpod_pages_crawled_total_errors 99\n";
        assert_eq!(parse_counter(body, "crawlpod_pages_crawled_total"), Some(5.0));
    }

    #[test]
    fn missing_metric_returns_none() {
        let body = "crawlpod_fetch_errors_total 3\n";
        assert_eq!(parse_counter(body, "crawlpod_pages_crawled_total"), None);
    }
}
