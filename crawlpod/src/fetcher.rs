//! Fetcher loop — §4.11. Orchestration shape (fetch → check → redirect →
//! decode → politeness delay) follows the teacher's
//! `crawler::worker::{unpolite_crawl_url, polite_crawl_url}`
//! (`crates/core/src/crawler/worker.rs`), adapted to the spec's
//! domain-pop/`get_next_url`/`fetch`/record-visit step sequence instead of
//! the teacher's in-memory `Job`/`VecDeque<Url>` model.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::config::Config;
use crate::frontier::FrontierManager;
use crate::http;
use crate::kv::Pod;
use crate::politeness::Politeness;
use crate::queue::{encode_fetch_result, FetchResultBlob};
use crate::storage::{canonical_url, record_visit, save_text, VisitStatus, VisitedRecord};

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct FetcherContext {
    pub pod: Pod,
    pub frontier: Arc<FrontierManager>,
    pub politeness: Arc<Politeness>,
    pub client: reqwest::Client,
    pub parse_queue_soft_limit: u64,
    pub parse_queue_hard_limit: u64,
}

fn is_html(content_type: Option<&str>) -> bool {
    match content_type {
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml+xml")
        }
        None => false,
    }
}

/// One fetcher worker coroutine, run forever until `shutdown` fires. The
/// current step always runs to completion; shutdown is only observed at
/// the loop-iteration boundary, per spec §5's cancellation semantics.
pub async fn run_worker(ctx: Arc<FetcherContext>, shutdown: Arc<tokio::sync::Notify>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => return,
            found = try_step(&ctx) => {
                if found.is_none() {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
    }
}

async fn try_step(ctx: &FetcherContext) -> Option<()> {
    // Backpressure: pause pops from `domains:queue` while `fetch:queue` is
    // above the hard limit.
    let queue_len = ctx.pod.llen("fetch:queue").await.ok()?;
    if queue_len >= ctx.parse_queue_hard_limit {
        tokio::time::sleep(Duration::from_millis(250)).await;
        return Some(());
    }

    let Some((url, domain, depth)) = ctx.frontier.get_next_url().await.ok()? else {
        return None;
    };

    let Ok(parsed_url) = Url::parse(&url) else {
        return Some(());
    };

    if ctx
        .politeness
        .is_domain_excluded(&ctx.pod, &domain)
        .await
        .unwrap_or(false)
    {
        let _ = record_visit(
            &ctx.pod,
            &VisitedRecord {
                url: url.clone(),
                final_url: url.clone(),
                domain: domain.clone(),
                status_code: 0,
                status: VisitStatus::Excluded,
                crawled_timestamp: now_epoch(),
                content_type: None,
                content_hash: None,
                content_path: None,
                redirected_from: None,
            },
        )
        .await;
        metrics::counter!("crawlpod_urls_excluded_total").increment(1);
        return Some(());
    }

    if !ctx
        .politeness
        .is_allowed_by_robots(&ctx.pod, &parsed_url, &domain)
        .await
        .unwrap_or(false)
    {
        let _ = record_visit(
            &ctx.pod,
            &VisitedRecord {
                url: url.clone(),
                final_url: url.clone(),
                domain: domain.clone(),
                status_code: 0,
                status: VisitStatus::Disallowed,
                crawled_timestamp: now_epoch(),
                content_type: None,
                content_hash: None,
                content_path: None,
                redirected_from: None,
            },
        )
        .await;
        metrics::counter!("crawlpod_urls_disallowed_total").increment(1);
        return Some(());
    }

    let result = http::fetch(&ctx.client, &url).await;
    let _ = ctx.politeness.record_domain_fetch_attempt(&ctx.pod, &domain).await;

    if result.status_code == 0 {
        let _ = record_visit(
            &ctx.pod,
            &VisitedRecord {
                url: url.clone(),
                final_url: result.final_url.clone(),
                domain: domain.clone(),
                status_code: 0,
                status: VisitStatus::FetchError,
                crawled_timestamp: now_epoch(),
                content_type: result.content_type.clone(),
                content_hash: None,
                content_path: None,
                redirected_from: None,
            },
        )
        .await;
        metrics::counter!("crawlpod_fetch_errors_total").increment(1);
        return Some(());
    }

    // §7: "HTTP 4xx/5xx | Fetcher | Record visited with real status; no
    // parse." — never hand an error response's body to the parse queue,
    // regardless of its content-type.
    if result.status_code >= 400 {
        let _ = record_visit(
            &ctx.pod,
            &VisitedRecord {
                url: url.clone(),
                final_url: result.final_url.clone(),
                domain: domain.clone(),
                status_code: result.status_code,
                status: VisitStatus::HttpError,
                crawled_timestamp: now_epoch(),
                content_type: result.content_type.clone(),
                content_hash: None,
                content_path: None,
                redirected_from: None,
            },
        )
        .await;
        metrics::counter!("crawlpod_pages_crawled_total").increment(1);
        return Some(());
    }

    if !is_html(result.content_type.as_deref()) || result.text_content.as_deref() == Some("") {
        let _ = record_visit(
            &ctx.pod,
            &VisitedRecord {
                url: url.clone(),
                final_url: result.final_url.clone(),
                domain: domain.clone(),
                status_code: result.status_code,
                status: VisitStatus::Success,
                crawled_timestamp: now_epoch(),
                content_type: result.content_type.clone(),
                content_hash: None,
                content_path: None,
                redirected_from: None,
            },
        )
        .await;
        metrics::counter!("crawlpod_pages_crawled_total").increment(1);
        return Some(());
    }

    if queue_len >= ctx.parse_queue_soft_limit {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let blob = FetchResultBlob {
        url: canonical_url(&result.final_url).unwrap_or_else(|| result.final_url.clone()),
        domain: domain.to_string(),
        depth,
        content_bytes: None,
        text_content: result.text_content.clone(),
        content_type: result.content_type.clone(),
        crawled_timestamp: now_epoch(),
        status_code: result.status_code,
        is_redirect: result.is_redirect,
        initial_url: result.initial_url.clone(),
    };

    if let Ok(encoded) = encode_fetch_result(&blob) {
        let _ = ctx.pod.rpush_bytes("fetch:queue", &encoded).await;
    }

    metrics::counter!("crawlpod_pages_crawled_total").increment(1);
    Some(())
}

pub async fn run(ctx: Arc<FetcherContext>, worker_count: usize, shutdown: Arc<tokio::sync::Notify>) {
    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(run_worker(ctx, shutdown)));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

pub fn client_for(config: &Config) -> crate::error::Result<reqwest::Client> {
    http::build_client(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_html_matches_html_and_xhtml() {
        assert!(is_html(Some("text/html; charset=utf-8")));
        assert!(is_html(Some("application/xhtml+xml")));
        assert!(!is_html(Some("image/png")));
        assert!(!is_html(None));
    }
}
