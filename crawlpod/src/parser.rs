//! Parser loop — §4.12. Consumes `fetch:queue`, extracts text and links,
//! shards discovered links by domain hash, and records the visited entry.

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::domain::Domain;
use crate::frontier::FrontierManager;
use crate::html::{extract_links, extract_text};
use crate::kv::Pod;
use crate::queue::decode_fetch_result;
use crate::storage::{content_hash, record_visit, save_text, VisitStatus, VisitedRecord};

pub struct ParserContext {
    pub pod: Pod,
    pub frontier: Arc<FrontierManager>,
    pub data_dirs: Vec<std::path::PathBuf>,
    pub blpop_timeout_seconds: f64,
}

async fn process_one(ctx: &ParserContext, bytes: &[u8]) {
    let blob = match decode_fetch_result(bytes) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to decode fetch-queue blob");
            return;
        }
    };

    let Ok(final_url) = Url::parse(&blob.url) else {
        return;
    };

    let html = blob.text_content.unwrap_or_default();
    let text = extract_text(&html);
    let links = extract_links(&html, &final_url);

    let mut content_path = None;
    let mut hash = None;
    if !text.is_empty() {
        hash = Some(content_hash(&text));
        content_path = save_text(&ctx.data_dirs, &blob.url, &text).await;
    }

    // `add_urls_batch` already shards by domain hash, forwarding anything
    // not owned by this pod to the target pod's `ingress:urls` (§4.12 step 5).
    let discovered: Vec<(String, u32)> = links.iter().map(|l| (l.clone(), blob.depth + 1)).collect();
    if let Err(e) = ctx.frontier.add_urls_batch(&discovered).await {
        tracing::error!(error = %e, "failed to route discovered urls");
    }

    let domain = Domain::from(blob.domain.clone());
    let _ = record_visit(
        &ctx.pod,
        &VisitedRecord {
            url: blob.initial_url.clone(),
            final_url: blob.url.clone(),
            domain,
            status_code: blob.status_code,
            status: if blob.status_code >= 400 {
                VisitStatus::HttpError
            } else {
                VisitStatus::Success
            },
            crawled_timestamp: blob.crawled_timestamp,
            content_type: blob.content_type.clone(),
            content_hash: hash,
            content_path,
            redirected_from: if blob.is_redirect {
                Some(blob.initial_url.clone())
            } else {
                None
            },
        },
    )
    .await;

    metrics::counter!("crawlpod_pages_parsed_total").increment(1);
    metrics::counter!("crawlpod_urls_discovered_total").increment(links.len() as u64);
}

pub async fn run_worker(ctx: Arc<ParserContext>, shutdown: Arc<tokio::sync::Notify>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => return,
            popped = ctx.pod.blpop_bytes("fetch:queue", ctx.blpop_timeout_seconds) => {
                match popped {
                    Ok(Some((_, bytes))) => process_one(&ctx, &bytes).await,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "fetch:queue BLPOP failed");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }
}

pub async fn run(ctx: Arc<ParserContext>, worker_count: usize, shutdown: Arc<tokio::sync::Notify>) {
    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        handles.push(tokio::spawn(run_worker(ctx.clone(), shutdown.clone())));
    }
    for handle in handles {
        let _ = handle.await;
    }
}
