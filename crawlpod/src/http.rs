//! Pooled HTTPS fetcher — §4.8. Client-builder shape lifted from the
//! teacher's `crawler::robot_client::reqwest_client`
//! (`crates/core/src/crawler/robot_client.rs`), generalized to follow
//! redirects internally (this fetcher needs `final_url`, unlike the
//! teacher's robots-only client which disables redirects entirely) and to
//! decode bodies with the spec's explicit 4-step encoding cascade. The
//! teacher's own `encoded_body` helper (referenced from `worker.rs` and
//! `robots_txt.rs`) was not present anywhere in the retrieved pack, so
//! `decode_body` here is written directly against spec §4.8 rather than
//! copied from a file that doesn't exist in this corpus.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use mime::Mime;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub initial_url: String,
    pub final_url: String,
    /// 0 on network failure, matching spec §4.8's error taxonomy.
    pub status_code: u16,
    pub content_type: Option<String>,
    pub text_content: Option<String>,
    pub is_redirect: bool,
    pub error_message: Option<String>,
}

/// Caches a name's resolved addresses for up to `ttl`, satisfying spec
/// §4.8's "DNS cache TTL ≤ 300 s" — reqwest/hyper re-resolve on every
/// connection attempt otherwise. Same lazily-populated-per-key-map idiom as
/// `lock::ReadLockTable`, wrapping `tokio::net::lookup_host` instead of
/// pulling in a separate resolver crate for a plain TTL cap.
#[derive(Clone)]
struct CachingResolver {
    ttl: Duration,
    cache: Arc<DashMap<String, (Vec<SocketAddr>, Instant)>>,
}

impl CachingResolver {
    fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_seconds),
            cache: Arc::new(DashMap::new()),
        }
    }
}

impl Resolve for CachingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let this = self.clone();
        Box::pin(async move {
            let key = name.as_str().to_string();

            if let Some(entry) = this.cache.get(&key) {
                let (addrs, inserted_at) = entry.value();
                if inserted_at.elapsed() < this.ttl {
                    let addrs = addrs.clone();
                    return Ok(Box::new(addrs.into_iter()) as Addrs);
                }
            }

            let resolved: Vec<SocketAddr> = tokio::net::lookup_host((key.as_str(), 0))
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?
                .collect();

            this.cache.insert(key, (resolved.clone(), Instant::now()));
            Ok(Box::new(resolved.into_iter()) as Addrs)
        })
    }
}

pub fn build_client(config: &Config) -> crate::error::Result<reqwest::Client> {
    let timeout = Duration::from_secs(config.timeout_seconds);
    let connect_timeout = Duration::from_secs(config.connect_timeout_seconds);
    let resolver = Arc::new(CachingResolver::new(config.dns_cache_ttl_seconds));

    let mut headers = reqwest::header::HeaderMap::default();
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static("text/html,application/xhtml+xml"),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        reqwest::header::HeaderValue::from_static("en-US,en;q=0.9,*;q=0.8"),
    );

    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(config.max_connections_per_host)
        .pool_idle_timeout(Duration::from_secs(config.idle_connection_timeout_seconds))
        .http2_keep_alive_interval(None)
        .dns_resolver(resolver)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .danger_accept_invalid_certs(true)
        .user_agent(config.user_agent())
        .build()?)
}

fn error_result(initial_url: &str, message: impl Into<String>) -> FetchResult {
    FetchResult {
        initial_url: initial_url.to_string(),
        final_url: initial_url.to_string(),
        status_code: 0,
        content_type: None,
        text_content: None,
        is_redirect: false,
        error_message: Some(message.into()),
    }
}

pub async fn fetch(client: &reqwest::Client, url: &str) -> FetchResult {
    let response = match client.get(url).send().await {
        Ok(resp) => resp,
        Err(e) => {
            let tag = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connection_error"
            } else if e.is_redirect() {
                "too_many_redirects"
            } else {
                "invalid_response"
            };
            return error_result(url, format!("{tag}: {e}"));
        }
    };

    let final_url = response.url().to_string();
    let is_redirect = final_url != url;
    let status_code = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let bytes = match response.bytes().await {
        Ok(b) => b,
        Err(e) => return error_result(url, format!("invalid_response: {e}")),
    };

    let text_content = decode_body(&bytes, content_type.as_deref());

    FetchResult {
        initial_url: url.to_string(),
        final_url,
        status_code,
        content_type,
        text_content,
        is_redirect,
        error_message: None,
    }
}

/// Four-step encoding detection cascade: (1) charset in `Content-Type`, (2)
/// `<meta charset>`/`<meta http-equiv>` in the first 1 KiB, (3) heuristic
/// detection via `chardetng`, (4) utf-8 with replacement.
fn decode_body(bytes: &[u8], content_type: Option<&str>) -> Option<String> {
    if bytes.is_empty() {
        return Some(String::new());
    }

    if let Some(encoding) = content_type
        .and_then(|ct| ct.parse::<Mime>().ok())
        .and_then(|mime| {
            mime.get_param("charset")
                .map(|charset| charset.as_str().to_string())
        })
        .and_then(|charset| encoding_rs::Encoding::for_label(charset.as_bytes()))
    {
        let (decoded, _, _) = encoding.decode(bytes);
        return Some(decoded.into_owned());
    }

    let head = &bytes[..bytes.len().min(1024)];
    if let Some(encoding) = sniff_meta_charset(head) {
        let (decoded, _, _) = encoding.decode(bytes);
        return Some(decoded.into_owned());
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let guessed = detector.guess(None, true);
    let (decoded, _, had_errors) = guessed.decode(bytes);
    if !had_errors {
        return Some(decoded.into_owned());
    }

    let (decoded, _, _) = encoding_rs::UTF_8.decode(bytes);
    Some(decoded.into_owned())
}

fn sniff_meta_charset(head: &[u8]) -> Option<&'static encoding_rs::Encoding> {
    let text = String::from_utf8_lossy(head);
    let lower = text.to_lowercase();

    if let Some(pos) = lower.find("charset=") {
        let rest = &text[pos + "charset=".len()..];
        let charset: String = rest
            .chars()
            .take_while(|c| !matches!(c, '"' | '\'' | ';' | '>' | ' '))
            .collect();
        return encoding_rs::Encoding::for_label(charset.trim().as_bytes());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn decode_body_uses_content_type_charset() {
        let bytes = "hello".as_bytes();
        let decoded = decode_body(bytes, Some("text/html; charset=utf-8")).unwrap();
        assert_eq!(decoded, "hello");
    }

    #[test]
    fn decode_body_sniffs_meta_charset() {
        let html = b"<html><head><meta charset=\"utf-8\"></head><body>hi</body></html>";
        let decoded = decode_body(html, None).unwrap();
        assert!(decoded.contains("hi"));
    }

    #[test]
    fn decode_body_falls_back_to_utf8_replacement() {
        let bytes = vec![0x68, 0x69, 0xff, 0xfe];
        let decoded = decode_body(&bytes, None).unwrap();
        assert!(decoded.starts_with("hi"));
    }

    #[test]
    fn decode_body_empty_returns_empty_string() {
        assert_eq!(decode_body(&[], None), Some(String::new()));
    }

    #[tokio::test]
    async fn caching_resolver_reuses_entry_within_ttl() {
        let resolver = CachingResolver::new(300);
        let name = Name::from_str("127.0.0.1").unwrap();

        let first: Vec<SocketAddr> = resolver.resolve(name.clone()).await.unwrap().collect();
        assert!(resolver.cache.contains_key("127.0.0.1"));

        let second: Vec<SocketAddr> = resolver.resolve(name).await.unwrap().collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn caching_resolver_refetches_after_ttl_elapses() {
        let resolver = CachingResolver::new(0);
        let name = Name::from_str("127.0.0.1").unwrap();

        let _: Vec<SocketAddr> = resolver.resolve(name.clone()).await.unwrap().collect();
        let (_, inserted_at) = resolver.cache.get("127.0.0.1").unwrap().value().clone();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let _: Vec<SocketAddr> = resolver.resolve(name).await.unwrap().collect();
        let (_, refreshed_at) = resolver.cache.get("127.0.0.1").unwrap().value().clone();
        assert!(refreshed_at > inserted_at, "a zero-second ttl must never be served stale");
    }
}
