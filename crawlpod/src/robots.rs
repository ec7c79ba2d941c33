//! Robots.txt acquisition, caching, and parsing — §4.5.
//!
//! Restructures the teacher's `crawler::robots_txt::RobotsTxtManager`
//! (`crates/core/src/crawler/robots_txt.rs`) around the KV pod store as the
//! shared cache, since multiple fetcher processes in a pod must see the
//! same cached robots.txt rather than each keeping its own in-process
//! `BTreeMap`. Parsing itself is delegated to the vendored `robotstxt`
//! crate, same as the teacher.

use std::time::Duration;

use url::Url;

use crate::domain::Domain;
use crate::kv::Pod;

pub struct RobotsManager {
    client: reqwest::Client,
    user_agent: String,
    cache_ttl_seconds: u64,
    error_cache_ttl_seconds: u64,
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl RobotsManager {
    pub fn new(
        user_agent: String,
        fetch_timeout_seconds: u64,
        cache_ttl_seconds: u64,
        error_cache_ttl_seconds: u64,
    ) -> crate::error::Result<Self> {
        let timeout = Duration::from_secs(fetch_timeout_seconds);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(true)
            .user_agent(&user_agent)
            .build()?;

        Ok(Self {
            client,
            user_agent,
            cache_ttl_seconds,
            error_cache_ttl_seconds,
        })
    }

    /// Fetches `https://{domain}/robots.txt`, falling back to `http://` on
    /// failure. This is the "trusted" fetch path referenced in spec §9: it
    /// never calls back into politeness, breaking the robots/politeness
    /// cycle.
    async fn fetch_body(&self, domain: &Domain) -> (String, u64) {
        for scheme in ["https", "http"] {
            let url = format!("{scheme}://{domain}/robots.txt");
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp.text().await.unwrap_or_default();
                    return (body, self.cache_ttl_seconds);
                }
                Ok(resp) if resp.status().is_client_error() => {
                    return (String::new(), self.cache_ttl_seconds);
                }
                _ => continue,
            }
        }
        (String::new(), self.error_cache_ttl_seconds)
    }

    /// Looks up the cached robots.txt for `domain`, refetching if absent or
    /// expired, and returns the parsed rule set for the configured
    /// user-agent.
    pub async fn get(&self, pod: &Pod, domain: &Domain) -> crate::error::Result<robotstxt::Robots> {
        let key = format!("domain:{domain}");
        let cached_body = pod.hget(&key, "robots_txt").await?;
        let cached_expires = pod.hget(&key, "robots_expires").await?;

        let now = now_epoch();
        let is_fresh = match (&cached_body, &cached_expires) {
            (Some(_), Some(expires)) => expires.parse::<i64>().map(|e| now < e).unwrap_or(false),
            _ => false,
        };

        let body = if is_fresh {
            cached_body.unwrap_or_default()
        } else {
            let (body, ttl) = self.fetch_body(domain).await;
            let expires = now + ttl as i64;
            pod.hset(&key, "robots_txt", &body).await?;
            pod.hset(&key, "robots_expires", &expires.to_string())
                .await?;
            body
        };

        Ok(robotstxt::Robots::parse(&self.user_agent, &body)
            .unwrap_or_else(|_| robotstxt::Robots::parse(&self.user_agent, "").unwrap()))
    }

    pub async fn is_allowed(&self, pod: &Pod, url: &Url, domain: &Domain) -> crate::error::Result<bool> {
        let robots = self.get(pod, domain).await?;
        Ok(robots.is_allowed(url))
    }

    pub async fn crawl_delay(&self, pod: &Pod, domain: &Domain) -> crate::error::Result<Option<Duration>> {
        let robots = self.get(pod, domain).await?;
        Ok(robots.crawl_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_disallow_rules() {
        let robots =
            robotstxt::Robots::parse("crawlpod", "User-agent: *\nDisallow: /private/").unwrap();
        let allowed = Url::parse("https://r.test/public/").unwrap();
        let disallowed = Url::parse("https://r.test/private/x").unwrap();
        assert!(robots.is_allowed(&allowed));
        assert!(!robots.is_allowed(&disallowed));
    }

    #[test]
    fn empty_body_allows_everything() {
        let robots = robotstxt::Robots::parse("crawlpod", "").unwrap();
        let url = Url::parse("https://r.test/anything").unwrap();
        assert!(robots.is_allowed(&url));
    }
}
