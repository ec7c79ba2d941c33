//! Integration coverage for the numbered end-to-end scenarios in spec §8.
//!
//! Every test here needs a real, reachable Redis (with the RedisBloom
//! module loaded, for `seen:bloom`'s `BF.*` commands) at
//! `redis://127.0.0.1`, matching the teacher's own convention of gating
//! slow/external tests behind `#[ignore]` rather than mocking the
//! datastore. Run with `cargo test -- --ignored` against a local
//! `redis-stack-server` (or `redis-server` + `redisbloom.so` loaded).
//!
//! Fake domains are routed to an in-process `wiremock` server via
//! `reqwest::ClientBuilder::resolve`, so `extract_domain`/robots/frontier
//! sharding all see real-looking registered domains while every request
//! actually lands on the local mock.

use std::net::SocketAddr;
use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crawlpod::config::Config;
use crawlpod::domain::Domain;
use crawlpod::fetcher::{self, FetcherContext};
use crawlpod::frontier::FrontierManager;
use crawlpod::kv::bloom::SeenBloom;
use crawlpod::kv::Pod;
use crawlpod::lock::WriteLock;
use crawlpod::politeness::Politeness;
use crawlpod::robots::RobotsManager;

async fn pod_on_db(db: u8) -> Pod {
    let pod = Pod::connect(&format!("redis://127.0.0.1/{db}"))
        .await
        .expect("connect to local redis (is redis-stack-server running?)");
    let _: () = redis::cmd("FLUSHDB")
        .query_async(&mut pod.raw())
        .await
        .expect("flush test db");
    pod
}

/// Builds a `reqwest::Client` that resolves `fake_host` to the wiremock
/// server's loopback address, so real-looking domains (for `psl`/frontier
/// sharding) can be used without hitting the network.
/// `wiremock::MockServer` only ever speaks plain HTTP, so every test using
/// this client must address it with `http://`, not `https://`.
fn client_resolving(fake_host: &str, addr: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .resolve(fake_host, addr)
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap()
}

fn data_dirs(tag: &str) -> Vec<std::path::PathBuf> {
    vec![std::env::temp_dir().join(format!("crawlpod-e2e-{tag}-{}", std::process::id()))]
}

async fn frontier_for(pod_count: usize, self_pod_id: usize, pods: Vec<Pod>, tag: &str) -> FrontierManager {
    let bloom = SeenBloom::new("seen:bloom");
    bloom.reserve(&pods[self_pod_id], 1_000_000, 0.01).await.unwrap();
    let write_lock = WriteLock::new(100, 2_000, 30);
    FrontierManager::new(self_pod_id, pod_count, pods, &data_dirs(tag), 10, bloom, write_lock, 8)
}

/// Scenario 1: single-pod smoke. One seed, a 200 HTML response with two
/// links, `max_pages=1`. Expect a visited record, all three URLs in the
/// bloom filter, and exactly one content file once the fetch+parse round
/// trip completes.
#[tokio::test]
#[ignore = "requires a local redis-stack-server with RedisBloom loaded"]
async fn single_pod_smoke() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><a href="/a">x</a><a href="http://smoke.test/b">y</a></body></html>"#,
        ).insert_header("content-type", "text/html; charset=utf-8"))
        .mount(&server)
        .await;

    let addr: SocketAddr = server.address().to_owned();
    let client = client_resolving("smoke.test", addr);

    let pod = pod_on_db(1).await;
    let frontier = Arc::new(frontier_for(1, 0, vec![pod.clone()], "smoke").await);
    frontier.initialize(&["http://smoke.test/".to_string()], false).await.unwrap();

    let robots = RobotsManager::new("crawlpod".to_string(), 5, 3600, 3600).unwrap();
    let politeness = Arc::new(Politeness::new(robots, 0));

    let ctx = Arc::new(FetcherContext {
        pod: pod.clone(),
        frontier: frontier.clone(),
        politeness,
        client,
        parse_queue_soft_limit: 10_000,
        parse_queue_hard_limit: 50_000,
    });

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let worker_shutdown = shutdown.clone();
    let ctx_clone = ctx.clone();
    let worker = tokio::spawn(async move {
        fetcher::run_worker(ctx_clone, worker_shutdown).await;
    });
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    shutdown.notify_waiters();
    let _ = worker.await;

    // The seed should have been popped off `fetch:queue` by a parser in a
    // full deployment; here we drain it directly to assert the fetcher did
    // its job and produced something parseable.
    let queued = pod.llen("fetch:queue").await.unwrap();
    assert_eq!(queued, 1, "fetcher should have pushed the seed's html onto fetch:queue");

    let bloom = SeenBloom::new("seen:bloom");
    assert!(bloom.exists(&pod, "http://smoke.test/").await.unwrap());
}

/// Scenario 3: cross-pod routing. A two-pod frontier where a discovered
/// link hashes to the other pod must land on that pod's `ingress:urls`,
/// never directly in the local frontier.
#[tokio::test]
#[ignore = "requires a local redis-stack-server with RedisBloom loaded"]
async fn cross_pod_routing() {
    let pod0 = pod_on_db(2).await;
    let pod1 = pod_on_db(3).await;

    let domain_a = Domain::from("a.test");
    let domain_b = Domain::from("b.test");
    let pod_for_a = crawlpod::domain::pod_for_domain(&domain_a, 2);
    let pod_for_b = crawlpod::domain::pod_for_domain(&domain_b, 2);
    assert_ne!(pod_for_a, pod_for_b, "test fixture needs domains that hash to different pods");

    let pods = vec![pod0.clone(), pod1.clone()];
    let frontier_a = frontier_for(2, pod_for_a, pods.clone(), "cross-a").await;

    let added = frontier_a
        .add_urls_batch(&[("https://a.test/".to_string(), 0), ("https://b.test/".to_string(), 1)])
        .await
        .unwrap();
    assert_eq!(added, 1, "only the locally-owned domain should be appended here");

    let owning_pod = &pods[pod_for_b];
    let ingress_len = owning_pod.llen("ingress:urls").await.unwrap();
    assert_eq!(ingress_len, 1, "the other domain must be forwarded to its owning pod's ingress list");

    let other_pod = &pods[pod_for_a];
    assert_eq!(other_pod.llen("ingress:urls").await.unwrap(), 0);
}

/// Scenario 4: exclusion precedence. A seed whose domain is pre-excluded
/// is never added to the ready-queue's eligible set and never fetched.
#[tokio::test]
#[ignore = "requires a local redis-stack-server with RedisBloom loaded"]
async fn exclusion_precedence() {
    let pod = pod_on_db(4).await;
    pod.sadd("excluded:domains", "bad.test").await.unwrap();

    let frontier = frontier_for(1, 0, vec![pod.clone()], "excl").await;
    let added = frontier
        .add_urls_batch(&[("https://bad.test/".to_string(), 0)])
        .await
        .unwrap();
    assert_eq!(added, 0, "excluded domains must never be appended to the frontier");

    let queue_len = pod.llen("domains:queue").await.unwrap();
    assert_eq!(queue_len, 0);
}

/// Scenario 5: robots.txt disallow. `/private/` is disallowed; `/public/`
/// is not. Seeds the domain record's KV-cached `robots_txt`/`robots_expires`
/// directly (exercising the cache-read path of `RobotsManager::get`
/// without a real network fetch) and asserts `Politeness::is_url_allowed`
/// reflects the distinction for the same domain.
#[tokio::test]
#[ignore = "requires a local redis-stack-server with RedisBloom loaded"]
async fn robots_disallow() {
    let parsed = robotstxt::Robots::parse("crawlpod", "User-agent: *\nDisallow: /private/").unwrap();
    assert!(parsed.is_allowed(&url::Url::parse("https://r.test/public/").unwrap()));
    assert!(!parsed.is_allowed(&url::Url::parse("https://r.test/private/x").unwrap()));

    let pod = pod_on_db(5).await;
    let far_future = 9_999_999_999i64;
    pod.hset("domain:r.test", "robots_txt", "User-agent: *\nDisallow: /private/").await.unwrap();
    pod.hset("domain:r.test", "robots_expires", &far_future.to_string()).await.unwrap();

    let robots = RobotsManager::new("crawlpod".to_string(), 5, 3600, 3600).unwrap();
    let politeness = Politeness::new(robots, 1);
    let domain = Domain::from("r.test");

    let public_allowed = politeness
        .is_url_allowed(&pod, &url::Url::parse("https://r.test/public/").unwrap(), &domain)
        .await
        .unwrap();
    let private_allowed = politeness
        .is_url_allowed(&pod, &url::Url::parse("https://r.test/private/x").unwrap(), &domain)
        .await
        .unwrap();

    assert!(public_allowed);
    assert!(!private_allowed);
}

/// Scenario 2: politeness spacing. Two fetcher workers sharing one
/// domain's frontier must still respect `politeness_delay_seconds`
/// between *completions* of fetches to that domain — the second worker
/// should find itself denied by `can_fetch_domain_now` until the delay
/// has elapsed, not racing the first.
#[tokio::test]
#[ignore = "requires a local redis-stack-server with RedisBloom loaded"]
async fn politeness_spacing() {
    let pod = pod_on_db(6).await;
    // Pre-seed an empty, far-future-cached robots.txt so `delay()` doesn't
    // attempt a real network fetch for a domain with no crawl-delay rule.
    let far_future = 9_999_999_999i64;
    pod.hset("domain:s.test", "robots_txt", "").await.unwrap();
    pod.hset("domain:s.test", "robots_expires", &far_future.to_string()).await.unwrap();

    let robots = RobotsManager::new("crawlpod".to_string(), 5, 3600, 3600).unwrap();
    let politeness = Politeness::new(robots, 2);
    let domain = Domain::from("s.test");

    let first = std::time::Instant::now();
    assert!(politeness.can_fetch_domain_now(&pod, &domain).await.unwrap());
    politeness.record_domain_fetch_attempt(&pod, &domain).await.unwrap();

    // Immediately after recording a fetch, the domain must be denied.
    assert!(!politeness.can_fetch_domain_now(&pod, &domain).await.unwrap());

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    assert!(politeness.can_fetch_domain_now(&pod, &domain).await.unwrap());
    assert!(first.elapsed() >= std::time::Duration::from_secs(2));
}

/// Scenario 6: crash-and-resume. A zombie `lock:domain:c.test` left behind
/// by a `SIGKILL`ed writer must be cleared before the next write-lock
/// acquisition can succeed, and `initialize(resume=true)` against an
/// already-initialized pod must be a no-op rather than re-queuing seeds.
#[tokio::test]
#[ignore = "requires a local redis-stack-server with RedisBloom loaded"]
async fn crash_and_resume() {
    let pod = pod_on_db(7).await;
    let domain = Domain::from("c.test");
    let write_lock = WriteLock::new(50, 200, 2);

    // Simulate a crash: acquire the lock and never release it.
    let guard = write_lock.acquire(&pod, &domain).await.unwrap();
    std::mem::forget(guard);
    assert!(pod.hget("nonexistent", "x").await.unwrap().is_none());
    assert_eq!(
        redis::cmd("EXISTS")
            .arg("lock:domain:c.test")
            .query_async::<_, u8>(&mut pod.raw())
            .await
            .unwrap(),
        1,
        "zombie lock should still be present before the sweep"
    );

    // What the orchestrator's startup sweep does: SCAN + DEL every
    // `lock:domain:*` key before spawning any fetcher/parser.
    let cleared = pod.scan_delete("lock:domain:*").await.unwrap();
    assert_eq!(cleared, 1);

    // A fresh acquire must now succeed without waiting out the deadline.
    let reacquired = write_lock.acquire(&pod, &domain).await.unwrap();
    reacquired.release().await.unwrap();

    // Resume must not re-seed an already-initialized pod.
    let frontier = frontier_for(1, 0, vec![pod.clone()], "resume").await;
    frontier.initialize(&["http://c.test/".to_string()], false).await.unwrap();
    let queue_len_before = pod.llen("domains:queue").await.unwrap();

    frontier.initialize(&["http://c.test/".to_string()], true).await.unwrap();
    let queue_len_after = pod.llen("domains:queue").await.unwrap();
    assert_eq!(queue_len_before, queue_len_after, "resume=true must skip re-seeding");
}
