//! Orchestrator — §4.13. Computes the pod/process topology, clears zombie
//! write-locks, seeds the frontier, spawns one OS child process per
//! fetcher/parser slot (re-invoking its own binary, mirroring the
//! teacher's `crates/cli`-dispatches-by-subcommand shape generalized to
//! process supervision), pins each to a dedicated core, and watches for
//! the spec's four stopping conditions before tearing everything down
//! with `SIGTERM` then `SIGKILL`.
//!
//! The teacher has no equivalent supervisor (stract's crawler processes
//! are deployed independently and coordinate over sonic RPC); this module
//! is grounded instead in the general Unix process-supervision idiom
//! (`nix` for signal delivery, `core_affinity` for pinning) — see
//! DESIGN.md.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::config::Config;
use crate::fetcher::{self, FetcherContext};
use crate::frontier::FrontierManager;
use crate::kv::bloom::SeenBloom;
use crate::kv::Pod;
use crate::lock::WriteLock;
use crate::metrics_exporter;
use crate::parser::{self, ParserContext};
use crate::politeness::Politeness;
use crate::robots::RobotsManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Fetcher,
    Parser,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::Fetcher => "fetcher",
            Role::Parser => "parser",
        }
    }
}

/// `pod k` owns cores `[k*(F+P), (k+1)*(F+P))`; within a pod, fetcher `i`
/// gets core `i`, parser `j` gets core `F+j`.
fn core_index(config: &Config, pod_id: usize, role: Role, index: usize) -> usize {
    let base = pod_id * config.cores_per_pod();
    match role {
        Role::Fetcher => base + index,
        Role::Parser => base + config.fetchers_per_pod + index,
    }
}

/// Each process gets its own Prometheus listener; the core index is
/// already unique per process host-wide, so it doubles as a port offset.
fn prometheus_port_for(config: &Config, pod_id: usize, role: Role, index: usize) -> u16 {
    config.prometheus_port + core_index(config, pod_id, role, index) as u16
}

fn apply_affinity(config: &Config, pod_id: usize, role: Role, index: usize) {
    if !config.enable_cpu_affinity {
        return;
    }
    let target = core_index(config, pod_id, role, index);
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(core_id) = core_ids.get(target) {
            if !core_affinity::set_for_current(*core_id) {
                tracing::warn!(core = target, "failed to pin process to core");
            }
            return;
        }
    }
    tracing::warn!(core = target, "no core available at requested index");
}

pub async fn connect_all_pods(config: &Config) -> Result<Vec<Pod>> {
    let mut pods = Vec::with_capacity(config.pod_count);
    for pod_id in 0..config.pod_count {
        let url = config
            .kv_url_for_pod(pod_id)
            .with_context(|| format!("no kv_url configured for pod {pod_id}"))?;
        pods.push(Pod::connect(url).await.with_context(|| format!("connecting to pod {pod_id}"))?);
    }
    Ok(pods)
}

fn build_frontier(
    config: &Config,
    pod_id: usize,
    pods: Vec<Pod>,
) -> FrontierManager {
    let bloom = SeenBloom::new("seen:bloom");
    let write_lock = WriteLock::new(
        config.write_lock_backoff_base_ms,
        config.write_lock_backoff_max_ms,
        config.write_lock_deadline_seconds,
    );
    FrontierManager::new(
        pod_id,
        config.pod_count,
        pods,
        &config.data_dirs,
        config.max_depth,
        bloom,
        write_lock,
        config.frontier_read_attempts,
    )
}

fn build_politeness(config: &Config) -> Result<Politeness> {
    let robots = RobotsManager::new(
        config.user_agent(),
        config.robots_fetch_timeout_seconds,
        config.robots_cache_ttl_seconds,
        config.robots_error_cache_ttl_seconds,
    )?;
    Ok(Politeness::new(robots, config.politeness_delay_seconds))
}

fn spawn_signal_listener(shutdown: Arc<tokio::sync::Notify>) {
    tokio::spawn(async move {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        term.recv().await;
        tracing::info!("received SIGTERM, shutting down");
        shutdown.notify_waiters();
    });
}

/// Runs one fetcher process's full worker pool until `shutdown` fires.
/// Shared by spawned child processes and by the orchestrator, which acts
/// as fetcher 0 of pod 0 in-process rather than as a separate child.
pub async fn run_fetcher_process(
    config: Config,
    pod_id: usize,
    index: usize,
    shutdown: Arc<tokio::sync::Notify>,
) -> Result<()> {
    let pods = connect_all_pods(&config).await?;
    let pod = pods[pod_id].clone();
    let frontier = Arc::new(build_frontier(&config, pod_id, pods));
    let politeness = Arc::new(build_politeness(&config)?);
    let client = fetcher::client_for(&config)?;

    let ctx = Arc::new(FetcherContext {
        pod,
        frontier: frontier.clone(),
        politeness,
        client,
        parse_queue_soft_limit: config.parse_queue_soft_limit,
        parse_queue_hard_limit: config.parse_queue_hard_limit,
    });

    let ingress_shutdown = shutdown.clone();
    let ingress_frontier = frontier.clone();
    let ingress = tokio::spawn(async move {
        ingress_frontier.run_ingress_reader(&ingress_shutdown).await;
    });

    fetcher::run(ctx, config.fetcher_workers, shutdown).await;
    ingress.abort();
    tracing::info!(pod_id, index, "fetcher process exiting");
    Ok(())
}

pub async fn run_parser_process(
    config: Config,
    pod_id: usize,
    index: usize,
    shutdown: Arc<tokio::sync::Notify>,
) -> Result<()> {
    let pods = connect_all_pods(&config).await?;
    let pod = pods[pod_id].clone();
    let frontier = Arc::new(build_frontier(&config, pod_id, pods));

    let ctx = Arc::new(ParserContext {
        pod,
        frontier,
        data_dirs: config.data_dirs.clone(),
        blpop_timeout_seconds: config.parse_queue_blpop_timeout_seconds as f64,
    });

    parser::run(ctx, config.parser_workers, shutdown).await;
    tracing::info!(pod_id, index, "parser process exiting");
    Ok(())
}

/// Entry point used by a spawned child process (`crawlpod fetcher|parser
/// --config ... --pod-id ... --index ...`): pins to its assigned core,
/// installs its own metrics listener, installs a SIGTERM-triggered
/// shutdown notifier, and runs until that fires.
pub async fn run_child(config: Config, role: Role, pod_id: usize, index: usize) -> Result<()> {
    apply_affinity(&config, pod_id, role, index);
    let port = prometheus_port_for(&config, pod_id, role, index);
    metrics_exporter::install(port)?;

    let shutdown = Arc::new(tokio::sync::Notify::new());
    spawn_signal_listener(shutdown.clone());

    match role {
        Role::Fetcher => run_fetcher_process(config, pod_id, index, shutdown).await,
        Role::Parser => run_parser_process(config, pod_id, index, shutdown).await,
    }
}

async fn load_exclusions(pods: &[Pod], exclude_file: Option<&PathBuf>) -> Result<()> {
    let Some(path) = exclude_file else {
        return Ok(());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading exclusion file {}", path.display()))?;

    for line in contents.lines() {
        let domain = line.trim();
        if domain.is_empty() || domain.starts_with('#') {
            continue;
        }
        for pod in pods {
            pod.sadd("excluded:domains", domain).await?;
            pod.hset(&format!("domain:{domain}"), "is_excluded", "1").await?;
        }
    }
    Ok(())
}

async fn clear_zombie_locks(pods: &[Pod]) -> Result<()> {
    for (pod_id, pod) in pods.iter().enumerate() {
        let cleared = pod.scan_delete("lock:domain:*").await?;
        if cleared > 0 {
            tracing::info!(pod_id, cleared, "cleared zombie write-locks at startup");
        }
    }
    Ok(())
}

async fn load_seeds(config: &Config, pods: &[Pod]) -> Result<()> {
    let raw = std::fs::read_to_string(&config.seed_file)
        .with_context(|| format!("reading seed file {}", config.seed_file.display()))?;
    let seeds: Vec<String> = raw
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    for pod_id in 0..config.pod_count {
        let frontier = build_frontier(config, pod_id, pods.to_vec());
        frontier
            .reserve_bloom(config.bloom_capacity, config.bloom_error_rate)
            .await?;
        frontier.initialize(&seeds, config.resume).await?;
    }
    Ok(())
}

struct ChildHandle {
    role: Role,
    pod_id: usize,
    index: usize,
    child: tokio::process::Child,
    port: u16,
    last_started: Instant,
}

/// Consecutive rapid exits within this window mark the owning pod fatal.
/// A process that connects to a dead KV store fails at startup and exits
/// almost immediately, so "N short-lived restarts in a row" is the
/// observable signature of KV unavailability from the orchestrator's side
/// (spec §4.13/§7: "KV unavailable for a pod ... stop restarting that
/// pod's children; continue other pods").
const RAPID_FAILURE_WINDOW: Duration = Duration::from_secs(30);
const RAPID_FAILURE_THRESHOLD: u32 = 3;

#[derive(Default)]
struct PodHealth {
    consecutive_rapid_failures: u32,
}

fn spawn_child(exe: &PathBuf, config_path: &PathBuf, role: Role, pod_id: usize, index: usize) -> Result<tokio::process::Child> {
    let child = tokio::process::Command::new(exe)
        .arg(role.label())
        .arg("--config")
        .arg(config_path)
        .arg("--pod-id")
        .arg(pod_id.to_string())
        .arg("--index")
        .arg(index.to_string())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {} process (pod {pod_id}, index {index})", role.label()))?;
    Ok(child)
}

/// All of §4.13's stopping conditions, checked once per poll tick. Pods
/// already marked fatal (§7: "KV unavailable for a pod") are skipped
/// entirely so one dead pod's KV never blocks the drain check for the
/// rest of the host; a pod that merely errors transiently is treated as
/// "not yet drained" rather than aborting the whole poll.
async fn should_stop(
    config: &Config,
    pods: &[Pod],
    fatal_pods: &std::collections::HashSet<usize>,
    http_client: &reqwest::Client,
    endpoints: &[u16],
    started_at: Instant,
    drain_since: &mut Option<Instant>,
) -> Result<bool> {
    if let Some(max_pages) = config.max_pages {
        let crawled = metrics_exporter::aggregate(http_client, endpoints, "crawlpod_pages_crawled_total").await;
        if crawled >= max_pages as f64 {
            tracing::info!(crawled, max_pages, "max_pages_crawled reached");
            return Ok(true);
        }
    }

    if let Some(max_duration) = config.max_duration_seconds {
        if started_at.elapsed() >= Duration::from_secs(max_duration) {
            tracing::info!(max_duration, "max_duration_seconds elapsed");
            return Ok(true);
        }
    }

    let mut all_empty = true;
    for (pod_id, pod) in pods.iter().enumerate() {
        if fatal_pods.contains(&pod_id) {
            continue;
        }
        match (pod.llen("domains:queue").await, pod.llen("fetch:queue").await) {
            (Ok(ready), Ok(fetch)) if ready == 0 && fetch == 0 => {}
            (Ok(_), Ok(_)) => {
                all_empty = false;
                break;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(pod_id, error = %e, "transient error polling pod queue lengths");
                all_empty = false;
                break;
            }
        }
    }

    const DRAIN_WINDOW: Duration = Duration::from_secs(30);
    if all_empty {
        let since = drain_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= DRAIN_WINDOW {
            tracing::info!("all pods drained and idle for the sustained window");
            return Ok(true);
        }
    } else {
        *drain_since = None;
    }

    Ok(false)
}

/// Sends `SIGTERM` to every child, waits up to `timeout`, then `SIGKILL`s
/// any survivor.
async fn shutdown_children(children: &mut [ChildHandle], timeout: Duration) {
    for handle in children.iter() {
        if let Some(pid) = handle.child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }

    let deadline = Instant::now() + timeout;
    for handle in children.iter_mut() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, handle.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!(
                    pod_id = handle.pod_id,
                    role = handle.role.label(),
                    index = handle.index,
                    "child did not exit within timeout, sending SIGKILL"
                );
                let _ = handle.child.kill().await;
            }
        }
    }
}

/// Full orchestrator lifecycle (spec §4.13). Runs until a stopping
/// condition fires or an external `SIGTERM`/Ctrl-C is received.
pub async fn run(config: Config) -> Result<()> {
    let exe = std::env::current_exe().context("resolving own executable path")?;
    let config_path = config.self_path.clone().context("config path not recorded on Config")?;

    if config.enable_cpu_affinity {
        let available = core_affinity::get_core_ids().map(|v| v.len()).unwrap_or(0);
        let needed = config.pod_count * config.cores_per_pod();
        anyhow::ensure!(
            available >= needed,
            "cores_per_pod * pod_count ({needed}) exceeds available cores ({available})"
        );
    }

    let pods = connect_all_pods(&config).await?;
    clear_zombie_locks(&pods).await?;
    load_exclusions(&pods, config.exclude_file.as_ref()).await?;
    load_seeds(&config, &pods).await?;

    // Pod 0 / fetcher 0 runs embedded in the orchestrator process itself.
    apply_affinity(&config, 0, Role::Fetcher, 0);
    let own_port = prometheus_port_for(&config, 0, Role::Fetcher, 0);
    metrics_exporter::install(own_port)?;
    let own_shutdown = Arc::new(tokio::sync::Notify::new());
    let own_config = config.clone();
    let own_shutdown_clone = own_shutdown.clone();
    let embedded_fetcher = tokio::spawn(async move {
        if let Err(e) = run_fetcher_process(own_config, 0, 0, own_shutdown_clone).await {
            tracing::error!(error = %e, "embedded pod-0 fetcher-0 task failed");
        }
    });

    let mut children = Vec::new();
    let mut endpoints = vec![own_port];
    let spawn_time = Instant::now();
    for pod_id in 0..config.pod_count {
        for index in 0..config.fetchers_per_pod {
            if pod_id == 0 && index == 0 {
                continue; // embedded above
            }
            let child = spawn_child(&exe, &config_path, Role::Fetcher, pod_id, index)?;
            let port = prometheus_port_for(&config, pod_id, Role::Fetcher, index);
            endpoints.push(port);
            children.push(ChildHandle { role: Role::Fetcher, pod_id, index, child, port, last_started: spawn_time });
        }
        for index in 0..config.parsers_per_pod {
            let child = spawn_child(&exe, &config_path, Role::Parser, pod_id, index)?;
            let port = prometheus_port_for(&config, pod_id, Role::Parser, index);
            endpoints.push(port);
            children.push(ChildHandle { role: Role::Parser, pod_id, index, child, port, last_started: spawn_time });
        }
    }

    let http_client = reqwest::Client::new();
    let started_at = Instant::now();
    let mut drain_since = None;
    let shutting_down = AtomicBool::new(false);
    let mut pod_health: Vec<PodHealth> = (0..config.pod_count).map(|_| PodHealth::default()).collect();
    let mut fatal_pods: std::collections::HashSet<usize> = std::collections::HashSet::new();

    let sigterm_notify = Arc::new(tokio::sync::Notify::new());
    spawn_signal_listener(sigterm_notify.clone());

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            _ = sigterm_notify.notified() => {
                shutting_down.store(true, Ordering::SeqCst);
                break;
            }
        }

        if should_stop(&config, &pods, &fatal_pods, &http_client, &endpoints, started_at, &mut drain_since).await? {
            break;
        }

        // Restart any child that exited unexpectedly, unless its pod has
        // already been marked fatal.
        for handle in children.iter_mut() {
            if fatal_pods.contains(&handle.pod_id) {
                continue;
            }

            if let Ok(Some(status)) = handle.child.try_wait() {
                if !status.success() {
                    tracing::warn!(
                        pod_id = handle.pod_id,
                        role = handle.role.label(),
                        index = handle.index,
                        ?status,
                        "child exited unexpectedly, restarting"
                    );
                }

                let health = &mut pod_health[handle.pod_id];
                if handle.last_started.elapsed() < RAPID_FAILURE_WINDOW {
                    health.consecutive_rapid_failures += 1;
                } else {
                    health.consecutive_rapid_failures = 0;
                }

                if health.consecutive_rapid_failures >= RAPID_FAILURE_THRESHOLD {
                    tracing::error!(
                        error = %crate::error::Error::PodFatal(handle.pod_id),
                        "pod's children keep exiting immediately (likely KV unavailable); \
                         no longer restarting its children"
                    );
                    fatal_pods.insert(handle.pod_id);
                    continue;
                }

                match spawn_child(&exe, &config_path, handle.role, handle.pod_id, handle.index) {
                    Ok(new_child) => {
                        handle.child = new_child;
                        handle.last_started = Instant::now();
                    }
                    Err(e) => tracing::error!(error = %e, "failed to restart child"),
                }
            }
        }
    }

    shutting_down.store(true, Ordering::SeqCst);
    own_shutdown.notify_waiters();
    shutdown_children(&mut children, Duration::from_secs(config.shutdown_join_timeout_seconds)).await;
    let _ = embedded_fetcher.await;

    Ok(())
}
