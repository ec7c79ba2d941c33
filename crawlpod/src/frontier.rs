//! Frontier manager — §4.7. Generalizes the teacher's
//! `crawler::file_queue::{FileQueueWriter, FilePointer, FileQueue}`
//! append-log-plus-pointer pattern (`core/src/crawler/file_queue.rs`) from a
//! process-private bincode job queue into a shared, KV-indexed, per-domain
//! plain-text frontier: several fetcher processes in one pod can share a
//! single frontier file because the "pointer" lives in the KV hash
//! (`frontier_offset`) rather than in a private side-file.

use std::collections::HashSet;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

use crate::domain::{frontier_shard_prefix, pod_for_domain, Domain};
use crate::error::Result;
use crate::kv::bloom::SeenBloom;
use crate::kv::{atomic_pop_ready_domain, Pod};
use crate::lock::{ReadLockTable, WriteLock};
use crate::queue::{decode_ingress_batch, encode_ingress_batch, IngressEntry};
use crate::urls::{extract_domain, normalize};

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct FrontierManager {
    self_pod_id: usize,
    pod_count: usize,
    /// Connections to every pod's KV store, indexed by pod id. Needed
    /// because cross-pod URL discoveries are pushed straight onto the
    /// owning pod's `ingress:urls` list.
    pods: Vec<Pod>,
    frontier_dir: PathBuf,
    max_depth: u32,
    bloom: SeenBloom,
    write_lock: WriteLock,
    read_locks: ReadLockTable,
    frontier_read_attempts: usize,
}

impl FrontierManager {
    pub fn new(
        self_pod_id: usize,
        pod_count: usize,
        pods: Vec<Pod>,
        data_dirs: &[PathBuf],
        max_depth: u32,
        bloom: SeenBloom,
        write_lock: WriteLock,
        frontier_read_attempts: usize,
    ) -> Self {
        Self {
            self_pod_id,
            pod_count,
            pods,
            frontier_dir: data_dirs[0].join("frontiers"),
            max_depth,
            bloom,
            write_lock,
            read_locks: ReadLockTable::new(),
            frontier_read_attempts,
        }
    }

    fn pod(&self) -> &Pod {
        &self.pods[self.self_pod_id]
    }

    /// `BF.RESERVE`s this pod's `seen:bloom` at the configured capacity and
    /// error rate. Idempotent: a pre-existing filter from a prior run is
    /// left untouched, per spec §3 ("created once per pod at init; never
    /// rebuilt mid-run").
    pub async fn reserve_bloom(&self, capacity: u64, error_rate: f64) -> Result<()> {
        self.bloom.reserve(self.pod(), capacity, error_rate).await
    }

    fn relative_frontier_path(domain: &Domain) -> String {
        format!("{}/{}.frontier", frontier_shard_prefix(domain), domain)
    }

    /// Sharded, idempotent seed loading. Each pod inserts only the seeds it
    /// owns; re-running against state already initialized (tracked via a
    /// marker key) is a no-op when `resume` is set.
    pub async fn initialize(&self, seeds: &[String], resume: bool) -> Result<()> {
        let pod = self.pod();
        if resume && pod.hget("frontier:meta", "initialized").await?.is_some() {
            tracing::info!(pod = self.self_pod_id, "resuming: frontier already initialized");
            return Ok(());
        }

        let mut queued: HashSet<Domain> = HashSet::new();

        for seed in seeds {
            let Some(normalized) = normalize(seed) else {
                continue;
            };
            let Ok(parsed) = url::Url::parse(&normalized) else {
                continue;
            };
            let Some(domain) = extract_domain(&parsed) else {
                continue;
            };
            if pod_for_domain(&domain, self.pod_count) != self.self_pod_id {
                continue;
            }

            if !self.bloom.add_if_new(pod, &[normalized.clone()]).await?[0] {
                continue;
            }

            let guard = self.write_lock.acquire(pod, &domain).await?;
            self.append_line(pod, &domain, &normalized, 0).await?;
            let record_key = format!("domain:{domain}");
            pod.hset(&record_key, "is_seeded", "1").await?;
            pod.hset(&record_key, "next_fetch_time", "0").await?;
            guard.release().await?;

            if queued.insert(domain.clone()) {
                pod.rpush("domains:queue", domain.as_str()).await?;
            }
        }

        pod.hset("frontier:meta", "initialized", "1").await?;
        Ok(())
    }

    /// Appends `url|depth\n` to the domain's frontier file and updates the
    /// domain record's `frontier_size`/`file_path`/`frontier_offset`. Caller
    /// must already hold the domain write-lock.
    async fn append_line(&self, pod: &Pod, domain: &Domain, url: &str, depth: u32) -> Result<()> {
        let relative_path = Self::relative_frontier_path(domain);
        let full_path = self.frontier_dir.join(&relative_path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let line = format!("{url}|{depth}\n");
        {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&full_path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
        }

        let new_size = tokio::fs::metadata(&full_path).await?.len();
        let record_key = format!("domain:{domain}");
        pod.hset(&record_key, "file_path", &relative_path).await?;
        pod.hset(&record_key, "frontier_size", &new_size.to_string())
            .await?;
        if pod.hget(&record_key, "frontier_offset").await?.is_none() {
            pod.hset(&record_key, "frontier_offset", "0").await?;
        }
        Ok(())
    }

    /// Normalizes, shards by domain hash, dedups against `seen:bloom`, and
    /// appends locally-owned URLs to their domain's frontier. Cross-pod
    /// URLs are forwarded to the owning pod's `ingress:urls`. Returns the
    /// count of URLs appended to *this* pod's frontier.
    pub async fn add_urls_batch(&self, urls: &[(String, u32)]) -> Result<usize> {
        let pod = self.pod();
        let mut appended = 0usize;
        let mut by_target_pod: std::collections::HashMap<usize, Vec<IngressEntry>> =
            std::collections::HashMap::new();

        for (raw_url, depth) in urls {
            if *depth > self.max_depth {
                continue;
            }
            let Some(normalized) = normalize(raw_url) else {
                continue;
            };
            let Ok(parsed) = url::Url::parse(&normalized) else {
                continue;
            };
            let Some(domain) = extract_domain(&parsed) else {
                continue;
            };

            if pod.sismember("excluded:domains", domain.as_str()).await? {
                continue;
            }

            let target_pod = pod_for_domain(&domain, self.pod_count);
            if target_pod != self.self_pod_id {
                by_target_pod
                    .entry(target_pod)
                    .or_default()
                    .push(IngressEntry {
                        url: normalized,
                        depth: *depth,
                    });
                continue;
            }

            if !self.bloom.add_if_new(pod, &[normalized.clone()]).await?[0] {
                continue;
            }

            let guard = self.write_lock.acquire(pod, &domain).await?;
            self.append_line(pod, &domain, &normalized, *depth).await?;
            pod.rpush("domains:queue", domain.as_str()).await?;
            guard.release().await?;

            appended += 1;
        }

        for (target_pod, entries) in by_target_pod {
            let blob = encode_ingress_batch(&entries)?;
            self.pods[target_pod].rpush_bytes("ingress:urls", &blob).await?;
        }

        Ok(appended)
    }

    /// Pops a ready domain, reads one line from its frontier file under the
    /// process-local read-lock, and advances `frontier_offset`. Returns
    /// `None` if no ready URL is found within the configured attempt bound.
    pub async fn get_next_url(&self) -> Result<Option<(String, Domain, u32)>> {
        let pod = self.pod();
        let now = now_epoch();

        for _ in 0..self.frontier_read_attempts {
            let Some(domain_str) =
                atomic_pop_ready_domain(pod, "domains:queue", now, self.frontier_read_attempts)
                    .await?
            else {
                return Ok(None);
            };
            let domain = Domain::from(domain_str);

            let lock = self.read_locks.entry(&domain);
            let _guard = lock.lock().await;

            let record_key = format!("domain:{domain}");
            let offset: u64 = pod
                .hget(&record_key, "frontier_offset")
                .await?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let size: u64 = pod
                .hget(&record_key, "frontier_size")
                .await?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            if offset >= size {
                // exhausted: do not re-enqueue, try the next domain.
                continue;
            }

            let relative_path: String = pod
                .hget(&record_key, "file_path")
                .await?
                .unwrap_or_else(|| Self::relative_frontier_path(&domain));
            let full_path = self.frontier_dir.join(&relative_path);

            let file = tokio::fs::File::open(&full_path).await?;
            let mut reader = BufReader::new(file);
            reader.seek(std::io::SeekFrom::Start(offset)).await?;

            let mut line = String::new();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                continue;
            }

            let new_offset = offset + bytes_read as u64;
            pod.hset(&record_key, "frontier_offset", &new_offset.to_string())
                .await?;

            if new_offset < size {
                pod.rpush("domains:queue", domain.as_str()).await?;
            }

            let trimmed = line.trim_end_matches('\n');
            let Some((url, depth_str)) = trimmed.split_once('|') else {
                continue;
            };
            let depth: u32 = depth_str.parse().unwrap_or(0);

            return Ok(Some((url.to_string(), domain, depth)));
        }

        Ok(None)
    }

    /// Drains this pod's own `ingress:urls`, decoding batches pushed by
    /// other pods' parsers and handing them to `add_urls_batch`. Runs as a
    /// lightweight coroutine decoupling cross-pod writes from the parser
    /// critical path.
    pub async fn run_ingress_reader(&self, shutdown: &tokio::sync::Notify) {
        loop {
            let popped = tokio::select! {
                result = self.pod().blpop_bytes("ingress:urls", 1.0) => result,
                _ = shutdown.notified() => return,
            };

            match popped {
                Ok(Some((_, bytes))) => match decode_ingress_batch(&bytes) {
                    Ok(entries) => {
                        let urls: Vec<(String, u32)> =
                            entries.into_iter().map(|e| (e.url, e.depth)).collect();
                        if let Err(e) = self.add_urls_batch(&urls).await {
                            tracing::error!(error = %e, "ingress batch insert failed");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to decode ingress batch"),
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "ingress BLPOP failed");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_frontier_path_is_sharded_by_hash_prefix() {
        let domain = Domain::from("example.com");
        let path = FrontierManager::relative_frontier_path(&domain);
        assert!(path.ends_with("example.com.frontier"));
        assert_eq!(path.len(), "xx/example.com.frontier".len());
    }
}
