//! Thin typed wrapper around the pod's Redis-compatible KV store, following
//! the same "one client, builder-configured once, cloned everywhere" shape
//! the teacher uses for its `reqwest::Client` (see `crawlpod::http`).

pub mod bloom;
mod script;

use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::Result;

/// A cheap-to-clone handle to one pod's KV store. `ConnectionManager`
/// already multiplexes and auto-reconnects, so a single instance is shared
/// across every worker coroutine in a process.
#[derive(Clone)]
pub struct Pod {
    pub(crate) conn: ConnectionManager,
}

impl Pod {
    pub async fn connect(kv_url: &str) -> Result<Self> {
        let client = redis::Client::open(kv_url)?;
        let conn = client.get_tokio_connection_manager().await?;
        Ok(Self { conn })
    }

    pub fn raw(&self) -> ConnectionManager {
        self.conn.clone()
    }

    // -- domain record (hash) ------------------------------------------

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    pub async fn hset_multiple(&self, key: &str, fields: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    // -- lists ------------------------------------------------------------

    pub async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    pub async fn rpush_bytes(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    pub async fn blpop_bytes(
        &self,
        key: &str,
        timeout_secs: f64,
    ) -> Result<Option<(String, Vec<u8>)>> {
        let mut conn = self.conn.clone();
        let result: Option<(String, Vec<u8>)> = conn.blpop(key, timeout_secs).await?;
        Ok(result)
    }

    pub async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key).await?)
    }

    // -- sets --------------------------------------------------------------

    pub async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(key, member).await?)
    }

    // -- strings / locks ----------------------------------------------------

    pub async fn setnx(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.set_nx(key, value).await?)
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// Scans and deletes every key matching `pattern`, used by the
    /// orchestrator to clear zombie `lock:domain:*` keys at startup.
    pub async fn scan_delete(&self, pattern: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next().await {
            keys.push(key);
        }
        drop(iter);
        let count = keys.len();
        if !keys.is_empty() {
            let mut conn = self.conn.clone();
            let _: () = conn.del(keys).await?;
        }
        Ok(count)
    }
}

pub use script::atomic_pop_ready_domain;
