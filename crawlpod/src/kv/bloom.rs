//! `seen:bloom` wrapper. redis-rs has no typed RedisBloom support, so this
//! issues the module's raw commands directly, the same "thin escape hatch
//! over the driver" idiom the teacher applies to its own HTTP client
//! builder.

use redis::Script;

use super::Pod;
use crate::error::Result;

/// `BF.ADD key item` returns 1 if the item was newly added, 0 if it was
/// already (probably) present. Wrapping every URL of a batch in a single
/// Lua script keeps each add atomic per spec §4.2, and lets the whole batch
/// round-trip in one command.
const ADD_IF_NEW_SCRIPT: &str = r#"
local results = {}
for i, item in ipairs(ARGV) do
    results[i] = redis.call('BF.ADD', KEYS[1], item)
end
return results
"#;

pub struct SeenBloom {
    key: String,
    script: Script,
}

impl SeenBloom {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            script: Script::new(ADD_IF_NEW_SCRIPT),
        }
    }

    pub async fn reserve(&self, pod: &Pod, capacity: u64, error_rate: f64) -> Result<()> {
        let mut conn = pod.raw();
        let result: redis::RedisResult<()> = redis::cmd("BF.RESERVE")
            .arg(&self.key)
            .arg(error_rate)
            .arg(capacity)
            .query_async(&mut conn)
            .await;
        // BUSYKEY means it already exists from a previous run; anything else
        // is a real error.
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYKEY") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, pod: &Pod, url: &str) -> Result<bool> {
        let mut conn = pod.raw();
        let exists: i64 = redis::cmd("BF.EXISTS")
            .arg(&self.key)
            .arg(url)
            .query_async(&mut conn)
            .await?;
        Ok(exists != 0)
    }

    /// Returns, per input URL and in the same order, whether it was *newly*
    /// added (`true`) or already present (`false`).
    pub async fn add_if_new(&self, pod: &Pod, urls: &[String]) -> Result<Vec<bool>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = pod.raw();
        let added: Vec<i64> = self
            .script
            .key(&self.key)
            .arg(urls)
            .invoke_async(&mut conn)
            .await?;
        Ok(added.into_iter().map(|v| v == 1).collect())
    }
}
