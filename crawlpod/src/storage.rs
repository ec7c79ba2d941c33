//! Content-addressed text storage, sharded across configured data
//! directories, plus the visited-record writer.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::Domain;
use crate::kv::Pod;
use crate::urls::normalize;

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Picks `data_dirs[hash(url) mod |data_dirs|]`, a pure function of the URL
/// with no in-memory routing table, per spec §4.4.
fn data_dir_for_url<'a>(data_dirs: &'a [PathBuf], url: &str) -> &'a Path {
    let digest = md5::compute(url.as_bytes());
    let hash = u128::from_le_bytes(digest.0) as usize;
    &data_dirs[hash % data_dirs.len()]
}

/// Writes `text` to `data_dirs[hash(url) mod n]/content/{sha256(url)}.txt`.
/// Empty text writes nothing and returns `None`. I/O errors are logged and
/// also surface as `None` — storage failures never propagate to the
/// caller's control flow, per spec §4.4/§7.
pub async fn save_text(data_dirs: &[PathBuf], url: &str, text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }

    let dir = data_dir_for_url(data_dirs, url).join("content");
    let file_name = format!("{}.txt", url_hash(url));
    let path = dir.join(&file_name);

    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        tracing::error!(error = %e, dir = %dir.display(), "failed to create content directory");
        return None;
    }

    match tokio::fs::write(&path, text.as_bytes()).await {
        Ok(()) => Some(path.to_string_lossy().into_owned()),
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "failed to write content file");
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VisitStatus {
    Success,
    Disallowed,
    Excluded,
    HttpError,
    FetchError,
}

impl VisitStatus {
    fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::Success => "success",
            VisitStatus::Disallowed => "disallowed",
            VisitStatus::Excluded => "excluded",
            VisitStatus::HttpError => "http_error",
            VisitStatus::FetchError => "fetch_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VisitedRecord {
    pub url: String,
    pub final_url: String,
    pub domain: Domain,
    pub status_code: u16,
    pub status: VisitStatus,
    pub crawled_timestamp: i64,
    pub content_type: Option<String>,
    pub content_hash: Option<String>,
    pub content_path: Option<String>,
    pub redirected_from: Option<String>,
}

/// Atomically stores the visited hash in the pod KV; last write wins on a
/// duplicate URL (a plain `HSET` is already last-write-wins).
pub async fn record_visit(pod: &Pod, record: &VisitedRecord) -> crate::error::Result<()> {
    let key = format!("visited:{}", url_hash(&record.url));
    let mut fields: Vec<(&str, String)> = vec![
        ("url", record.url.clone()),
        ("final_url", record.final_url.clone()),
        ("domain", record.domain.to_string()),
        ("status_code", record.status_code.to_string()),
        ("status", record.status.as_str().to_string()),
        ("crawled_timestamp", record.crawled_timestamp.to_string()),
    ];
    if let Some(ct) = &record.content_type {
        fields.push(("content_type", ct.clone()));
    }
    if let Some(hash) = &record.content_hash {
        fields.push(("content_hash", hash.clone()));
    }
    if let Some(path) = &record.content_path {
        fields.push(("content_path", path.clone()));
    }
    if let Some(from) = &record.redirected_from {
        fields.push(("redirected_from", from.clone()));
    }

    let owned: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
    pod.hset_multiple(&key, &owned).await
}

/// Ensures `url` is itself in normalized form before hashing, so that the
/// content path and visited key are stable regardless of how the caller
/// spelled the URL.
pub fn canonical_url(url: &str) -> Option<String> {
    normalize(url)
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            let _ = write!(s, "{b:02x}");
        }
        s
    }
}
