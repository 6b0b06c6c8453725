//! Disk store for cached responses, one directory per partition.
//!
//! Every entry is a body file plus a JSON metadata sidecar. The sidecar is
//! written last, so a crash mid-write leaves an invisible body file rather
//! than a readable entry with a torn body.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

/// Metadata stored next to each cached body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub stored_at: i64,
}

/// A cached response read back from disk.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub meta: EntryMeta,
    pub body: Vec<u8>,
}

/// One named cache partition backed by a directory on disk.
pub struct CachePartition {
    dir: PathBuf,
}

impl CachePartition {
    pub fn new<P: AsRef<Path>>(root: P, name: &str) -> Self {
        Self {
            dir: root.as_ref().join(name),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache partition dir {:?}", self.dir))
    }

    fn entry_key(method: &str, url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b" ");
        hasher.update(url.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", key))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", key))
    }

    /// Look up a stored response. Entries with a missing or unreadable
    /// sidecar or body count as absent.
    pub async fn get(&self, method: &str, url: &str) -> Option<CachedEntry> {
        let key = Self::entry_key(method, url);
        let meta_bytes = fs::read(self.meta_path(&key)).await.ok()?;
        let meta: EntryMeta = serde_json::from_slice(&meta_bytes).ok()?;
        let body = fs::read(self.body_path(&key)).await.ok()?;
        Some(CachedEntry { meta, body })
    }

    /// Store a response body and its metadata. The body must be fully on
    /// disk before the sidecar makes the entry visible to `get`.
    pub async fn put(
        &self,
        method: &str,
        url: &str,
        status: u16,
        content_type: Option<String>,
        body: &[u8],
    ) -> Result<()> {
        self.init().await?;
        let key = Self::entry_key(method, url);
        fs::write(self.body_path(&key), body)
            .await
            .with_context(|| format!("Failed to write cached body for {}", url))?;
        let meta = EntryMeta {
            url: url.to_string(),
            status,
            content_type,
            stored_at: now_unix(),
        };
        let meta_json = serde_json::to_vec(&meta)?;
        let staging = self.dir.join(format!("{}.meta.json.tmp", key));
        fs::write(&staging, &meta_json)
            .await
            .with_context(|| format!("Failed to write cache metadata for {}", url))?;
        fs::rename(&staging, self.meta_path(&key))
            .await
            .with_context(|| format!("Failed to publish cache metadata for {}", url))?;
        Ok(())
    }

    /// Drop every entry in the partition, keeping the directory itself.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to clear cache partition {:?}", self.dir))
            }
        }
        self.init().await
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
