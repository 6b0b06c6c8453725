//! Offline response cache for clients of the server.
//!
//! Mirrors the lifecycle of a web service worker: an instance is built,
//! `install` precaches the static shell, the instance waits, and on
//! activation it takes over request routing and retires stale partitions.
//! Responses are kept in versioned partitions on disk, so bumping a
//! partition name is enough to invalidate everything it held.

mod policy;
mod store;

pub use policy::{classify, RequestClass};
pub use store::{CachePartition, CachedEntry, EntryMeta};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

pub const STATIC_PARTITION: &str = "static-v2";
pub const AUDIO_PARTITION: &str = "audio-v1";
pub const API_PARTITION: &str = "api-v1";

/// Partitions the current build knows about. Anything else found in the
/// cache root belongs to an older build and is deleted on activation.
pub const CURRENT_PARTITIONS: &[&str] = &[STATIC_PARTITION, AUDIO_PARTITION, API_PARTITION];

const NETWORK_TIMEOUT_SEC: u64 = 30;

/// How the cache behaves at runtime. Development never caches so local
/// changes always show up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    Production,
    Development,
}

/// Lifecycle of a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built but not installed yet.
    New,
    /// Installed, waiting to take over from a previous instance.
    Waiting,
    /// Controlling request routing.
    Active,
}

/// Control messages posted to a cache instance, encoded the way the web
/// client sends them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
    #[serde(rename = "CLEAR_CACHE")]
    ClearCache,
}

/// Where a fetched response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Served straight from a cache partition.
    Cache,
    /// Fetched over the network.
    Network,
    /// Network failed, served from the fallback partition.
    Fallback,
    /// Network failed with nothing cached, synthesized locally.
    Synthetic,
}

/// A response produced by [`OfflineCache::fetch`].
#[derive(Debug, Clone)]
pub struct CachedFetch {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub source: FetchSource,
}

impl CachedFetch {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct OfflineCache {
    mode: RuntimeMode,
    root: PathBuf,
    base_url: String,
    client: reqwest::Client,
    precache_manifest: Vec<String>,
    state: Mutex<LifecycleState>,
}

impl OfflineCache {
    /// `precache_manifest` lists the request paths to store on install,
    /// typically the static app shell.
    pub fn new<P: AsRef<Path>, S: AsRef<str>>(
        root: P,
        base_url: S,
        mode: RuntimeMode,
        precache_manifest: Vec<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(NETWORK_TIMEOUT_SEC))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            mode,
            root: root.as_ref().to_path_buf(),
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            client,
            precache_manifest,
            state: Mutex::new(LifecycleState::New),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap() = state;
    }

    fn partition(&self, name: &str) -> CachePartition {
        CachePartition::new(&self.root, name)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Precache the static shell and move to [`LifecycleState::Waiting`].
    ///
    /// Precaching is all-or-nothing: a single failed manifest entry fails
    /// the whole install and the instance stays [`LifecycleState::New`].
    /// Development mode skips precaching entirely.
    pub async fn install(&self) -> Result<()> {
        if self.state() != LifecycleState::New {
            debug!("Install skipped, cache is already installed");
            return Ok(());
        }
        if self.mode == RuntimeMode::Production {
            let partition = self.partition(STATIC_PARTITION);
            partition.init().await?;
            for path in &self.precache_manifest {
                let fetched = self
                    .fetch_network("GET", path, None)
                    .await
                    .with_context(|| format!("Failed to precache {}", path))?;
                if !fetched.is_success() {
                    bail!("Precache of {} returned status {}", path, fetched.status);
                }
                partition
                    .put(
                        "GET",
                        &self.url(path),
                        fetched.status,
                        fetched.content_type,
                        &fetched.body,
                    )
                    .await?;
            }
            info!(
                "Precached {} static entries into {}",
                self.precache_manifest.len(),
                STATIC_PARTITION
            );
        }
        self.set_state(LifecycleState::Waiting);
        Ok(())
    }

    /// Take over request routing and delete partitions no current rule
    /// writes to.
    pub async fn activate(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create cache root {:?}", self.root))?;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let keep = name
                .to_str()
                .map(|n| CURRENT_PARTITIONS.contains(&n))
                .unwrap_or(false);
            if !keep {
                info!("Dropping stale cache partition {:?}", name);
                match fs::remove_dir_all(entry.path()).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        for name in CURRENT_PARTITIONS {
            self.partition(name).init().await?;
        }
        self.set_state(LifecycleState::Active);
        info!("Offline cache activated");
        Ok(())
    }

    /// Route a request through the cache.
    ///
    /// In development mode, or before activation, every request goes
    /// straight to the network.
    pub async fn fetch(
        &self,
        method: &str,
        path: &str,
        accept: Option<&str>,
    ) -> Result<CachedFetch> {
        if self.mode == RuntimeMode::Development || self.state() != LifecycleState::Active {
            return self.fetch_network(method, path, accept).await;
        }
        match classify(path, accept) {
            RequestClass::Auth => self.fetch_network(method, path, accept).await,
            RequestClass::AudioBytes => {
                self.cache_first(AUDIO_PARTITION, method, path, accept).await
            }
            RequestClass::StaticAsset => {
                self.cache_first(STATIC_PARTITION, method, path, accept).await
            }
            RequestClass::Api => {
                self.network_first(Some(API_PARTITION), method, path, accept)
                    .await
            }
            RequestClass::Other => self.network_first(None, method, path, accept).await,
        }
    }

    /// React to a control message from the client.
    pub async fn handle_message(&self, message: ControlMessage) -> Result<()> {
        match message {
            ControlMessage::SkipWaiting => {
                if self.state() == LifecycleState::Waiting {
                    self.activate().await
                } else {
                    debug!("SKIP_WAITING ignored in state {:?}", self.state());
                    Ok(())
                }
            }
            ControlMessage::ClearCache => {
                for name in CURRENT_PARTITIONS {
                    self.partition(name).clear().await?;
                }
                info!("Cleared all cache partitions");
                Ok(())
            }
        }
    }

    async fn cache_first(
        &self,
        partition_name: &str,
        method: &str,
        path: &str,
        accept: Option<&str>,
    ) -> Result<CachedFetch> {
        let partition = self.partition(partition_name);
        let url = self.url(path);
        if let Some(entry) = partition.get(method, &url).await {
            debug!("Cache hit for {} {} in {}", method, path, partition_name);
            return Ok(CachedFetch {
                status: entry.meta.status,
                content_type: entry.meta.content_type,
                body: entry.body,
                source: FetchSource::Cache,
            });
        }
        let fetched = self.fetch_network(method, path, accept).await?;
        if fetched.is_success() {
            self.store_response(&partition, method, &url, &fetched).await;
        }
        Ok(fetched)
    }

    async fn network_first(
        &self,
        partition_name: Option<&str>,
        method: &str,
        path: &str,
        accept: Option<&str>,
    ) -> Result<CachedFetch> {
        let url = self.url(path);
        match self.fetch_network(method, path, accept).await {
            Ok(fetched) => {
                if let Some(name) = partition_name {
                    if fetched.is_success() {
                        self.store_response(&self.partition(name), method, &url, &fetched)
                            .await;
                    }
                }
                Ok(fetched)
            }
            Err(err) => {
                warn!("Network fetch failed for {} {}: {:#}", method, path, err);
                if let Some(name) = partition_name {
                    if let Some(entry) = self.partition(name).get(method, &url).await {
                        return Ok(CachedFetch {
                            status: entry.meta.status,
                            content_type: entry.meta.content_type,
                            body: entry.body,
                            source: FetchSource::Fallback,
                        });
                    }
                }
                Ok(synthetic_offline_response())
            }
        }
    }

    async fn fetch_network(
        &self,
        method: &str,
        path: &str,
        accept: Option<&str>,
    ) -> Result<CachedFetch> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .with_context(|| format!("Invalid HTTP method {:?}", method))?;
        let mut request = self.client.request(method, self.url(path));
        if let Some(accept) = accept {
            request = request.header(reqwest::header::ACCEPT, accept);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", path))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read response body for {}", path))?
            .to_vec();
        Ok(CachedFetch {
            status,
            content_type,
            body,
            source: FetchSource::Network,
        })
    }

    async fn store_response(
        &self,
        partition: &CachePartition,
        method: &str,
        url: &str,
        fetched: &CachedFetch,
    ) {
        let stored = partition
            .put(
                method,
                url,
                fetched.status,
                fetched.content_type.clone(),
                &fetched.body,
            )
            .await;
        if let Err(err) = stored {
            warn!("Failed to cache response for {}: {:#}", url, err);
        }
    }
}

fn synthetic_offline_response() -> CachedFetch {
    CachedFetch {
        status: 503,
        content_type: Some("application/json".to_string()),
        body: br#"{"error":"offline"}"#.to_vec(),
        source: FetchSource::Synthetic,
    }
}
