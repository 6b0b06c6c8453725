//! Read-through cache for peaks artifacts.
//!
//! Artifacts live next to their audio file as `{id}.json`. A miss generates
//! synchronously in request context; concurrent misses for the same audio
//! coalesce behind a per-id gate so only one decode runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::decoder::{DecodeError, WaveformDecoder};

#[derive(Error, Debug)]
pub enum PeaksError {
    #[error("Audio file not found")]
    AudioFileMissing,

    #[error("Waveform decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Artifact serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct PeaksManager {
    decoder: Arc<dyn WaveformDecoder>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PeaksManager {
    pub fn new(decoder: Arc<dyn WaveformDecoder>) -> Self {
        PeaksManager {
            decoder,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the peaks artifact cached next to an audio file.
    pub fn artifact_path(audio_path: &Path) -> PathBuf {
        audio_path.with_extension("json")
    }

    /// Returns cached artifact bytes, generating and caching them on miss.
    pub async fn get_or_generate(
        &self,
        audio_id: &str,
        audio_path: &Path,
    ) -> Result<Vec<u8>, PeaksError> {
        let artifact_path = Self::artifact_path(audio_path);
        if let Ok(bytes) = tokio::fs::read(&artifact_path).await {
            return Ok(bytes);
        }

        let gate = self.generation_gate(audio_id).await;
        let result = {
            let _guard = gate.lock().await;
            // A coalesced caller may have produced the artifact while we
            // waited on the gate.
            match tokio::fs::read(&artifact_path).await {
                Ok(bytes) => Ok(bytes),
                Err(_) => self.generate(audio_id, audio_path, &artifact_path).await,
            }
        };
        self.release_gate(audio_id, gate).await;
        result
    }

    /// Deletes the cached artifact for an audio file, if present.
    pub async fn remove_artifact(audio_path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_file(Self::artifact_path(audio_path)).await {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn generate(
        &self,
        audio_id: &str,
        audio_path: &Path,
        artifact_path: &Path,
    ) -> Result<Vec<u8>, PeaksError> {
        if !tokio::fs::try_exists(audio_path).await.unwrap_or(false) {
            return Err(PeaksError::AudioFileMissing);
        }

        info!(
            "Generating peaks for audio {} ({} strategy)",
            audio_id,
            self.decoder.strategy_name()
        );
        let artifact = self.decoder.extract_waveform(audio_path).await?;
        let bytes = serde_json::to_vec(&artifact)?;
        write_artifact(artifact_path, &bytes).await?;
        debug!("Cached {} peaks for audio {}", artifact.length, audio_id);
        Ok(bytes)
    }

    async fn generation_gate(&self, audio_id: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        in_flight
            .entry(audio_id.to_string())
            .or_default()
            .clone()
    }

    async fn release_gate(&self, audio_id: &str, gate: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        drop(gate);
        // Last caller out removes the entry; waiters still hold clones.
        if let Some(existing) = in_flight.get(audio_id) {
            if Arc::strong_count(existing) == 1 {
                in_flight.remove(audio_id);
            }
        }
    }
}

/// Writes through a sibling staging file so readers never observe a torn
/// artifact. Redundant writes are benign, the content is identical.
async fn write_artifact(artifact_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let staging = artifact_path.with_extension("json.tmp");
    tokio::fs::write(&staging, bytes).await?;
    tokio::fs::rename(&staging, artifact_path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::peaks::PeaksArtifact;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubDecoder {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl StubDecoder {
        fn new(delay: Duration) -> Self {
            StubDecoder {
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl WaveformDecoder for StubDecoder {
        async fn extract_waveform(&self, _path: &Path) -> Result<PeaksArtifact, DecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(PeaksArtifact::new(vec![0.1, 0.2, 0.3], 0.03, 100))
        }

        fn strategy_name(&self) -> &'static str {
            "stub"
        }
    }

    async fn write_audio_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("track.mp3");
        tokio::fs::write(&path, b"not really audio").await.unwrap();
        path
    }

    #[test]
    fn artifact_path_swaps_extension() {
        let path = PeaksManager::artifact_path(Path::new("/media/audio/abc.mp3"));
        assert_eq!(path, PathBuf::from("/media/audio/abc.json"));
    }

    #[tokio::test]
    async fn second_request_serves_cached_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = write_audio_file(&dir).await;
        let decoder = Arc::new(StubDecoder::new(Duration::ZERO));
        let manager = PeaksManager::new(decoder.clone());

        let first = manager.get_or_generate("a1", &audio_path).await.unwrap();
        let second = manager.get_or_generate("a1", &audio_path).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        assert!(PeaksManager::artifact_path(&audio_path).exists());
    }

    #[tokio::test]
    async fn missing_audio_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PeaksManager::new(Arc::new(StubDecoder::new(Duration::ZERO)));

        let result = manager
            .get_or_generate("gone", &dir.path().join("gone.mp3"))
            .await;
        assert!(matches!(result, Err(PeaksError::AudioFileMissing)));
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_generation() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = write_audio_file(&dir).await;
        let decoder = Arc::new(StubDecoder::new(Duration::from_millis(50)));
        let manager = Arc::new(PeaksManager::new(decoder.clone()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = manager.clone();
            let audio_path = audio_path.clone();
            handles.push(tokio::spawn(async move {
                manager.get_or_generate("shared", &audio_path).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        assert!(manager.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn remove_artifact_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("none.mp3");
        assert!(PeaksManager::remove_artifact(&audio_path).await.is_ok());
    }
}
