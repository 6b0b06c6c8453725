use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ReencodeError {
    #[error("FFmpeg re-encode failed: {0}")]
    EncodeFailed(String),

    #[error("Re-encode produced a missing or empty file")]
    InvalidOutput,

    #[error("Re-encode did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rewrites an uploaded file into the single normalized delivery format.
///
/// Failures are non-fatal to callers: an upload keeps its original bytes
/// when normalization does not go through.
#[async_trait]
pub trait AudioNormalizer: Send + Sync {
    async fn normalize(&self, path: &Path) -> Result<(), ReencodeError>;
}

/// Re-encodes in place to constant-bitrate MP3. The encode writes a sibling
/// staging file which atomically replaces the original only on success, so
/// a failed or interrupted encode never truncates the source.
pub struct FfmpegNormalizer {
    bitrate_kbps: u32,
    sample_rate: u32,
    timeout: Duration,
}

impl FfmpegNormalizer {
    pub fn new(bitrate_kbps: u32, sample_rate: u32, timeout: Duration) -> Self {
        FfmpegNormalizer {
            bitrate_kbps,
            sample_rate,
            timeout,
        }
    }

    fn staging_path(path: &Path) -> PathBuf {
        path.with_extension("tmp")
    }
}

#[async_trait]
impl AudioNormalizer for FfmpegNormalizer {
    async fn normalize(&self, path: &Path) -> Result<(), ReencodeError> {
        let staging = Self::staging_path(path);

        let mut command = Command::new("ffmpeg");
        command
            .arg("-i")
            .arg(path)
            .args(["-codec:a", "libmp3lame", "-b:a"])
            .arg(format!("{}k", self.bitrate_kbps))
            .arg("-ar")
            .arg(self.sample_rate.to_string())
            .args(["-vn", "-f", "mp3", "-y"])
            .arg(&staging)
            .kill_on_drop(true);

        let run = tokio::time::timeout(self.timeout, command.output()).await;
        let output = match run {
            Ok(output) => output?,
            Err(_) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(ReencodeError::TimedOut(self.timeout));
            }
        };

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&staging).await;
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ReencodeError::EncodeFailed(stderr));
        }

        let encoded_size = tokio::fs::metadata(&staging)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        if encoded_size == 0 {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(ReencodeError::InvalidOutput);
        }

        tokio::fs::rename(&staging, path).await?;
        debug!(
            "Normalized {:?} to {}kbps/{}Hz mp3 ({} bytes)",
            path, self.bitrate_kbps, self.sample_rate, encoded_size
        );
        Ok(())
    }
}
