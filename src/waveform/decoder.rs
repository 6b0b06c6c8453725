//! Waveform extraction strategies.
//!
//! Two backends produce the same [`PeaksArtifact`]: a raw PCM decode through
//! ffmpeg and an extrema scan through an audiowaveform-style tool. Callers
//! pick one at startup through configuration and depend only on the
//! [`WaveformDecoder`] trait.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use super::peaks::{peaks_from_extrema, peaks_from_samples, PeaksArtifact};

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to probe audio duration: {0}")]
    ProbeFailed(String),

    #[error("Decode tool failed: {0}")]
    ToolFailed(String),

    #[error("Decode tool produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("Decode tool output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },

    #[error("Decode tool did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which extraction backend the server runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DecodeStrategy {
    /// ffprobe duration probe plus ffmpeg raw PCM decode.
    #[default]
    Pcm,
    /// Single pass through an extrema scan tool (audiowaveform).
    Extrema,
}

/// Ceilings applied to every decode subprocess.
#[derive(Debug, Clone, Copy)]
pub struct ToolLimits {
    pub max_output_bytes: usize,
    pub timeout: Duration,
}

impl Default for ToolLimits {
    fn default() -> Self {
        ToolLimits {
            max_output_bytes: 64 * 1024 * 1024,
            timeout: Duration::from_secs(120),
        }
    }
}

#[async_trait]
pub trait WaveformDecoder: Send + Sync {
    /// Extracts a complete peaks artifact from the audio file at `path`.
    async fn extract_waveform(&self, path: &Path) -> Result<PeaksArtifact, DecodeError>;

    /// Short name used in logs and metrics labels.
    fn strategy_name(&self) -> &'static str;
}

/// Probes duration with ffprobe, decodes mono 32-bit float PCM with ffmpeg
/// and folds the sample buffer into peaks.
pub struct PcmWaveformDecoder {
    peaks_per_second: u32,
    decode_sample_rate: u32,
    limits: ToolLimits,
}

impl PcmWaveformDecoder {
    pub fn new(peaks_per_second: u32, decode_sample_rate: u32, limits: ToolLimits) -> Self {
        PcmWaveformDecoder {
            peaks_per_second,
            decode_sample_rate,
            limits,
        }
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, DecodeError> {
        let mut command = Command::new("ffprobe");
        command
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path);

        let output = run_tool(command, self.limits).await?;
        if !output.success {
            return Err(DecodeError::ProbeFailed(output.stderr_tail));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let duration: f64 = raw
            .trim()
            .parse()
            .map_err(|_| DecodeError::ProbeFailed(format!("unparseable duration {:?}", raw.trim())))?;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(DecodeError::ProbeFailed(format!(
                "non-positive duration {}",
                duration
            )));
        }
        Ok(duration)
    }

    async fn decode_samples(&self, path: &Path) -> Result<Vec<f32>, DecodeError> {
        let mut command = Command::new("ffmpeg");
        command
            .arg("-i")
            .arg(path)
            .args(["-ac", "1", "-ar"])
            .arg(self.decode_sample_rate.to_string())
            .args(["-f", "f32le", "-acodec", "pcm_f32le", "-"]);

        let output = run_tool(command, self.limits).await?;
        if !output.success {
            return Err(DecodeError::ToolFailed(format!(
                "ffmpeg decode failed: {}",
                output.stderr_tail
            )));
        }

        let samples = output
            .stdout
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();
        Ok(samples)
    }
}

#[async_trait]
impl WaveformDecoder for PcmWaveformDecoder {
    async fn extract_waveform(&self, path: &Path) -> Result<PeaksArtifact, DecodeError> {
        let duration = self.probe_duration(path).await?;
        let samples = self.decode_samples(path).await?;
        debug!(
            "Decoded {} samples over {:.2}s from {:?}",
            samples.len(),
            duration,
            path
        );
        let peaks = peaks_from_samples(&samples, duration, self.peaks_per_second);
        Ok(PeaksArtifact::new(peaks, duration, self.peaks_per_second))
    }

    fn strategy_name(&self) -> &'static str {
        "pcm"
    }
}

#[derive(Debug, Deserialize)]
struct ExtremaScan {
    sample_rate: u32,
    length: u64,
    data: Vec<i32>,
}

/// Runs an audiowaveform-style tool once and converts its interleaved
/// min/max pairs into peaks. The tool's reported point count is
/// authoritative for duration.
pub struct ExtremaWaveformDecoder {
    points_per_second: u32,
    binary: String,
    limits: ToolLimits,
}

impl ExtremaWaveformDecoder {
    pub fn new(points_per_second: u32, binary: impl Into<String>, limits: ToolLimits) -> Self {
        ExtremaWaveformDecoder {
            points_per_second,
            binary: binary.into(),
            limits,
        }
    }
}

#[async_trait]
impl WaveformDecoder for ExtremaWaveformDecoder {
    async fn extract_waveform(&self, path: &Path) -> Result<PeaksArtifact, DecodeError> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-i")
            .arg(path)
            .args(["--output-format", "json", "-b", "8", "--pixels-per-second"])
            .arg(self.points_per_second.to_string())
            .args(["-o", "-"]);

        let output = run_tool(command, self.limits).await?;
        if !output.success {
            return Err(DecodeError::ToolFailed(format!(
                "waveform scan failed: {}",
                output.stderr_tail
            )));
        }

        let scan: ExtremaScan = serde_json::from_slice(&output.stdout)
            .map_err(|err| DecodeError::InvalidOutput(err.to_string()))?;
        debug!(
            "Scanned {} points from {:?} (source rate {}Hz)",
            scan.length, path, scan.sample_rate
        );

        let peaks = peaks_from_extrema(&scan.data);
        let duration = scan.length as f64 / self.points_per_second as f64;
        Ok(PeaksArtifact::new(peaks, duration, self.points_per_second))
    }

    fn strategy_name(&self) -> &'static str {
        "extrema"
    }
}

/// Verifies the external tools for the chosen strategy are runnable.
pub async fn check_decode_tools_available(strategy: DecodeStrategy, extrema_binary: &str) -> bool {
    match strategy {
        DecodeStrategy::Pcm => {
            tool_runs("ffmpeg", "-version").await && tool_runs("ffprobe", "-version").await
        }
        DecodeStrategy::Extrema => tool_runs(extrema_binary, "--version").await,
    }
}

async fn tool_runs(binary: &str, version_flag: &str) -> bool {
    Command::new(binary)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

struct ToolOutput {
    stdout: Vec<u8>,
    stderr_tail: String,
    success: bool,
}

const STDERR_TAIL_BYTES: usize = 16 * 1024;

/// Runs a child process capturing stdout up to the configured cap, under a
/// wall-clock timeout. The child is killed when either ceiling is hit.
async fn run_tool(mut command: Command, limits: ToolLimits) -> Result<ToolOutput, DecodeError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| DecodeError::ToolFailed("stdout not captured".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| DecodeError::ToolFailed("stderr not captured".to_string()))?;

    // Drain stderr concurrently so a chatty tool cannot block on a full pipe.
    let stderr_reader = tokio::spawn(async move {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match stderr.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if buffer.len() < STDERR_TAIL_BYTES {
                        buffer.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
        buffer.truncate(STDERR_TAIL_BYTES);
        String::from_utf8_lossy(&buffer).trim().to_string()
    });

    let started = tokio::time::Instant::now();
    let stdout_bytes =
        match tokio::time::timeout(limits.timeout, read_capped(&mut stdout, limits.max_output_bytes))
            .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(err);
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(DecodeError::TimedOut(limits.timeout));
            }
        };

    let remaining = limits.timeout.saturating_sub(started.elapsed());
    let status = match tokio::time::timeout(remaining, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(DecodeError::TimedOut(limits.timeout));
        }
    };

    let stderr_tail = stderr_reader.await.unwrap_or_default();
    Ok(ToolOutput {
        stdout: stdout_bytes,
        stderr_tail,
        success: status.success(),
    })
}

async fn read_capped(
    reader: &mut (impl AsyncRead + Unpin),
    limit: usize,
) -> Result<Vec<u8>, DecodeError> {
    let mut buffer = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buffer);
        }
        if buffer.len() + n > limit {
            return Err(DecodeError::OutputTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}
