mod file_config;

pub use file_config::{FileConfig, NormalizerConfig, UploadConfig, WaveformConfig};

use crate::server::RequestsLoggingLevel;
use crate::waveform::DecodeStrategy;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub audio_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub content_cache_age_sec: usize,
    pub frontend_dir_path: Option<String>,
    pub require_auth: bool,
    pub token_retention_days: u64,
    pub prune_interval_hours: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub content_cache_age_sec: usize,
    pub frontend_dir_path: Option<String>,
    pub require_auth: bool,
    pub token_retention_days: u64,
    pub prune_interval_hours: u64,

    // Feature configs (with defaults)
    pub waveform: WaveformSettings,
    pub normalizer: NormalizerSettings,
    pub upload: UploadSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let audio_dir = file
            .audio_dir
            .map(PathBuf::from)
            .or_else(|| cli.audio_dir.clone())
            .unwrap_or_else(|| db_dir.join("audio"));

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let content_cache_age_sec = file
            .content_cache_age_sec
            .unwrap_or(cli.content_cache_age_sec);
        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        let require_auth = file.require_auth.unwrap_or(cli.require_auth);
        let token_retention_days = file
            .token_retention_days
            .unwrap_or(cli.token_retention_days);
        let prune_interval_hours = file
            .prune_interval_hours
            .unwrap_or(cli.prune_interval_hours);

        // Waveform settings - merge file config with defaults
        let wf_file = file.waveform.unwrap_or_default();
        let waveform = WaveformSettings {
            peaks_per_second: wf_file.peaks_per_second.unwrap_or(100),
            strategy: wf_file
                .strategy
                .and_then(|s| parse_strategy(&s))
                .unwrap_or_default(),
            decode_sample_rate: wf_file.decode_sample_rate.unwrap_or(8000),
            extrema_binary: wf_file
                .extrema_binary
                .unwrap_or_else(|| "audiowaveform".to_string()),
            max_output_mb: wf_file.max_output_mb.unwrap_or(64),
            timeout_sec: wf_file.timeout_sec.unwrap_or(120),
        };
        if waveform.peaks_per_second == 0 {
            bail!("waveform.peaks_per_second must be positive");
        }
        if waveform.decode_sample_rate == 0 {
            bail!("waveform.decode_sample_rate must be positive");
        }

        let nm_file = file.normalizer.unwrap_or_default();
        let normalizer = NormalizerSettings {
            enabled: nm_file.enabled.unwrap_or(true),
            bitrate_kbps: nm_file.bitrate_kbps.unwrap_or(128),
            sample_rate: nm_file.sample_rate.unwrap_or(44100),
            timeout_sec: nm_file.timeout_sec.unwrap_or(120),
        };

        let up_file = file.upload.unwrap_or_default();
        let max_file_size = match up_file.max_file_size {
            Some(s) => parse_byte_size(&s)?,
            None => UploadSettings::default().max_file_size,
        };
        if max_file_size == 0 {
            bail!("upload.max_file_size must be positive");
        }
        let upload = UploadSettings { max_file_size };

        Ok(Self {
            db_dir,
            audio_dir,
            port,
            metrics_port,
            logging_level,
            content_cache_age_sec,
            frontend_dir_path,
            require_auth,
            token_retention_days,
            prune_interval_hours,
            waveform,
            normalizer,
            upload,
        })
    }

    pub fn user_db_path(&self) -> PathBuf {
        self.db_dir.join("user.db")
    }

    pub fn library_db_path(&self) -> PathBuf {
        self.db_dir.join("library.db")
    }
}

#[derive(Debug, Clone)]
pub struct WaveformSettings {
    pub peaks_per_second: u32,
    pub strategy: DecodeStrategy,
    pub decode_sample_rate: u32,
    pub extrema_binary: String,
    pub max_output_mb: u64,
    pub timeout_sec: u64,
}

impl Default for WaveformSettings {
    fn default() -> Self {
        Self {
            peaks_per_second: 100,
            strategy: DecodeStrategy::Pcm,
            decode_sample_rate: 8000,
            extrema_binary: "audiowaveform".to_string(),
            max_output_mb: 64,
            timeout_sec: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizerSettings {
    pub enabled: bool,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub timeout_sec: u64,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bitrate_kbps: 128,
            sample_rate: 44100,
            timeout_sec: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub max_file_size: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_file_size: 200 * 1024 * 1024,
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

fn parse_strategy(s: &str) -> Option<DecodeStrategy> {
    DecodeStrategy::from_str(s, true).ok()
}

/// Parses a human readable size like "200 MiB" into bytes.
fn parse_byte_size(s: &str) -> Result<u64> {
    byte_unit::Byte::parse_str(s, true)
        .map(|b| b.as_u64())
        .map_err(|err| anyhow::anyhow!("Invalid size {:?}: {}", s, err))
}
