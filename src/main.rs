use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
use config::{AppConfig, CliConfig, FileConfig};

mod library;
use library::SqliteLibraryStore;

mod server;
use server::{run_server, OptionalNormalizer, RequestsLoggingLevel, ServerConfig};

mod sqlite_persistence;

mod upload;
use upload::FileHandler;

mod user;
use user::{SqliteUserStore, UserAuthTokenStore};

mod waveform;
use waveform::{
    check_decode_tools_available, AudioNormalizer, DecodeStrategy, ExtremaWaveformDecoder,
    FfmpegNormalizer, PcmWaveformDecoder, PeaksManager, ToolLimits, WaveformDecoder,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the SQLite databases.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Directory where uploaded audio files are stored.
    #[clap(long, value_parser = parse_path)]
    pub audio_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3666)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// The maximum age of content in the cache in seconds.
    #[clap(long, default_value_t = 3600)]
    pub content_cache_age_sec: usize,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Reject anonymous requests even for public audio.
    #[clap(long, default_value_t = false)]
    pub require_auth: bool,

    /// Number of days an auth token may stay unused before it is pruned.
    /// Set to 0 to disable pruning.
    #[clap(long, default_value_t = 30)]
    pub token_retention_days: u64,

    /// Interval in hours between pruning runs. Only used if token_retention_days > 0.
    #[clap(long, default_value_t = 24)]
    pub prune_interval_hours: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config = CliConfig {
        db_dir: cli_args.db_dir,
        audio_dir: cli_args.audio_dir,
        port: cli_args.port,
        metrics_port: cli_args.metrics_port,
        logging_level: cli_args.logging_level,
        content_cache_age_sec: cli_args.content_cache_age_sec,
        frontend_dir_path: cli_args.frontend_dir_path,
        require_auth: cli_args.require_auth,
        token_retention_days: cli_args.token_retention_days,
        prune_interval_hours: cli_args.prune_interval_hours,
    };
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    // Initialize metrics system
    info!("Initializing metrics...");
    server::metrics::init_metrics();
    let metrics_port = app_config.metrics_port;
    tokio::spawn(async move {
        if let Err(err) = server::metrics::run_metrics_server(metrics_port).await {
            error!("Metrics server failed: {}", err);
        }
    });

    info!(
        "Opening SQLite user database at {:?}...",
        app_config.user_db_path()
    );
    let user_store = SqliteUserStore::new(app_config.user_db_path())?;

    info!(
        "Opening SQLite library database at {:?}...",
        app_config.library_db_path()
    );
    let library_store = SqliteLibraryStore::new(app_config.library_db_path())?;

    let file_handler = FileHandler::new(
        app_config.audio_dir.clone(),
        app_config.upload.max_file_size,
    );
    file_handler
        .init()
        .await
        .context("Failed to create the audio directory")?;

    // Spawn background task for auth token pruning if enabled
    if app_config.token_retention_days > 0 {
        let retention_days = app_config.token_retention_days;
        let interval_hours = app_config.prune_interval_hours;
        let pruning_store = SqliteUserStore::new(app_config.user_db_path())?;

        info!(
            "Token pruning enabled: retaining {} days, pruning every {} hours",
            retention_days, interval_hours
        );

        tokio::spawn(async move {
            let interval = Duration::from_secs(interval_hours * 60 * 60);
            let mut ticker = tokio::time::interval(interval);

            // Skip the first immediate tick, wait for the first interval
            ticker.tick().await;

            loop {
                ticker.tick().await;

                match pruning_store.prune_unused_auth_tokens(retention_days) {
                    Ok(count) => {
                        if count > 0 {
                            info!("Pruned {} stale auth tokens", count);
                        }
                    }
                    Err(e) => {
                        error!("Failed to prune auth tokens: {}", e);
                    }
                }
            }
        });
    }

    let limits = ToolLimits {
        max_output_bytes: (app_config.waveform.max_output_mb as usize) * 1024 * 1024,
        timeout: Duration::from_secs(app_config.waveform.timeout_sec),
    };
    let decoder: Arc<dyn WaveformDecoder> = match app_config.waveform.strategy {
        DecodeStrategy::Pcm => Arc::new(PcmWaveformDecoder::new(
            app_config.waveform.peaks_per_second,
            app_config.waveform.decode_sample_rate,
            limits,
        )),
        DecodeStrategy::Extrema => Arc::new(ExtremaWaveformDecoder::new(
            app_config.waveform.peaks_per_second,
            app_config.waveform.extrema_binary.clone(),
            limits,
        )),
    };
    info!("Waveform strategy: {}", decoder.strategy_name());
    if !check_decode_tools_available(
        app_config.waveform.strategy,
        &app_config.waveform.extrema_binary,
    )
    .await
    {
        warn!("Waveform decode tools not found, peaks extraction will fail until they are installed");
    }
    let peaks_manager = PeaksManager::new(decoder);

    let normalizer: OptionalNormalizer = if app_config.normalizer.enabled {
        Some(Arc::new(FfmpegNormalizer::new(
            app_config.normalizer.bitrate_kbps,
            app_config.normalizer.sample_rate,
            Duration::from_secs(app_config.normalizer.timeout_sec),
        )) as Arc<dyn AudioNormalizer>)
    } else {
        info!("Upload normalization disabled");
        None
    };

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        content_cache_age_sec: app_config.content_cache_age_sec,
        frontend_dir_path: app_config.frontend_dir_path.clone(),
        require_auth: app_config.require_auth,
    };

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);
    run_server(
        server_config,
        Box::new(user_store),
        Box::new(library_store),
        file_handler,
        peaks_manager,
        normalizer,
        env!("GIT_HASH").to_string(),
    )
    .await
}
