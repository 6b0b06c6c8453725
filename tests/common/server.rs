//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own databases and audio
//! directory, plus a stub waveform decoder so no external tools run.

use super::constants::*;
use super::fixtures::create_test_db_with_users;
use async_trait::async_trait;
use cuepoint_server::library::SqliteLibraryStore;
use cuepoint_server::server::state::OptionalNormalizer;
use cuepoint_server::server::{server::make_app, RequestsLoggingLevel, ServerConfig};
use cuepoint_server::upload::FileHandler;
use cuepoint_server::user::UserStore;
use cuepoint_server::waveform::{
    AudioNormalizer, DecodeError, PeaksArtifact, PeaksManager, ReencodeError, WaveformDecoder,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Stub decoder for testing - produces a fixed artifact and counts calls
struct CountingDecoder {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl WaveformDecoder for CountingDecoder {
    async fn extract_waveform(&self, _path: &Path) -> Result<PeaksArtifact, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let peaks = (0..STUB_PEAK_COUNT)
            .map(|i| (i % 100) as f32 / 100.0)
            .collect();
        Ok(PeaksArtifact::new(
            peaks,
            STUB_DURATION_SECS,
            STUB_SAMPLE_RATE,
        ))
    }

    fn strategy_name(&self) -> &'static str {
        "stub"
    }
}

/// Stub normalizer that always fails, for testing that uploads survive
/// normalization failures
struct FailingNormalizer;

#[async_trait]
impl AudioNormalizer for FailingNormalizer {
    async fn normalize(&self, _path: &Path) -> Result<(), ReencodeError> {
        Err(ReencodeError::EncodeFailed(
            "stub encoder always fails".to_string(),
        ))
    }
}

/// Test server instance with isolated databases and audio directory
///
/// When dropped, the server gracefully shuts down and temp resources are
/// cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Number of waveform decodes the stub decoder has run
    pub decoder_calls: Arc<AtomicUsize>,

    /// Directory holding uploaded audio files and cached peaks artifacts
    pub audio_dir: PathBuf,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Creates a temporary user database with test users
    /// 2. Creates an empty library database and audio directory
    /// 3. Wires a counting stub decoder into the peaks manager
    /// 4. Binds to a random port (127.0.0.1:0)
    /// 5. Spawns the server in a background task
    /// 6. Waits for the server to be ready
    ///
    /// # Panics
    ///
    /// Panics if:
    /// - Database or directory creation fails
    /// - Port binding fails
    /// - Server fails to start
    /// - Server doesn't become ready within timeout
    pub async fn spawn() -> Self {
        Self::spawn_inner(false, None).await
    }

    /// Spawns a test server that rejects anonymous requests even for
    /// public audio
    pub async fn spawn_requiring_auth() -> Self {
        Self::spawn_inner(true, None).await
    }

    /// Spawns a test server whose upload normalizer always fails
    pub async fn spawn_with_failing_normalizer() -> Self {
        Self::spawn_inner(false, Some(Arc::new(FailingNormalizer))).await
    }

    async fn spawn_inner(require_auth: bool, normalizer: OptionalNormalizer) -> Self {
        // Create temporary test resources
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let user_store: Box<dyn UserStore> = Box::new(
            create_test_db_with_users(&temp_dir.path().join("user.db"))
                .expect("Failed to create test user database"),
        );

        let library_store = SqliteLibraryStore::new(temp_dir.path().join("library.db"))
            .expect("Failed to create test library database");

        let audio_dir = temp_dir.path().join("audio");
        let file_handler = FileHandler::new(audio_dir.clone(), TEST_MAX_FILE_SIZE_BYTES);
        file_handler
            .init()
            .await
            .expect("Failed to create audio directory");

        // Stub decoder so no ffmpeg runs in tests
        let decoder_calls = Arc::new(AtomicUsize::new(0));
        let peaks_manager = PeaksManager::new(Arc::new(CountingDecoder {
            calls: decoder_calls.clone(),
        }));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        // Build the app
        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            content_cache_age_sec: 0, // Disable caching in tests
            frontend_dir_path: None,
            require_auth,
        };

        let app = make_app(
            config,
            user_store,
            Box::new(library_store),
            file_handler,
            peaks_manager,
            normalizer,
            "testhash".to_string(),
        )
        .expect("Failed to build app");

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .expect("Server failed");
        });

        // Wait for server to be ready
        let server = Self {
            base_url: base_url.clone(),
            port,
            decoder_calls,
            audio_dir,
            _temp_dir: temp_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    // Server is ready
                    return;
                }
                _ => {
                    // Server not ready yet, wait and retry
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }

    /// Shuts the server down and waits until the port stops accepting
    /// connections
    ///
    /// Use this when a test needs the server to be provably gone, such as
    /// offline cache tests. Dropping the server also shuts it down, but
    /// does not wait.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        while start.elapsed() < timeout {
            if client
                .get(format!("{}/", self.base_url))
                .send()
                .await
                .is_err()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
        }
        panic!(
            "Server did not shut down within {}ms",
            SERVER_READY_TIMEOUT_MS
        );
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        // TempDir will be cleaned up automatically
    }
}
