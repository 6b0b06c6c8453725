//! End-to-end tests for the offline response cache
//!
//! Runs an OfflineCache instance against a live server, then shuts the
//! server down to verify which responses survive offline.

mod common;

use common::{TestClient, TestServer, TEST_AUDIO_BYTES};
use cuepoint_server::offline_cache::{
    CachePartition, ControlMessage, FetchSource, LifecycleState, OfflineCache, RuntimeMode,
    STATIC_PARTITION,
};
use tempfile::TempDir;

fn production_cache(root: &TempDir, base_url: &str, manifest: Vec<String>) -> OfflineCache {
    OfflineCache::new(root.path(), base_url, RuntimeMode::Production, manifest)
}

#[tokio::test]
async fn test_fetch_before_activation_goes_to_network() {
    let server = TestServer::spawn().await;
    let root = TempDir::new().unwrap();
    let cache = production_cache(&root, &server.base_url, vec![]);

    let fetched = cache.fetch("GET", "/", None).await.unwrap();

    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.source, FetchSource::Network);
    assert_eq!(cache.state(), LifecycleState::New);
}

#[tokio::test]
async fn test_install_precaches_and_skip_waiting_activates() {
    let server = TestServer::spawn().await;
    let root = TempDir::new().unwrap();
    let cache = production_cache(&root, &server.base_url, vec!["/".to_string()]);

    cache.install().await.unwrap();
    assert_eq!(cache.state(), LifecycleState::Waiting);

    // The manifest entry landed in the static partition
    let partition = CachePartition::new(root.path(), STATIC_PARTITION);
    let entry = partition
        .get("GET", &format!("{}/", server.base_url))
        .await
        .unwrap();
    assert_eq!(entry.meta.status, 200);
    assert!(!entry.body.is_empty());

    cache
        .handle_message(ControlMessage::SkipWaiting)
        .await
        .unwrap();
    assert_eq!(cache.state(), LifecycleState::Active);
}

#[tokio::test]
async fn test_audio_is_cached_and_survives_server_shutdown() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let id = client.upload_test_audio("cached take").await;
    client.make_audio_public(&id).await;

    let root = TempDir::new().unwrap();
    let cache = production_cache(&root, &server.base_url, vec![]);
    cache.activate().await.unwrap();

    let path = format!("/api/audio/{}/file", id);

    // First fetch goes to the network and stores the bytes
    let fetched = cache.fetch("GET", &path, None).await.unwrap();
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.source, FetchSource::Network);
    assert_eq!(fetched.content_type.as_deref(), Some("audio/mpeg"));
    assert_eq!(fetched.body, TEST_AUDIO_BYTES);

    // Second fetch is served from the cache
    let fetched = cache.fetch("GET", &path, None).await.unwrap();
    assert_eq!(fetched.source, FetchSource::Cache);
    assert_eq!(fetched.body, TEST_AUDIO_BYTES);

    // Still served after the server goes away
    server.shutdown().await;
    let fetched = cache.fetch("GET", &path, None).await.unwrap();
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.source, FetchSource::Cache);
    assert_eq!(fetched.body, TEST_AUDIO_BYTES);
}

#[tokio::test]
async fn test_api_responses_fall_back_to_cache_when_offline() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let id = client.upload_test_audio("listed take").await;
    client.make_audio_public(&id).await;

    let root = TempDir::new().unwrap();
    let cache = production_cache(&root, &server.base_url, vec![]);
    cache.activate().await.unwrap();

    // While online the list comes from the network and is stored
    let online = cache.fetch("GET", "/api/audio", None).await.unwrap();
    assert_eq!(online.status, 200);
    assert_eq!(online.source, FetchSource::Network);
    let records: Vec<serde_json::Value> = serde_json::from_slice(&online.body).unwrap();
    assert_eq!(records.len(), 1);

    // Offline the stored copy is served as a fallback
    server.shutdown().await;
    let offline = cache.fetch("GET", "/api/audio", None).await.unwrap();
    assert_eq!(offline.status, 200);
    assert_eq!(offline.source, FetchSource::Fallback);
    assert_eq!(offline.body, online.body);
}

#[tokio::test]
async fn test_offline_requests_without_cached_copy_synthesize_503() {
    let server = TestServer::spawn().await;
    let root = TempDir::new().unwrap();
    let cache = production_cache(&root, &server.base_url, vec![]);
    cache.activate().await.unwrap();

    server.shutdown().await;

    // An api path that was never fetched has no fallback
    let fetched = cache.fetch("GET", "/api/playlists", None).await.unwrap();
    assert_eq!(fetched.status, 503);
    assert_eq!(fetched.source, FetchSource::Synthetic);
    assert!(!fetched.is_success());
    let body: serde_json::Value = serde_json::from_slice(&fetched.body).unwrap();
    assert_eq!(body["error"], "offline");

    // Same for paths outside the api
    let fetched = cache.fetch("GET", "/health", None).await.unwrap();
    assert_eq!(fetched.status, 503);
    assert_eq!(fetched.source, FetchSource::Synthetic);
}

#[tokio::test]
async fn test_auth_requests_are_never_served_from_cache() {
    let server = TestServer::spawn().await;
    let root = TempDir::new().unwrap();
    let cache = production_cache(&root, &server.base_url, vec![]);
    cache.activate().await.unwrap();

    // Online the request passes straight through
    let fetched = cache.fetch("GET", "/api/auth/session", None).await.unwrap();
    assert_eq!(fetched.source, FetchSource::Network);

    // Offline it fails instead of serving anything stale
    server.shutdown().await;
    let result = cache.fetch("GET", "/api/auth/session", None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_clear_cache_drops_stored_responses() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let id = client.upload_test_audio("cleared take").await;
    client.make_audio_public(&id).await;

    let root = TempDir::new().unwrap();
    let cache = production_cache(&root, &server.base_url, vec![]);
    cache.activate().await.unwrap();

    // Populate both the audio and the api partition
    let path = format!("/api/audio/{}/file", id);
    cache.fetch("GET", &path, None).await.unwrap();
    cache.fetch("GET", "/api/audio", None).await.unwrap();

    cache
        .handle_message(ControlMessage::ClearCache)
        .await
        .unwrap();
    server.shutdown().await;

    // The api fallback is gone, leaving only the synthetic response
    let fetched = cache.fetch("GET", "/api/audio", None).await.unwrap();
    assert_eq!(fetched.source, FetchSource::Synthetic);

    // Cache-first audio has neither a stored copy nor a network
    let result = cache.fetch("GET", &path, None).await;
    assert!(result.is_err());
}
