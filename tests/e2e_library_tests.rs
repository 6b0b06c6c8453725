//! End-to-end tests for library endpoints
//!
//! Tests audio listing and metadata, visibility rules, markers, and
//! playlists.

mod common;

use common::{TestClient, TestServer};
use reqwest::StatusCode;
use serde_json::json;

// =============================================================================
// Audio Records
// =============================================================================

#[tokio::test]
async fn test_listing_shows_own_and_public_audio() {
    let server = TestServer::spawn().await;
    let owner = TestClient::authenticated(server.base_url.clone()).await;
    let other = TestClient::authenticated_other(server.base_url.clone()).await;

    let private_id = owner.upload_test_audio("my private take").await;
    let public_id = owner.upload_test_audio("my shared take").await;
    owner.make_audio_public(&public_id).await;
    let their_id = other.upload_test_audio("their private take").await;

    // The owner sees both of their own recordings but not the other
    // user's private one
    let response = owner.list_audio().await;
    assert_eq!(response.status(), StatusCode::OK);
    let records: Vec<serde_json::Value> = response.json().await.unwrap();
    let ids: Vec<&str> = records.iter().filter_map(|r| r["id"].as_str()).collect();
    assert!(ids.contains(&private_id.as_str()));
    assert!(ids.contains(&public_id.as_str()));
    assert!(!ids.contains(&their_id.as_str()));

    // The other user sees their own plus the public one
    let response = other.list_audio().await;
    let records: Vec<serde_json::Value> = response.json().await.unwrap();
    let ids: Vec<&str> = records.iter().filter_map(|r| r["id"].as_str()).collect();
    assert!(ids.contains(&their_id.as_str()));
    assert!(ids.contains(&public_id.as_str()));
    assert!(!ids.contains(&private_id.as_str()));

    // Anonymous clients see only public recordings
    let anonymous = TestClient::new(server.base_url.clone());
    let response = anonymous.list_audio().await;
    assert_eq!(response.status(), StatusCode::OK);
    let records: Vec<serde_json::Value> = response.json().await.unwrap();
    let ids: Vec<&str> = records.iter().filter_map(|r| r["id"].as_str()).collect();
    assert_eq!(ids, vec![public_id.as_str()]);
}

#[tokio::test]
async fn test_require_auth_blocks_anonymous_listing() {
    let server = TestServer::spawn_requiring_auth().await;

    let anonymous = TestClient::new(server.base_url.clone());
    let response = anonymous.list_audio().await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_private_audio_access_rules() {
    let server = TestServer::spawn().await;
    let owner = TestClient::authenticated(server.base_url.clone()).await;
    let id = owner.upload_test_audio("guarded take").await;

    // Owner reads fine
    let response = owner.get_audio(&id).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Anonymous clients are told to log in
    let anonymous = TestClient::new(server.base_url.clone());
    let response = anonymous.get_audio(&id).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Other users are refused outright
    let other = TestClient::authenticated_other(server.base_url.clone()).await;
    let response = other.get_audio(&id).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_get_nonexistent_audio_returns_404() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;

    let response = client.get_audio("nonexistent-audio").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_audio_metadata() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let id = client.upload_test_audio("first name").await;

    let response = client
        .update_audio(
            &id,
            &json!({ "name": "second name", "description": "with notes" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let record: serde_json::Value = client.get_audio(&id).await.json().await.unwrap();
    assert_eq!(record["name"], "second name");
    assert_eq!(record["description"], "with notes");
    // Fields left out keep their value
    assert_eq!(record["is_public"], false);
}

#[tokio::test]
async fn test_update_audio_requires_ownership() {
    let server = TestServer::spawn().await;
    let owner = TestClient::authenticated(server.base_url.clone()).await;
    let id = owner.upload_test_audio("not yours").await;

    let other = TestClient::authenticated_other(server.base_url.clone()).await;
    let response = other.update_audio(&id, &json!({ "name": "hijacked" })).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = owner
        .update_audio("nonexistent-audio", &json!({ "name": "ghost" }))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_audio() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let id = client.upload_test_audio("short lived").await;

    let response = client.delete_audio(&id).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.get_audio(&id).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let records: Vec<serde_json::Value> = client.list_audio().await.json().await.unwrap();
    assert!(records.iter().all(|r| r["id"] != id.as_str()));
}

#[tokio::test]
async fn test_delete_audio_requires_ownership() {
    let server = TestServer::spawn().await;
    let owner = TestClient::authenticated(server.base_url.clone()).await;
    let id = owner.upload_test_audio("protected take").await;

    let other = TestClient::authenticated_other(server.base_url.clone()).await;
    let response = other.delete_audio(&id).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Still there
    let response = owner.get_audio(&id).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Markers
// =============================================================================

#[tokio::test]
async fn test_add_and_list_markers() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let id = client.upload_test_audio("marked take").await;

    let response = client.add_marker(&id, 42.5, "chorus").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let marker: serde_json::Value = response.json().await.unwrap();
    assert_eq!(marker["audio_id"], id.as_str());
    assert_eq!(marker["position_secs"], 42.5);
    assert_eq!(marker["label"], "chorus");
    assert!(marker["id"].as_u64().is_some());

    // Markers come back ordered by position, not insertion
    client.add_marker(&id, 3.0, "intro").await;
    client.add_marker(&id, 120.0, "outro").await;

    let response = client.get_markers(&id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let markers: Vec<serde_json::Value> = response.json().await.unwrap();
    let labels: Vec<&str> = markers.iter().filter_map(|m| m["label"].as_str()).collect();
    assert_eq!(labels, vec!["intro", "chorus", "outro"]);
}

#[tokio::test]
async fn test_marker_position_must_be_non_negative() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let id = client.upload_test_audio("validated take").await;

    let response = client.add_marker(&id, -1.0, "bad").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_markers_require_ownership_to_modify() {
    let server = TestServer::spawn().await;
    let owner = TestClient::authenticated(server.base_url.clone()).await;
    let id = owner.upload_test_audio("annotated take").await;
    let marker: serde_json::Value = owner
        .add_marker(&id, 10.0, "verse")
        .await
        .json()
        .await
        .unwrap();
    let marker_id = marker["id"].as_u64().unwrap();

    let other = TestClient::authenticated_other(server.base_url.clone()).await;
    let response = other.add_marker(&id, 20.0, "intrusion").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = other.delete_marker(marker_id).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Readers with access can still list them
    owner.make_audio_public(&id).await;
    let anonymous = TestClient::new(server.base_url.clone());
    let response = anonymous.get_markers(&id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let markers: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(markers.len(), 1);
}

#[tokio::test]
async fn test_delete_marker() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let id = client.upload_test_audio("trimmed take").await;
    let marker: serde_json::Value = client
        .add_marker(&id, 5.0, "mistake")
        .await
        .json()
        .await
        .unwrap();
    let marker_id = marker["id"].as_u64().unwrap();

    let response = client.delete_marker(marker_id).await;
    assert_eq!(response.status(), StatusCode::OK);

    let markers: Vec<serde_json::Value> = client.get_markers(&id).await.json().await.unwrap();
    assert!(markers.is_empty());

    // Deleting it again finds nothing
    let response = client.delete_marker(marker_id).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_marker_on_nonexistent_audio_returns_404() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;

    let response = client.add_marker("nonexistent-audio", 1.0, "lost").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client.get_markers("nonexistent-audio").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Playlists
// =============================================================================

#[tokio::test]
async fn test_create_and_get_playlist() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let first = client.upload_test_audio("track one").await;
    let second = client.upload_test_audio("track two").await;

    let response = client
        .create_playlist("practice set", &[second.clone(), first.clone()])
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: serde_json::Value = response.json().await.unwrap();
    let playlist_id = body["id"].as_str().unwrap();

    // Entry order is preserved
    let response = client.get_playlist(playlist_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let playlist: serde_json::Value = response.json().await.unwrap();
    assert_eq!(playlist["name"], "practice set");
    let entries: Vec<&str> = playlist["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e.as_str())
        .collect();
    assert_eq!(entries, vec![second.as_str(), first.as_str()]);
}

#[tokio::test]
async fn test_playlist_rejects_unknown_audio() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let id = client.upload_test_audio("real track").await;

    let response = client
        .create_playlist("broken set", &[id.clone(), "nonexistent-audio".to_string()])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unknown audio in playlist");

    // Nothing was created
    let playlists: Vec<serde_json::Value> = client.get_playlists().await.json().await.unwrap();
    assert!(playlists.is_empty());
}

#[tokio::test]
async fn test_list_own_playlists() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let id = client.upload_test_audio("only track").await;

    client.create_playlist("set one", &[id.clone()]).await;
    client.create_playlist("set two", &[]).await;

    let response = client.get_playlists().await;
    assert_eq!(response.status(), StatusCode::OK);
    let playlists: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(playlists.len(), 2);

    // Other users have their own empty collection
    let other = TestClient::authenticated_other(server.base_url.clone()).await;
    let playlists: Vec<serde_json::Value> = other.get_playlists().await.json().await.unwrap();
    assert!(playlists.is_empty());
}

#[tokio::test]
async fn test_update_playlist() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let first = client.upload_test_audio("track one").await;
    let second = client.upload_test_audio("track two").await;

    let body: serde_json::Value = client
        .create_playlist("rough set", &[first.clone()])
        .await
        .json()
        .await
        .unwrap();
    let playlist_id = body["id"].as_str().unwrap();

    let response = client
        .update_playlist(
            playlist_id,
            &json!({ "name": "final set", "audio_ids": [second, first] }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let playlist: serde_json::Value = client
        .get_playlist(playlist_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(playlist["name"], "final set");
    assert_eq!(playlist["entries"].as_array().unwrap().len(), 2);

    // An update with an unknown entry changes nothing
    let response = client
        .update_playlist(playlist_id, &json!({ "audio_ids": ["nonexistent-audio"] }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let playlist: serde_json::Value = client
        .get_playlist(playlist_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(playlist["entries"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_playlists_are_hidden_from_other_users() {
    let server = TestServer::spawn().await;
    let owner = TestClient::authenticated(server.base_url.clone()).await;
    let id = owner.upload_test_audio("secret track").await;
    let body: serde_json::Value = owner
        .create_playlist("secret set", &[id])
        .await
        .json()
        .await
        .unwrap();
    let playlist_id = body["id"].as_str().unwrap();

    // Non-owners cannot even learn the playlist exists
    let other = TestClient::authenticated_other(server.base_url.clone()).await;
    let response = other.get_playlist(playlist_id).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = other
        .update_playlist(playlist_id, &json!({ "name": "found it" }))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = other.delete_playlist(playlist_id).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Still intact for the owner
    let response = owner.get_playlist(playlist_id).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_playlist_may_reference_other_users_audio() {
    let server = TestServer::spawn().await;
    let owner = TestClient::authenticated(server.base_url.clone()).await;
    let shared_id = owner.upload_test_audio("shared track").await;
    owner.make_audio_public(&shared_id).await;

    let other = TestClient::authenticated_other(server.base_url.clone()).await;
    let response = other.create_playlist("borrowed set", &[shared_id]).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_delete_playlist() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let body: serde_json::Value = client
        .create_playlist("disposable set", &[])
        .await
        .json()
        .await
        .unwrap();
    let playlist_id = body["id"].as_str().unwrap();

    let response = client.delete_playlist(playlist_id).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.get_playlist(playlist_id).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deleting_audio_drops_it_from_playlists() {
    let server = TestServer::spawn().await;
    let client = TestClient::authenticated(server.base_url.clone()).await;
    let keep = client.upload_test_audio("kept track").await;
    let gone = client.upload_test_audio("doomed track").await;

    let body: serde_json::Value = client
        .create_playlist("shrinking set", &[keep.clone(), gone.clone()])
        .await
        .json()
        .await
        .unwrap();
    let playlist_id = body["id"].as_str().unwrap();

    let response = client.delete_audio(&gone).await;
    assert_eq!(response.status(), StatusCode::OK);

    let playlist: serde_json::Value = client
        .get_playlist(playlist_id)
        .await
        .json()
        .await
        .unwrap();
    let entries: Vec<&str> = playlist["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e.as_str())
        .collect();
    assert_eq!(entries, vec![keep.as_str()]);
}
