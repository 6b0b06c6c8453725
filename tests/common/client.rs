//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all cuepoint-server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use super::fixtures::TEST_AUDIO_BYTES;
use reqwest::multipart;
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

/// HTTP test client with cookie-based session management
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    /// Creates a new unauthenticated client
    ///
    /// Use this for testing authentication flows and anonymous access.
    /// For most tests, use `authenticated()` instead.
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .cookie_store(true) // Automatically handle session cookies
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    /// Creates a client pre-authenticated as the primary test user
    ///
    /// This is the most common way to create a test client.
    /// The client is ready to make authenticated requests.
    ///
    /// # Panics
    ///
    /// Panics if authentication fails (indicates test infrastructure problem).
    pub async fn authenticated(base_url: String) -> Self {
        let client = Self::new(base_url);

        let response = client.login(TEST_USER, TEST_PASS).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::CREATED,
            "Test user authentication failed: {:?}",
            response.text().await
        );

        client
    }

    /// Creates a client pre-authenticated as the second test user
    ///
    /// Use this for testing ownership and visibility rules.
    ///
    /// # Panics
    ///
    /// Panics if authentication fails (indicates test infrastructure problem).
    pub async fn authenticated_other(base_url: String) -> Self {
        let client = Self::new(base_url);

        let response = client.login(OTHER_USER, OTHER_PASS).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::CREATED,
            "Second user authentication failed: {:?}",
            response.text().await
        );

        client
    }

    // ========================================================================
    // Authentication Endpoints
    // ========================================================================

    /// POST /api/auth/login
    pub async fn login(&self, username: &str, password: &str) -> Response {
        self.client
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&json!({
                "username": username,
                "password": password,
            }))
            .send()
            .await
            .expect("Login request failed")
    }

    /// GET /api/auth/logout
    pub async fn logout(&self) -> Response {
        self.client
            .get(format!("{}/api/auth/logout", self.base_url))
            .send()
            .await
            .expect("Logout request failed")
    }

    /// GET /api/auth/session
    pub async fn get_session(&self) -> Response {
        self.client
            .get(format!("{}/api/auth/session", self.base_url))
            .send()
            .await
            .expect("Get session request failed")
    }

    /// GET / - server stats
    pub async fn get_home(&self) -> Response {
        self.client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .expect("Get home request failed")
    }

    // ========================================================================
    // Upload Endpoint
    // ========================================================================

    /// POST /api/upload with a multipart form
    ///
    /// Fields set to None are left out of the form entirely.
    pub async fn upload(
        &self,
        name: Option<&str>,
        description: Option<&str>,
        filename: Option<&str>,
        data: Option<Vec<u8>>,
    ) -> Response {
        let mut form = multipart::Form::new();
        if let Some(name) = name {
            form = form.text("name", name.to_string());
        }
        if let Some(description) = description {
            form = form.text("description", description.to_string());
        }
        if let Some(data) = data {
            let mut part = multipart::Part::bytes(data);
            if let Some(filename) = filename {
                part = part.file_name(filename.to_string());
            }
            form = form.part("file", part);
        }

        self.client
            .post(format!("{}/api/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    /// Uploads the embedded test audio and returns the new audio id
    ///
    /// # Panics
    ///
    /// Panics if the upload does not return 201 Created.
    pub async fn upload_test_audio(&self, name: &str) -> String {
        let response = self
            .upload(
                Some(name),
                None,
                Some("take.mp3"),
                Some(TEST_AUDIO_BYTES.to_vec()),
            )
            .await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::CREATED,
            "Test upload failed: {:?}",
            response.text().await
        );
        let body: serde_json::Value = response.json().await.expect("Upload response not JSON");
        body["id"]
            .as_str()
            .expect("Upload response has no id")
            .to_string()
    }

    // ========================================================================
    // Audio Endpoints
    // ========================================================================

    /// GET /api/audio
    pub async fn list_audio(&self) -> Response {
        self.client
            .get(format!("{}/api/audio", self.base_url))
            .send()
            .await
            .expect("List audio request failed")
    }

    /// GET /api/audio/{id}
    pub async fn get_audio(&self, id: &str) -> Response {
        self.client
            .get(format!("{}/api/audio/{}", self.base_url, id))
            .send()
            .await
            .expect("Get audio request failed")
    }

    /// PUT /api/audio/{id}
    pub async fn update_audio(&self, id: &str, body: &serde_json::Value) -> Response {
        self.client
            .put(format!("{}/api/audio/{}", self.base_url, id))
            .json(body)
            .send()
            .await
            .expect("Update audio request failed")
    }

    /// Marks an audio record public via PUT /api/audio/{id}
    ///
    /// # Panics
    ///
    /// Panics if the update does not return 200 OK.
    pub async fn make_audio_public(&self, id: &str) {
        let response = self.update_audio(id, &json!({ "is_public": true })).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::OK,
            "Failed to make audio {} public",
            id
        );
    }

    /// DELETE /api/audio/{id}
    pub async fn delete_audio(&self, id: &str) -> Response {
        self.client
            .delete(format!("{}/api/audio/{}", self.base_url, id))
            .send()
            .await
            .expect("Delete audio request failed")
    }

    // ========================================================================
    // Streaming and Peaks Endpoints
    // ========================================================================

    /// GET /api/audio/{id}/file
    pub async fn stream_audio(&self, id: &str) -> Response {
        self.client
            .get(format!("{}/api/audio/{}/file", self.base_url, id))
            .send()
            .await
            .expect("Stream audio request failed")
    }

    /// GET /api/audio/{id}/file with Range header
    pub async fn stream_audio_with_range(&self, id: &str, range: &str) -> Response {
        self.client
            .get(format!("{}/api/audio/{}/file", self.base_url, id))
            .header("Range", range)
            .send()
            .await
            .expect("Stream audio with range request failed")
    }

    /// GET /api/audio/{id}/peaks
    pub async fn get_peaks(&self, id: &str) -> Response {
        self.client
            .get(format!("{}/api/audio/{}/peaks", self.base_url, id))
            .send()
            .await
            .expect("Get peaks request failed")
    }

    // ========================================================================
    // Marker Endpoints
    // ========================================================================

    /// GET /api/audio/{id}/markers
    pub async fn get_markers(&self, id: &str) -> Response {
        self.client
            .get(format!("{}/api/audio/{}/markers", self.base_url, id))
            .send()
            .await
            .expect("Get markers request failed")
    }

    /// POST /api/audio/{id}/markers
    pub async fn add_marker(&self, id: &str, position_secs: f64, label: &str) -> Response {
        self.client
            .post(format!("{}/api/audio/{}/markers", self.base_url, id))
            .json(&json!({
                "position_secs": position_secs,
                "label": label,
            }))
            .send()
            .await
            .expect("Add marker request failed")
    }

    /// DELETE /api/markers/{id}
    pub async fn delete_marker(&self, marker_id: u64) -> Response {
        self.client
            .delete(format!("{}/api/markers/{}", self.base_url, marker_id))
            .send()
            .await
            .expect("Delete marker request failed")
    }

    // ========================================================================
    // Playlist Endpoints
    // ========================================================================

    /// POST /api/playlists
    pub async fn create_playlist(&self, name: &str, audio_ids: &[String]) -> Response {
        self.client
            .post(format!("{}/api/playlists", self.base_url))
            .json(&json!({
                "name": name,
                "audio_ids": audio_ids,
            }))
            .send()
            .await
            .expect("Create playlist request failed")
    }

    /// GET /api/playlists
    pub async fn get_playlists(&self) -> Response {
        self.client
            .get(format!("{}/api/playlists", self.base_url))
            .send()
            .await
            .expect("Get playlists request failed")
    }

    /// GET /api/playlists/{id}
    pub async fn get_playlist(&self, id: &str) -> Response {
        self.client
            .get(format!("{}/api/playlists/{}", self.base_url, id))
            .send()
            .await
            .expect("Get playlist request failed")
    }

    /// PUT /api/playlists/{id}
    pub async fn update_playlist(&self, id: &str, body: &serde_json::Value) -> Response {
        self.client
            .put(format!("{}/api/playlists/{}", self.base_url, id))
            .json(body)
            .send()
            .await
            .expect("Update playlist request failed")
    }

    /// DELETE /api/playlists/{id}
    pub async fn delete_playlist(&self, id: &str) -> Response {
        self.client
            .delete(format!("{}/api/playlists/{}", self.base_url, id))
            .send()
            .await
            .expect("Delete playlist request failed")
    }
}
