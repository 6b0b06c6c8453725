//! Data models for the audio library.

use serde::{Deserialize, Serialize};

/// A single uploaded audio recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRecord {
    pub id: String,
    pub user_id: usize,
    pub name: String,
    pub description: Option<String>,
    pub filename: String,
    pub is_public: bool,
    /// Filled in once the first waveform extraction reports a duration.
    pub duration_secs: Option<f64>,
    pub created: i64,
}

/// A labeled position on a recording's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Marker {
    pub id: usize,
    pub audio_id: String,
    pub position_secs: f64,
    pub label: String,
    pub created: i64,
}

/// An ordered collection of recordings owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub user_id: usize,
    pub name: String,
    pub created: i64,
    pub entries: Vec<String>,
}
