//! Audio library storage and persistence.
//!
//! Provides SQLite-backed storage for audio records, markers and playlists.

use super::models::{AudioRecord, Marker, Playlist};
use super::schema::LIBRARY_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

/// Trait for audio library storage operations.
pub trait LibraryStore: Send + Sync {
    // === Audio records ===

    /// Add a new audio record.
    fn add_audio_record(&self, record: AudioRecord) -> Result<()>;

    /// Get an audio record by id.
    fn get_audio_record(&self, audio_id: &str) -> Result<Option<AudioRecord>>;

    /// List audio records visible to a user: their own plus public ones.
    /// With no user, only public records are returned. Newest first.
    fn list_audio_records(&self, user_id: Option<usize>) -> Result<Vec<AudioRecord>>;

    /// Update an audio record's name, description or visibility.
    /// Fields left as None keep their current value.
    fn update_audio_record(
        &self,
        audio_id: &str,
        name: Option<String>,
        description: Option<String>,
        is_public: Option<bool>,
    ) -> Result<()>;

    /// Record the duration reported by waveform extraction.
    fn set_audio_duration(&self, audio_id: &str, duration_secs: f64) -> Result<()>;

    /// Delete an audio record. Markers and playlist entries go with it.
    fn delete_audio_record(&self, audio_id: &str) -> Result<()>;

    // === Markers ===

    /// Add a marker to an audio record. The position must be finite and
    /// non-negative.
    fn add_marker(&self, audio_id: &str, position_secs: f64, label: &str) -> Result<Marker>;

    /// Get a marker by id.
    fn get_marker(&self, marker_id: usize) -> Result<Option<Marker>>;

    /// Get all markers of an audio record, ordered by position.
    fn get_audio_markers(&self, audio_id: &str) -> Result<Vec<Marker>>;

    /// Delete a marker by id.
    fn delete_marker(&self, marker_id: usize) -> Result<()>;

    // === Playlists ===

    /// Create a playlist with the given entries. Returns the playlist id.
    /// Entries referencing unknown audio records are rejected.
    fn create_playlist(&self, user_id: usize, name: &str, entries: Vec<String>) -> Result<String>;

    /// Get a playlist with its ordered entries.
    fn get_playlist(&self, playlist_id: &str) -> Result<Option<Playlist>>;

    /// Get the ids of a user's playlists.
    fn get_user_playlists(&self, user_id: usize) -> Result<Vec<String>>;

    /// Rename a playlist and/or replace its entries.
    fn update_playlist(
        &self,
        playlist_id: &str,
        user_id: usize,
        name: Option<String>,
        entries: Option<Vec<String>>,
    ) -> Result<()>;

    /// Delete a playlist given its id and its owner's id.
    fn delete_playlist(&self, playlist_id: &str, user_id: usize) -> Result<()>;
}

/// SQLite-backed library store.
pub struct SqliteLibraryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLibraryStore {
    /// Opens an existing database or creates a new one with the current
    /// schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            LIBRARY_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new library database at {:?}", db_path.as_ref());
            conn
        };

        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        // Read the database version
        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Library database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        if version >= LIBRARY_VERSIONED_SCHEMAS.len() {
            bail!(
                "Library database version {} is too new (max supported: {})",
                version,
                LIBRARY_VERSIONED_SCHEMAS.len() - 1
            );
        }

        LIBRARY_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteLibraryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        LIBRARY_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteLibraryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = LIBRARY_VERSIONED_SCHEMAS.len() - 1;

        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating library database from version {} to {}",
            current_version, target_version
        );

        for schema in LIBRARY_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!("Running library migration to version {}", schema.version);
                migration_fn(conn)?;
            }
        }

        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version),
            [],
        )?;

        Ok(())
    }

    fn row_to_audio_record(row: &rusqlite::Row) -> rusqlite::Result<AudioRecord> {
        Ok(AudioRecord {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            filename: row.get("filename")?,
            is_public: row.get("is_public")?,
            duration_secs: row.get("duration_secs")?,
            created: row.get("created")?,
        })
    }

    fn row_to_marker(row: &rusqlite::Row) -> rusqlite::Result<Marker> {
        Ok(Marker {
            id: row.get("id")?,
            audio_id: row.get("audio_id")?,
            position_secs: row.get("position_secs")?,
            label: row.get("label")?,
            created: row.get("created")?,
        })
    }
}

impl LibraryStore for SqliteLibraryStore {
    // === Audio records ===

    fn add_audio_record(&self, record: AudioRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audio_record (id, user_id, name, description, filename, is_public, duration_secs, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.user_id,
                record.name,
                record.description,
                record.filename,
                record.is_public,
                record.duration_secs,
                record.created,
            ],
        )
        .with_context(|| format!("Failed to add audio record {}", record.id))?;
        Ok(())
    }

    fn get_audio_record(&self, audio_id: &str) -> Result<Option<AudioRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT * FROM audio_record WHERE id = ?1",
                params![audio_id],
                Self::row_to_audio_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list_audio_records(&self, user_id: Option<usize>) -> Result<Vec<AudioRecord>> {
        let conn = self.conn.lock().unwrap();
        let records = match user_id {
            Some(user_id) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM audio_record WHERE user_id = ?1 OR is_public = 1
                     ORDER BY created DESC, id",
                )?;
                let rows = stmt.query_map(params![user_id], Self::row_to_audio_record)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM audio_record WHERE is_public = 1 ORDER BY created DESC, id",
                )?;
                let rows = stmt.query_map([], Self::row_to_audio_record)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(records)
    }

    fn update_audio_record(
        &self,
        audio_id: &str,
        name: Option<String>,
        description: Option<String>,
        is_public: Option<bool>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if let Some(name) = name {
            tx.execute(
                "UPDATE audio_record SET name = ?1 WHERE id = ?2",
                params![name, audio_id],
            )?;
        }
        if let Some(description) = description {
            tx.execute(
                "UPDATE audio_record SET description = ?1 WHERE id = ?2",
                params![description, audio_id],
            )?;
        }
        if let Some(is_public) = is_public {
            tx.execute(
                "UPDATE audio_record SET is_public = ?1 WHERE id = ?2",
                params![is_public, audio_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn set_audio_duration(&self, audio_id: &str, duration_secs: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE audio_record SET duration_secs = ?1 WHERE id = ?2",
            params![duration_secs, audio_id],
        )?;
        Ok(())
    }

    fn delete_audio_record(&self, audio_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM audio_record WHERE id = ?1",
            params![audio_id],
        )?;
        Ok(())
    }

    // === Markers ===

    fn add_marker(&self, audio_id: &str, position_secs: f64, label: &str) -> Result<Marker> {
        if !position_secs.is_finite() || position_secs < 0.0 {
            bail!("Marker position must be finite and non-negative.");
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO marker (audio_id, position_secs, label) VALUES (?1, ?2, ?3)",
            params![audio_id, position_secs, label],
        )?;
        let marker_id = conn.last_insert_rowid();
        let marker = conn.query_row(
            "SELECT * FROM marker WHERE id = ?1",
            params![marker_id],
            Self::row_to_marker,
        )?;
        Ok(marker)
    }

    fn get_marker(&self, marker_id: usize) -> Result<Option<Marker>> {
        let conn = self.conn.lock().unwrap();
        let marker = conn
            .query_row(
                "SELECT * FROM marker WHERE id = ?1",
                params![marker_id],
                Self::row_to_marker,
            )
            .optional()?;
        Ok(marker)
    }

    fn get_audio_markers(&self, audio_id: &str) -> Result<Vec<Marker>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM marker WHERE audio_id = ?1 ORDER BY position_secs")?;
        let markers = stmt
            .query_map(params![audio_id], Self::row_to_marker)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(markers)
    }

    fn delete_marker(&self, marker_id: usize) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM marker WHERE id = ?1", params![marker_id])?;
        Ok(())
    }

    // === Playlists ===

    fn create_playlist(&self, user_id: usize, name: &str, entries: Vec<String>) -> Result<String> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let playlist_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO playlist (id, user_id, name) VALUES (?1, ?2, ?3)",
            params![playlist_id, user_id, name],
        )
        .context("Could not create playlist")?;

        for (position, audio_id) in entries.iter().enumerate() {
            tx.execute(
                "INSERT INTO playlist_entry (playlist_id, audio_id, position) VALUES (?1, ?2, ?3)",
                params![playlist_id, audio_id, position as i64],
            )
            .with_context(|| format!("Unknown audio record {}", audio_id))?;
        }

        tx.commit()?;
        Ok(playlist_id)
    }

    fn get_playlist(&self, playlist_id: &str) -> Result<Option<Playlist>> {
        let conn = self.conn.lock().unwrap();

        let playlist = conn
            .query_row(
                "SELECT * FROM playlist WHERE id = ?1",
                params![playlist_id],
                |row| {
                    Ok(Playlist {
                        id: row.get("id")?,
                        user_id: row.get("user_id")?,
                        name: row.get("name")?,
                        created: row.get("created")?,
                        entries: vec![],
                    })
                },
            )
            .optional()?;

        let mut playlist = match playlist {
            Some(playlist) => playlist,
            None => return Ok(None),
        };

        playlist.entries = conn
            .prepare("SELECT audio_id FROM playlist_entry WHERE playlist_id = ?1 ORDER BY position")?
            .query_map(params![playlist_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(Some(playlist))
    }

    fn get_user_playlists(&self, user_id: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id FROM playlist WHERE user_id = ?1 ORDER BY created, id")?;
        let playlists = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(playlists)
    }

    fn update_playlist(
        &self,
        playlist_id: &str,
        user_id: usize,
        name: Option<String>,
        entries: Option<Vec<String>>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let playlist_user_id: usize = tx.query_row(
            "SELECT user_id FROM playlist WHERE id = ?1",
            params![playlist_id],
            |row| row.get(0),
        )?;
        if user_id != playlist_user_id {
            bail!("User does not own the playlist");
        }

        if let Some(name) = name {
            tx.execute(
                "UPDATE playlist SET name = ?1 WHERE id = ?2",
                params![name, playlist_id],
            )?;
        }

        if let Some(entries) = entries {
            tx.execute(
                "DELETE FROM playlist_entry WHERE playlist_id = ?1",
                params![playlist_id],
            )?;

            for (position, audio_id) in entries.iter().enumerate() {
                tx.execute(
                    "INSERT INTO playlist_entry (playlist_id, audio_id, position) VALUES (?1, ?2, ?3)",
                    params![playlist_id, audio_id, position as i64],
                )
                .with_context(|| format!("Unknown audio record {}", audio_id))?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_playlist(&self, playlist_id: &str, user_id: usize) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM playlist WHERE id = ?1 AND user_id = ?2",
            params![playlist_id, user_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, user_id: usize, is_public: bool) -> AudioRecord {
        AudioRecord {
            id: id.to_string(),
            user_id,
            name: format!("recording {}", id),
            description: None,
            filename: format!("{}.mp3", id),
            is_public,
            duration_secs: None,
            created: 1700000000,
        }
    }

    #[test]
    fn audio_record_round_trip() {
        let store = SqliteLibraryStore::in_memory().unwrap();

        store.add_audio_record(record("a-1", 1, false)).unwrap();

        let stored = store.get_audio_record("a-1").unwrap().unwrap();
        assert_eq!(stored.user_id, 1);
        assert_eq!(stored.name, "recording a-1");
        assert!(!stored.is_public);
        assert!(stored.duration_secs.is_none());

        assert!(store.get_audio_record("missing").unwrap().is_none());

        store.delete_audio_record("a-1").unwrap();
        assert!(store.get_audio_record("a-1").unwrap().is_none());
    }

    #[test]
    fn listing_respects_visibility() {
        let store = SqliteLibraryStore::in_memory().unwrap();

        store.add_audio_record(record("mine", 1, false)).unwrap();
        store.add_audio_record(record("shared", 2, true)).unwrap();
        store.add_audio_record(record("theirs", 2, false)).unwrap();

        let visible: Vec<String> = store
            .list_audio_records(Some(1))
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(visible, vec!["mine".to_string(), "shared".to_string()]);

        let anonymous: Vec<String> = store
            .list_audio_records(None)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(anonymous, vec!["shared".to_string()]);
    }

    #[test]
    fn updates_fields_independently() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.add_audio_record(record("a-1", 1, false)).unwrap();

        store
            .update_audio_record("a-1", Some("renamed".to_string()), None, None)
            .unwrap();
        let stored = store.get_audio_record("a-1").unwrap().unwrap();
        assert_eq!(stored.name, "renamed");
        assert!(!stored.is_public);

        store
            .update_audio_record("a-1", None, Some("a note".to_string()), Some(true))
            .unwrap();
        let stored = store.get_audio_record("a-1").unwrap().unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.description, Some("a note".to_string()));
        assert!(stored.is_public);

        store.set_audio_duration("a-1", 12.5).unwrap();
        let stored = store.get_audio_record("a-1").unwrap().unwrap();
        assert_eq!(stored.duration_secs, Some(12.5));
    }

    #[test]
    fn markers_are_ordered_and_validated() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.add_audio_record(record("a-1", 1, false)).unwrap();

        store.add_marker("a-1", 30.0, "chorus").unwrap();
        let first = store.add_marker("a-1", 1.5, "intro").unwrap();
        assert_eq!(first.audio_id, "a-1");
        assert_eq!(first.label, "intro");

        let labels: Vec<String> = store
            .get_audio_markers("a-1")
            .unwrap()
            .into_iter()
            .map(|m| m.label)
            .collect();
        assert_eq!(labels, vec!["intro".to_string(), "chorus".to_string()]);

        assert!(store.add_marker("a-1", -1.0, "bad").is_err());
        assert!(store.add_marker("a-1", f64::NAN, "bad").is_err());
        assert!(store.add_marker("a-1", f64::INFINITY, "bad").is_err());

        store.delete_marker(first.id).unwrap();
        assert!(store.get_marker(first.id).unwrap().is_none());
    }

    #[test]
    fn deleting_audio_removes_its_markers() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.add_audio_record(record("a-1", 1, false)).unwrap();
        let marker = store.add_marker("a-1", 5.0, "note").unwrap();

        store.delete_audio_record("a-1").unwrap();
        assert!(store.get_marker(marker.id).unwrap().is_none());
    }

    #[test]
    fn handles_playlists() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.add_audio_record(record("a-1", 1, false)).unwrap();
        store.add_audio_record(record("a-2", 1, false)).unwrap();

        let playlist_id = store
            .create_playlist(1, "practice set", vec!["a-2".to_string(), "a-1".to_string()])
            .unwrap();

        let playlist = store.get_playlist(&playlist_id).unwrap().unwrap();
        assert_eq!(playlist.name, "practice set");
        assert_eq!(
            playlist.entries,
            vec!["a-2".to_string(), "a-1".to_string()]
        );

        assert_eq!(store.get_user_playlists(1).unwrap(), vec![playlist_id.clone()]);

        store
            .update_playlist(
                &playlist_id,
                1,
                Some("new name".to_string()),
                Some(vec!["a-1".to_string()]),
            )
            .unwrap();
        let playlist = store.get_playlist(&playlist_id).unwrap().unwrap();
        assert_eq!(playlist.name, "new name");
        assert_eq!(playlist.entries, vec!["a-1".to_string()]);

        // Only the owner may touch it
        assert!(store
            .update_playlist(&playlist_id, 2, Some("stolen".to_string()), None)
            .is_err());
        store.delete_playlist(&playlist_id, 2).unwrap();
        assert!(store.get_playlist(&playlist_id).unwrap().is_some());

        store.delete_playlist(&playlist_id, 1).unwrap();
        assert!(store.get_playlist(&playlist_id).unwrap().is_none());
    }

    #[test]
    fn rejects_playlist_entries_for_unknown_audio() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.add_audio_record(record("a-1", 1, false)).unwrap();

        let result = store.create_playlist(1, "bad", vec!["missing".to_string()]);
        assert!(result.is_err());

        // The failed create leaves nothing behind
        assert!(store.get_user_playlists(1).unwrap().is_empty());
    }

    #[test]
    fn deleting_audio_removes_playlist_entries() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.add_audio_record(record("a-1", 1, false)).unwrap();
        store.add_audio_record(record("a-2", 1, false)).unwrap();
        let playlist_id = store
            .create_playlist(1, "set", vec!["a-1".to_string(), "a-2".to_string()])
            .unwrap();

        store.delete_audio_record("a-1").unwrap();

        let playlist = store.get_playlist(&playlist_id).unwrap().unwrap();
        assert_eq!(playlist.entries, vec!["a-2".to_string()]);
    }
}
