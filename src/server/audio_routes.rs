//! Audio upload, metadata, marker and peaks routes.

use super::session::Session;
use super::state::ServerState;
use crate::library::AudioRecord;
use crate::server::metrics::{
    record_normalizer_failure, record_peaks_cache_lookup, record_peaks_generation, record_upload,
};
use crate::upload::{sanitize_filename, FileHandler, FileHandlerError};
use crate::waveform::{PeaksArtifact, PeaksError, PeaksManager};
use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Peaks artifacts never change for a given audio file, so clients may cache
/// them indefinitely.
const PEAKS_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Decide whether a request may read the given audio.
///
/// Owners always have access. Public audio is visible to any session, and to
/// anonymous clients unless the server is configured to require auth.
pub(super) fn evaluate_access(
    require_auth: bool,
    session: &Option<Session>,
    audio: &AudioRecord,
) -> Result<(), StatusCode> {
    if require_auth && session.is_none() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if audio.is_public {
        return Ok(());
    }
    match session {
        None => Err(StatusCode::UNAUTHORIZED),
        Some(session) if session.user_id == audio.user_id => Ok(()),
        Some(_) => Err(StatusCode::FORBIDDEN),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[derive(Serialize)]
struct UploadResponse {
    id: String,
    name: String,
}

#[derive(Deserialize, Debug)]
pub(super) struct UpdateAudioBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Deserialize, Debug)]
pub(super) struct AddMarkerBody {
    pub position_secs: f64,
    pub label: String,
}

struct UploadFields {
    name: String,
    description: Option<String>,
    filename: String,
    data: Bytes,
}

async fn collect_upload_fields(mut multipart: Multipart) -> Result<UploadFields, Response> {
    let mut name: Option<String> = None;
    let mut description: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut data: Option<Bytes> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                debug!("Malformed multipart body: {}", err);
                record_upload("malformed");
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    "malformed multipart body",
                ));
            }
        };
        match field.name() {
            Some("name") => match field.text().await {
                Ok(text) => name = Some(text),
                Err(_) => {
                    record_upload("malformed");
                    return Err(error_response(StatusCode::BAD_REQUEST, "unreadable name field"));
                }
            },
            Some("description") => match field.text().await {
                Ok(text) => description = Some(text),
                Err(_) => {
                    record_upload("malformed");
                    return Err(error_response(
                        StatusCode::BAD_REQUEST,
                        "unreadable description field",
                    ));
                }
            },
            Some("file") => {
                filename = field.file_name().map(|s| s.to_string());
                match field.bytes().await {
                    Ok(bytes) => data = Some(bytes),
                    Err(err) => {
                        debug!("Failed to read upload file field: {}", err);
                        record_upload("malformed");
                        return Err(error_response(
                            StatusCode::BAD_REQUEST,
                            "unreadable file field",
                        ));
                    }
                }
            }
            // Unknown fields are ignored.
            _ => {}
        }
    }

    let name = match name.map(|n| n.trim().to_string()) {
        Some(name) if !name.is_empty() => name,
        _ => {
            record_upload("missing_fields");
            return Err(error_response(StatusCode::BAD_REQUEST, "missing name field"));
        }
    };
    let data = match data {
        Some(data) => data,
        None => {
            record_upload("missing_fields");
            return Err(error_response(StatusCode::BAD_REQUEST, "missing file field"));
        }
    };
    let filename = match filename {
        Some(filename) => filename,
        None => {
            record_upload("missing_fields");
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "file field has no filename",
            ));
        }
    };

    Ok(UploadFields {
        name,
        description,
        filename,
        data,
    })
}

pub async fn upload_audio(
    session: Session,
    State(state): State<ServerState>,
    multipart: Multipart,
) -> Response {
    let fields = match collect_upload_fields(multipart).await {
        Ok(fields) => fields,
        Err(response) => return response,
    };

    let filename = match sanitize_filename(&fields.filename) {
        Ok(filename) => filename,
        Err(err) => {
            debug!("Rejected upload filename {:?}: {}", fields.filename, err);
            record_upload("malformed");
            return error_response(StatusCode::BAD_REQUEST, "invalid filename");
        }
    };
    if !FileHandler::is_supported_audio(&filename) || !FileHandler::is_mp3_content(&fields.data) {
        record_upload("unsupported");
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "only MP3 uploads are supported",
        );
    }

    let audio_id = Uuid::new_v4().to_string();
    let audio_path = match state.file_handler.store_audio(&audio_id, &fields.data).await {
        Ok(path) => path,
        Err(FileHandlerError::FileTooLarge(size, max)) => {
            debug!("Rejected oversized upload: {} > {}", size, max);
            record_upload("too_large");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "file too large");
        }
        Err(err) => {
            error!("Failed to store uploaded audio: {}", err);
            record_upload("io_error");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to store file");
        }
    };

    let record = AudioRecord {
        id: audio_id.clone(),
        user_id: session.user_id,
        name: fields.name.clone(),
        description: fields.description,
        filename,
        is_public: false,
        duration_secs: None,
        created: chrono::Utc::now().timestamp(),
    };
    let add_result = {
        let library = state.library_store.lock().unwrap();
        library.add_audio_record(record)
    };
    if let Err(err) = add_result {
        error!("Failed to create audio record {}: {}", audio_id, err);
        record_upload("io_error");
        // Do not leave the stored file behind without a record.
        if let Err(err) = state.file_handler.delete_audio(&audio_id).await {
            warn!("Failed to clean up stored file for {}: {}", audio_id, err);
        }
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to create record");
    }

    info!("User {} uploaded audio {}", session.user_id, audio_id);
    record_upload("success");

    // Normalization and the first peaks extraction run in the background.
    // Neither failing fails the upload, the peaks route regenerates on
    // demand.
    let normalizer = state.normalizer.clone();
    let peaks_manager = state.peaks_manager.clone();
    let library_store = state.library_store.clone();
    let id = audio_id.clone();
    tokio::spawn(async move {
        if let Some(normalizer) = normalizer {
            if let Err(err) = normalizer.normalize(&audio_path).await {
                warn!("Normalization failed for audio {}: {}", id, err);
                record_normalizer_failure();
            }
        }

        let started = Instant::now();
        match peaks_manager.get_or_generate(&id, &audio_path).await {
            Ok(bytes) => {
                record_peaks_generation("success", started.elapsed());
                store_artifact_duration(&library_store, &id, &bytes);
            }
            Err(err) => {
                record_peaks_generation("failure", started.elapsed());
                warn!("Eager peaks generation failed for audio {}: {}", id, err);
            }
        }
    });

    (
        StatusCode::CREATED,
        Json(UploadResponse {
            id: audio_id,
            name: fields.name,
        }),
    )
        .into_response()
}

fn store_artifact_duration(
    library_store: &super::state::GuardedLibraryStore,
    audio_id: &str,
    artifact_bytes: &[u8],
) {
    let artifact: PeaksArtifact = match serde_json::from_slice(artifact_bytes) {
        Ok(artifact) => artifact,
        Err(err) => {
            warn!("Unreadable peaks artifact for audio {}: {}", audio_id, err);
            return;
        }
    };
    let library = library_store.lock().unwrap();
    if let Err(err) = library.set_audio_duration(audio_id, artifact.duration) {
        warn!("Failed to store duration for audio {}: {}", audio_id, err);
    }
}

pub async fn list_audio(session: Option<Session>, State(state): State<ServerState>) -> Response {
    if state.config.require_auth && session.is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let library = state.library_store.lock().unwrap();
    match library.list_audio_records(session.map(|s| s.user_id)) {
        Ok(records) => Json(records).into_response(),
        Err(err) => {
            error!("Failed to list audio records: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_audio(
    session: Option<Session>,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Response {
    let library = state.library_store.lock().unwrap();
    let audio = match library.get_audio_record(&id) {
        Ok(Some(audio)) => audio,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    match evaluate_access(state.config.require_auth, &session, &audio) {
        Ok(()) => Json(audio).into_response(),
        Err(status) => status.into_response(),
    }
}

pub async fn update_audio(
    session: Session,
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateAudioBody>,
) -> Response {
    let library = state.library_store.lock().unwrap();
    let audio = match library.get_audio_record(&id) {
        Ok(Some(audio)) => audio,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    if audio.user_id != session.user_id {
        return StatusCode::FORBIDDEN.into_response();
    }
    match library.update_audio_record(&id, body.name, body.description, body.is_public) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            error!("Failed to update audio {}: {}", id, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn delete_audio(
    session: Session,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Response {
    {
        let library = state.library_store.lock().unwrap();
        let audio = match library.get_audio_record(&id) {
            Ok(Some(audio)) => audio,
            Ok(None) => return StatusCode::NOT_FOUND.into_response(),
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        };
        if audio.user_id != session.user_id {
            return StatusCode::FORBIDDEN.into_response();
        }
        if let Err(err) = library.delete_audio_record(&id) {
            error!("Failed to delete audio record {}: {}", id, err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    // The record is gone, file and artifact removal is best effort.
    let audio_path = state.file_handler.audio_path(&id);
    if let Err(err) = PeaksManager::remove_artifact(&audio_path).await {
        warn!("Failed to remove peaks artifact for audio {}: {}", id, err);
    }
    if let Err(err) = state.file_handler.delete_audio(&id).await {
        warn!("Failed to remove audio file for {}: {}", id, err);
    }
    info!("User {} deleted audio {}", session.user_id, id);
    StatusCode::OK.into_response()
}

pub async fn get_audio_markers(
    session: Option<Session>,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Response {
    let library = state.library_store.lock().unwrap();
    let audio = match library.get_audio_record(&id) {
        Ok(Some(audio)) => audio,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    if let Err(status) = evaluate_access(state.config.require_auth, &session, &audio) {
        return status.into_response();
    }
    match library.get_audio_markers(&id) {
        Ok(markers) => Json(markers).into_response(),
        Err(err) => {
            error!("Failed to list markers for audio {}: {}", id, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn add_marker(
    session: Session,
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(body): Json<AddMarkerBody>,
) -> Response {
    if !body.position_secs.is_finite() || body.position_secs < 0.0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "marker position must be finite and non-negative",
        );
    }
    let library = state.library_store.lock().unwrap();
    let audio = match library.get_audio_record(&id) {
        Ok(Some(audio)) => audio,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    if audio.user_id != session.user_id {
        return StatusCode::FORBIDDEN.into_response();
    }
    match library.add_marker(&id, body.position_secs, &body.label) {
        Ok(marker) => (StatusCode::CREATED, Json(marker)).into_response(),
        Err(err) => {
            error!("Failed to add marker to audio {}: {}", id, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn delete_marker(
    session: Session,
    State(state): State<ServerState>,
    Path(marker_id): Path<usize>,
) -> Response {
    let library = state.library_store.lock().unwrap();
    let marker = match library.get_marker(marker_id) {
        Ok(Some(marker)) => marker,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let audio = match library.get_audio_record(&marker.audio_id) {
        Ok(Some(audio)) => audio,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    if audio.user_id != session.user_id {
        return StatusCode::FORBIDDEN.into_response();
    }
    match library.delete_marker(marker_id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            error!("Failed to delete marker {}: {}", marker_id, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_audio_peaks(
    session: Option<Session>,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Response {
    let audio = {
        let library = state.library_store.lock().unwrap();
        match library.get_audio_record(&id) {
            Ok(Some(audio)) => audio,
            Ok(None) => return StatusCode::NOT_FOUND.into_response(),
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    };
    if let Err(status) = evaluate_access(state.config.require_auth, &session, &audio) {
        return status.into_response();
    }

    let audio_path = state.file_handler.audio_path(&id);
    let cache_hit = tokio::fs::try_exists(PeaksManager::artifact_path(&audio_path))
        .await
        .unwrap_or(false);
    record_peaks_cache_lookup(cache_hit);

    let started = Instant::now();
    match state.peaks_manager.get_or_generate(&id, &audio_path).await {
        Ok(bytes) => {
            if !cache_hit {
                record_peaks_generation("success", started.elapsed());
                store_artifact_duration(&state.library_store, &id, &bytes);
            }
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CACHE_CONTROL, PEAKS_CACHE_CONTROL)
                .body(bytes.into())
                .unwrap()
        }
        Err(PeaksError::AudioFileMissing) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            if !cache_hit {
                record_peaks_generation("failure", started.elapsed());
            }
            error!("Peaks generation failed for audio {}: {}", id, err);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "waveform generation failed",
            )
        }
    }
}
