use anyhow::Result;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tracing::{debug, error, info};

use crate::library::LibraryStore;
use crate::upload::FileHandler;
use crate::user::{AuthTokenValue, UserManager, UserStore};
use crate::waveform::PeaksManager;
use axum_extra::extract::cookie::{Cookie, SameSite};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::services::ServeDir;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{response, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::audio_routes::{
    add_marker, delete_audio, delete_marker, get_audio, get_audio_markers, get_audio_peaks,
    list_audio, update_audio, upload_audio,
};
use super::session::Session;
use super::stream_audio::stream_audio;
use super::{
    http_cache, log_requests, metrics::record_login_attempt, rate_limit_error_handler, state::*,
    IpKeyExtractor, ServerConfig, LOGIN_BURST_SIZE, LOGIN_REPLENISH_INTERVAL_SEC,
};

#[derive(Serialize)]
struct ServerStats {
    pub name: &'static str,
    pub version: &'static str,
    pub uptime: String,
    pub hash: String,
    pub session_token: Option<String>,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Deserialize, Debug)]
struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct LoginSuccessResponse {
    token: String,
}

#[derive(Serialize)]
struct SessionInfo {
    user_id: usize,
    handle: String,
}

#[derive(Deserialize, Debug)]
struct CreatePlaylistBody {
    pub name: String,
    pub audio_ids: Vec<String>,
}

#[derive(Serialize)]
struct CreatePlaylistResponse {
    id: String,
}

#[derive(Deserialize, Debug)]
struct UpdatePlaylistBody {
    pub name: Option<String>,
    pub audio_ids: Option<Vec<String>>,
}

async fn home(session: Option<Session>, State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        name: env!("CARGO_PKG_NAME"),
        version: env!("APP_VERSION"),
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
        session_token: session.map(|s| s.token),
    };
    Json(stats)
}

async fn login(
    State(user_manager): State<GuardedUserManager>,
    Json(body): Json<LoginBody>,
) -> Response {
    debug!("login() called for user {}", body.username);
    let start = Instant::now();
    let mut locked_manager = user_manager.lock().unwrap();
    if let Ok(Some(credentials)) = locked_manager.get_user_credentials(&body.username) {
        if let Some(password_credentials) = &credentials.username_password {
            if let Ok(true) = password_credentials.hasher.verify(
                &body.password,
                &password_credentials.hash,
                &password_credentials.salt,
            ) {
                return match locked_manager.generate_auth_token(&credentials) {
                    Ok(auth_token) => {
                        record_login_attempt("success", start.elapsed());
                        let response_body = LoginSuccessResponse {
                            token: auth_token.value.0.clone(),
                        };
                        let response_body = serde_json::to_string(&response_body).unwrap();

                        let cookie_value = HeaderValue::from_str(&format!(
                            "session_token={}; Path=/; HttpOnly",
                            auth_token.value.0.clone()
                        ))
                        .unwrap();
                        response::Builder::new()
                            .status(StatusCode::CREATED)
                            .header(axum::http::header::SET_COOKIE, cookie_value)
                            .body(Body::from(response_body))
                            .unwrap()
                    }
                    Err(err) => {
                        error!("Error with auth token generation: {}", err);
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                };
            }
        }
    }
    record_login_attempt("failure", start.elapsed());
    StatusCode::FORBIDDEN.into_response()
}

async fn logout(State(user_manager): State<GuardedUserManager>, session: Session) -> Response {
    let mut locked_manager = user_manager.lock().unwrap();
    match locked_manager.delete_auth_token(&session.user_id, &AuthTokenValue(session.token)) {
        Ok(()) => {
            let cookie_value = Cookie::build(Cookie::new("session_token", ""))
                .path("/")
                .expires(time::OffsetDateTime::now_utc() - time::Duration::days(1)) // Expire it in the past
                .same_site(SameSite::Lax)
                .build();

            response::Builder::new()
                .status(StatusCode::OK)
                .header(axum::http::header::SET_COOKIE, cookie_value.to_string())
                .body(Body::empty())
                .unwrap()
        }
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn get_session(
    session: Session,
    State(user_manager): State<GuardedUserManager>,
) -> Response {
    let locked_manager = user_manager.lock().unwrap();
    match locked_manager.get_user_handle(session.user_id) {
        Ok(Some(handle)) => Json(SessionInfo {
            user_id: session.user_id,
            handle,
        })
        .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to resolve session user handle: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// All playlist audio ids must exist. The check runs under the store lock,
/// so writes cannot race it.
fn unknown_entry_response(
    library: &std::sync::MutexGuard<'_, Box<dyn LibraryStore>>,
    audio_ids: &[String],
) -> Option<Response> {
    for audio_id in audio_ids {
        match library.get_audio_record(audio_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Some(
                    (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({ "error": "unknown audio in playlist" })),
                    )
                        .into_response(),
                )
            }
            Err(_) => return Some(StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        }
    }
    None
}

async fn post_playlist(
    session: Session,
    State(library_store): State<GuardedLibraryStore>,
    Json(body): Json<CreatePlaylistBody>,
) -> Response {
    let library = library_store.lock().unwrap();
    if let Some(response) = unknown_entry_response(&library, &body.audio_ids) {
        return response;
    }
    match library.create_playlist(session.user_id, &body.name, body.audio_ids) {
        Ok(id) => (StatusCode::CREATED, Json(CreatePlaylistResponse { id })).into_response(),
        Err(err) => {
            error!("Failed to create playlist: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn get_playlist(
    session: Session,
    State(library_store): State<GuardedLibraryStore>,
    Path(id): Path<String>,
) -> Response {
    let library = library_store.lock().unwrap();
    match library.get_playlist(&id) {
        Ok(Some(playlist)) => {
            if playlist.user_id == session.user_id {
                Json(playlist).into_response()
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn get_user_playlists(
    session: Session,
    State(library_store): State<GuardedLibraryStore>,
) -> Response {
    let library = library_store.lock().unwrap();
    let ids = match library.get_user_playlists(session.user_id) {
        Ok(ids) => ids,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let mut playlists = Vec::with_capacity(ids.len());
    for id in ids {
        match library.get_playlist(&id) {
            Ok(Some(playlist)) => playlists.push(playlist),
            Ok(None) => {}
            Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
    Json(playlists).into_response()
}

async fn put_playlist(
    session: Session,
    State(library_store): State<GuardedLibraryStore>,
    Path(id): Path<String>,
    Json(body): Json<UpdatePlaylistBody>,
) -> Response {
    debug!("Updating playlist with id {}", id);
    let library = library_store.lock().unwrap();
    match library.get_playlist(&id) {
        Ok(Some(playlist)) if playlist.user_id == session.user_id => {}
        Ok(_) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
    if let Some(audio_ids) = &body.audio_ids {
        if let Some(response) = unknown_entry_response(&library, audio_ids) {
            return response;
        }
    }
    match library.update_playlist(&id, session.user_id, body.name, body.audio_ids) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            debug!("Error updating playlist: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn delete_playlist(
    session: Session,
    State(library_store): State<GuardedLibraryStore>,
    Path(id): Path<String>,
) -> Response {
    let library = library_store.lock().unwrap();
    match library.get_playlist(&id) {
        Ok(Some(playlist)) if playlist.user_id == session.user_id => {}
        Ok(_) => return StatusCode::NOT_FOUND.into_response(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
    match library.delete_playlist(&id, session.user_id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

impl ServerState {
    fn new(
        config: ServerConfig,
        user_manager: UserManager,
        library_store: Box<dyn LibraryStore>,
        file_handler: FileHandler,
        peaks_manager: PeaksManager,
        normalizer: OptionalNormalizer,
        hash: String,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            user_manager: Arc::new(Mutex::new(user_manager)),
            library_store: Arc::new(Mutex::new(library_store)),
            file_handler: Arc::new(file_handler),
            peaks_manager: Arc::new(peaks_manager),
            normalizer,
            hash,
        }
    }
}

pub fn make_app(
    config: ServerConfig,
    user_store: Box<dyn UserStore>,
    library_store: Box<dyn LibraryStore>,
    file_handler: FileHandler,
    peaks_manager: PeaksManager,
    normalizer: OptionalNormalizer,
    hash: String,
) -> Result<Router> {
    let user_manager = UserManager::new(user_store);
    let state = ServerState::new(
        config.clone(),
        user_manager,
        library_store,
        file_handler,
        peaks_manager,
        normalizer,
        hash,
    );

    let login_governor = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(LOGIN_REPLENISH_INTERVAL_SEC)
            .burst_size(LOGIN_BURST_SIZE)
            .key_extractor(IpKeyExtractor)
            .finish()
            .expect("Failed to build login rate limiter"),
    );

    let auth_routes: Router = Router::new()
        .route(
            "/login",
            post(login).layer(
                GovernorLayer::new(login_governor).error_handler(rate_limit_error_handler),
            ),
        )
        .route("/logout", get(logout))
        .route("/session", get(get_session))
        .with_state(state.clone());

    let upload_body_limit = (state.file_handler.max_file_size() as usize).saturating_mul(2);
    let upload_routes: Router = Router::new()
        .route("/upload", post(upload_audio))
        .layer(DefaultBodyLimit::max(upload_body_limit))
        .with_state(state.clone());

    let audio_routes: Router = Router::new()
        .route("/audio", get(list_audio))
        .route("/audio/{id}", get(get_audio))
        .route("/audio/{id}", put(update_audio))
        .route("/audio/{id}", delete(delete_audio))
        .route("/audio/{id}/file", get(stream_audio))
        .route("/audio/{id}/peaks", get(get_audio_peaks))
        .route("/audio/{id}/markers", get(get_audio_markers))
        .route("/audio/{id}/markers", post(add_marker))
        .route("/markers/{id}", delete(delete_marker))
        .layer(middleware::from_fn_with_state(
            config.content_cache_age_sec,
            http_cache,
        ))
        .with_state(state.clone());

    let playlist_routes: Router = Router::new()
        .route("/playlists", post(post_playlist))
        .route("/playlists", get(get_user_playlists))
        .route("/playlists/{id}", get(get_playlist))
        .route("/playlists/{id}", put(put_playlist))
        .route("/playlists/{id}", delete(delete_playlist))
        .with_state(state.clone());

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    let mut app: Router = home_router.nest("/api/auth", auth_routes).nest(
        "/api",
        audio_routes.merge(upload_routes).merge(playlist_routes),
    );

    app = app.layer(middleware::from_fn_with_state(state.clone(), log_requests));

    Ok(app)
}

pub async fn run_server(
    config: ServerConfig,
    user_store: Box<dyn UserStore>,
    library_store: Box<dyn LibraryStore>,
    file_handler: FileHandler,
    peaks_manager: PeaksManager,
    normalizer: OptionalNormalizer,
    hash: String,
) -> Result<()> {
    let port = config.port;
    let app = make_app(
        config,
        user_store,
        library_store,
        file_handler,
        peaks_manager,
        normalizer,
        hash,
    )?;

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("Server listening on port {}", port);

    Ok(
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?,
    )
}
