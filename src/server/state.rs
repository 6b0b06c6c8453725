use axum::extract::FromRef;

use crate::library::LibraryStore;
use crate::upload::FileHandler;
use crate::user::UserManager;
use crate::waveform::{AudioNormalizer, PeaksManager};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::ServerConfig;

pub type GuardedUserManager = Arc<Mutex<UserManager>>;
pub type GuardedLibraryStore = Arc<Mutex<Box<dyn LibraryStore>>>;
pub type SharedFileHandler = Arc<FileHandler>;
pub type SharedPeaksManager = Arc<PeaksManager>;
pub type OptionalNormalizer = Option<Arc<dyn AudioNormalizer>>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub user_manager: GuardedUserManager,
    pub library_store: GuardedLibraryStore,
    pub file_handler: SharedFileHandler,
    pub peaks_manager: SharedPeaksManager,
    pub normalizer: OptionalNormalizer,
    pub hash: String,
}

impl FromRef<ServerState> for GuardedUserManager {
    fn from_ref(input: &ServerState) -> Self {
        input.user_manager.clone()
    }
}

impl FromRef<ServerState> for GuardedLibraryStore {
    fn from_ref(input: &ServerState) -> Self {
        input.library_store.clone()
    }
}

impl FromRef<ServerState> for SharedFileHandler {
    fn from_ref(input: &ServerState) -> Self {
        input.file_handler.clone()
    }
}

impl FromRef<ServerState> for SharedPeaksManager {
    fn from_ref(input: &ServerState) -> Self {
        input.peaks_manager.clone()
    }
}

impl FromRef<ServerState> for OptionalNormalizer {
    fn from_ref(input: &ServerState) -> Self {
        input.normalizer.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
