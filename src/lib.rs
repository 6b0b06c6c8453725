//! Cuepoint Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod library;
pub mod offline_cache;
pub mod server;
pub mod sqlite_persistence;
pub mod upload;
pub mod user;
pub mod waveform;

// Re-export commonly used types for convenience
pub use library::{LibraryStore, SqliteLibraryStore};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig};
pub use upload::FileHandler;
pub use user::{SqliteUserStore, UserStore};
pub use waveform::{PeaksManager, WaveformDecoder};
