mod models;
mod schema;
mod store;

pub use models::{AudioRecord, Marker, Playlist};
pub use schema::LIBRARY_VERSIONED_SCHEMAS;
pub use store::{LibraryStore, SqliteLibraryStore};
