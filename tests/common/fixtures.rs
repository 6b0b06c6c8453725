//! Test fixture creation for user databases and upload payloads
//!
//! The library database starts empty in every test; recordings enter it
//! through the upload endpoint, the same way they do in production.

use super::constants::*;
use anyhow::Result;
use cuepoint_server::user::auth::CuepointHasher;
use cuepoint_server::user::{
    SqliteUserStore, UserAuthCredentials, UserAuthCredentialsStore, UserStore,
    UsernamePasswordCredentials,
};
use std::path::Path;
use std::time::SystemTime;

/// Test audio file embedded at compile time. An ID3v2 header followed by
/// patterned bytes, enough for content sniffing and range assertions.
pub const TEST_AUDIO_BYTES: &[u8] = include_bytes!("../fixtures/test-audio.mp3");

/// Creates a user database at the given path with both test users
pub fn create_test_db_with_users(db_path: &Path) -> Result<SqliteUserStore> {
    let store = SqliteUserStore::new(db_path)?;

    let user_id = create_user_with_password(&store, TEST_USER, TEST_PASS)?;
    eprintln!("Created test user {} with id {}", TEST_USER, user_id);

    let other_id = create_user_with_password(&store, OTHER_USER, OTHER_PASS)?;
    eprintln!("Created test user {} with id {}", OTHER_USER, other_id);

    Ok(store)
}

/// Creates a user with the given credentials
pub fn create_user_with_password(
    store: &SqliteUserStore,
    username: &str,
    password: &str,
) -> Result<usize> {
    // Create user
    let user_id = store.create_user(username)?;

    // Create password credentials using the hasher
    let hasher = CuepointHasher::Argon2;
    let salt = hasher.generate_b64_salt();
    let hash = hasher.hash(password.as_bytes(), &salt)?;

    let password_credentials = UsernamePasswordCredentials {
        user_id,
        salt,
        hash,
        hasher,
        created: SystemTime::now(),
        last_tried: None,
        last_used: None,
    };

    let credentials = UserAuthCredentials {
        user_id,
        username_password: Some(password_credentials),
    };

    // Store credentials
    store.update_user_auth_credentials(credentials)?;

    Ok(user_id)
}
