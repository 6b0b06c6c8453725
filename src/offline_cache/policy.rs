//! Request classification rules.
//!
//! A request is classified once, by path and Accept header, and the first
//! matching rule wins. The class decides which partition (if any) holds the
//! response and whether the cache or the network is consulted first.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref AUDIO_FILE_ROUTE: Regex =
        Regex::new("^/api/audio/[^/]+/file$").expect("Failed to compile audio route pattern");
}

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "oga", "m4a", "aac", "flac", "opus"];

const STATIC_EXTENSIONS: &[&str] = &[
    "html", "css", "js", "mjs", "json", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff",
    "woff2", "ttf", "map", "webmanifest", "txt",
];

/// How a request moves through the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Authentication traffic. Never cached, never served from cache.
    Auth,
    /// Audio payloads. Cache-first against the audio partition.
    AudioBytes,
    /// Static assets. Cache-first against the static partition.
    StaticAsset,
    /// API calls. Network-first with the api partition as fallback.
    Api,
    /// Anything else. Network-first with no stored fallback.
    Other,
}

/// Classify a request path (no query string) plus its Accept header.
pub fn classify(path: &str, accept: Option<&str>) -> RequestClass {
    if path.starts_with("/api/auth/") {
        return RequestClass::Auth;
    }
    let wants_audio = accept
        .map(|value| value.trim_start().starts_with("audio/"))
        .unwrap_or(false);
    if AUDIO_FILE_ROUTE.is_match(path) || has_extension(path, AUDIO_EXTENSIONS) || wants_audio {
        return RequestClass::AudioBytes;
    }
    if has_extension(path, STATIC_EXTENSIONS) {
        return RequestClass::StaticAsset;
    }
    if path.starts_with("/api/") {
        return RequestClass::Api;
    }
    RequestClass::Other
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            extensions.iter().any(|candidate| *candidate == ext)
        }
        _ => false,
    }
}
