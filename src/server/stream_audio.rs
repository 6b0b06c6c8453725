//! Audio streaming functionality

use super::{audio_routes::evaluate_access, session::Session, state::ServerState};
use axum::{
    body::Body,
    extract::{FromRequestParts, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, BufReader, SeekFrom},
};
use tokio_util::io::ReaderStream;
use tracing::debug;

const HEADER_BYTE_RANGE: &str = "Range";
const STREAM_BUFFER_SIZE: usize = 4096 * 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start_inclusive: Option<u64>,
    end_inclusive: Option<u64>,
}

impl ByteRange {
    pub fn new(start_inclusive: Option<u64>, end_inclusive: Option<u64>) -> ByteRange {
        ByteRange {
            start_inclusive,
            end_inclusive,
        }
    }

    fn parse<S: AsRef<str>>(s: S) -> Option<ByteRange> {
        let v = s.as_ref();
        if !v.starts_with("bytes=") {
            return None;
        }

        let v = &v[6..];
        let parts: Vec<&str> = v.split('-').collect();
        if parts.len() != 2 {
            return None;
        }

        Some(ByteRange {
            start_inclusive: parts[0].parse::<u64>().ok(),
            end_inclusive: parts[1].parse::<u64>().ok(),
        })
    }

    /// Resolve against a concrete file length into an inclusive start and a
    /// byte count. Suffix ranges (`bytes=-N`) mean the last N bytes. Ranges
    /// that do not intersect the file resolve to `None`, which callers treat
    /// as a full response.
    fn resolve(self, file_length: u64) -> Option<(u64, u64)> {
        let (start, count) = match (self.start_inclusive, self.end_inclusive) {
            (None, None) => return None,
            (Some(start), None) => (start, file_length.checked_sub(start)?),
            (None, Some(suffix_len)) => {
                let start = file_length.saturating_sub(suffix_len);
                (start, file_length - start)
            }
            (Some(start), Some(end)) => {
                if end < start {
                    return None;
                }
                let end = end.min(file_length.checked_sub(1)?);
                (start, end.checked_sub(start)? + 1)
            }
        };
        if start >= file_length || count == 0 {
            return None;
        }
        Some((start, count))
    }
}

pub struct ByteRangeExtractionError {}

impl IntoResponse for ByteRangeExtractionError {
    fn into_response(self) -> Response {
        StatusCode::BAD_REQUEST.into_response()
    }
}

impl FromRequestParts<ServerState> for Option<ByteRange> {
    type Rejection = ByteRangeExtractionError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        Ok(parts
            .headers
            .get(HEADER_BYTE_RANGE)
            .map(|x| x.to_str())
            .map(|x| x.ok())
            .and_then(|x| x.and_then(ByteRange::parse)))
    }
}

pub async fn stream_audio(
    session: Option<Session>,
    byte_range: Option<ByteRange>,
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

    let path = state.file_handler.audio_path(&id);
    debug!("Streaming audio {} from path {}", audio.name, path.display());

    let mut file = match File::open(&path).await {
        Ok(x) => x,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return StatusCode::NOT_FOUND.into_response()
        }
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let file_length = match file.metadata().await {
        Ok(x) => x.len(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let resolved = byte_range.and_then(|range| range.resolve(file_length));
    let (start_served, chunk_size, status_code) = match resolved {
        Some((start, count)) => (start, count, StatusCode::PARTIAL_CONTENT),
        None => (0, file_length, StatusCode::OK),
    };

    if start_served > 0 && file.seek(SeekFrom::Start(start_served)).await.is_err() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let file_reader = BufReader::with_capacity(STREAM_BUFFER_SIZE, file.take(chunk_size));
    let stream = ReaderStream::with_capacity(file_reader, STREAM_BUFFER_SIZE);

    let body = Body::from_stream(stream);

    let mut builder = Response::builder()
        .status(status_code)
        .header("Content-Type", "audio/mpeg")
        .header("Accept-Ranges", "bytes")
        .header("Content-Length", chunk_size);
    if status_code == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            "Content-Range",
            format!(
                "bytes {}-{}/{}",
                start_served,
                start_served + chunk_size - 1,
                file_length
            ),
        );
    }
    builder.body(body).unwrap()
}

#[cfg(test)]
mod tests {
    use super::ByteRange;

    fn assert_byte_range(s: &str, a: Option<u64>, b: Option<u64>) {
        assert_eq!(ByteRange::parse(s), Some(ByteRange::new(a, b)));
    }

    fn assert_no_byte_range(s: &str) {
        assert_eq!(ByteRange::parse(s), None);
    }

    #[test]
    fn parses_byte_range() {
        assert_no_byte_range("asd");
        assert_no_byte_range("bytes=");
        assert_byte_range("bytes=-", None, None);
        assert_byte_range("bytes=11-", Some(11), None);
        assert_byte_range("bytes=-111", None, Some(111));
        assert_byte_range("bytes=11-111", Some(11), Some(111));
    }

    #[test]
    fn resolves_open_ended_range() {
        assert_eq!(ByteRange::new(Some(10), None).resolve(100), Some((10, 90)));
        assert_eq!(ByteRange::new(Some(0), None).resolve(100), Some((0, 100)));
    }

    #[test]
    fn resolves_bounded_range_clamped_to_file() {
        assert_eq!(
            ByteRange::new(Some(10), Some(19)).resolve(100),
            Some((10, 10))
        );
        // End past the file is clamped.
        assert_eq!(
            ByteRange::new(Some(90), Some(500)).resolve(100),
            Some((90, 10))
        );
    }

    #[test]
    fn resolves_suffix_range_to_file_tail() {
        assert_eq!(ByteRange::new(None, Some(30)).resolve(100), Some((70, 30)));
        // A suffix longer than the file covers the whole file.
        assert_eq!(ByteRange::new(None, Some(500)).resolve(100), Some((0, 100)));
    }

    #[test]
    fn degenerate_ranges_fall_back_to_full_response() {
        assert_eq!(ByteRange::new(None, None).resolve(100), None);
        assert_eq!(ByteRange::new(Some(100), None).resolve(100), None);
        assert_eq!(ByteRange::new(Some(200), Some(300)).resolve(100), None);
        assert_eq!(ByteRange::new(Some(20), Some(10)).resolve(100), None);
        assert_eq!(ByteRange::new(Some(0), Some(10)).resolve(0), None);
    }
}
