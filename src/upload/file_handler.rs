//! File handling for audio uploads.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Errors that can occur during file handling.
#[derive(Debug, Error)]
pub enum FileHandlerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File too large: {0} bytes (max: {1})")]
    FileTooLarge(u64, u64),
}

/// Supported upload extensions. Uploads are stored and served as mp3, so
/// nothing else is accepted.
const SUPPORTED_UPLOAD_EXTENSIONS: &[&str] = &["mp3"];

/// File handler for managing uploaded audio files.
pub struct FileHandler {
    /// Directory holding the stored audio files.
    audio_dir: PathBuf,
    /// Maximum file size in bytes.
    max_file_size: u64,
}

impl FileHandler {
    /// Create a new file handler.
    pub fn new(audio_dir: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            audio_dir: audio_dir.into(),
            max_file_size,
        }
    }

    /// Get the audio directory path.
    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    /// Get the maximum accepted file size in bytes.
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Initialize the file handler (creates the audio directory).
    pub async fn init(&self) -> Result<(), FileHandlerError> {
        fs::create_dir_all(&self.audio_dir).await?;
        Ok(())
    }

    /// The on-disk path of a stored audio file.
    pub fn audio_path(&self, audio_id: &str) -> PathBuf {
        self.audio_dir.join(format!("{}.mp3", audio_id))
    }

    /// Save uploaded bytes under the given audio id.
    pub async fn store_audio(
        &self,
        audio_id: &str,
        data: &[u8],
    ) -> Result<PathBuf, FileHandlerError> {
        // Validate file size
        let size = data.len() as u64;
        if size > self.max_file_size {
            return Err(FileHandlerError::FileTooLarge(size, self.max_file_size));
        }

        // Write file
        let file_path = self.audio_path(audio_id);
        let mut file = fs::File::create(&file_path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(file_path)
    }

    /// Remove a stored audio file. Missing files are not an error.
    pub async fn delete_audio(&self, audio_id: &str) -> Result<(), FileHandlerError> {
        match fs::remove_file(self.audio_path(audio_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Check if a filename carries a supported upload extension.
    pub fn is_supported_audio(filename: &str) -> bool {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        ext.map(|e| SUPPORTED_UPLOAD_EXTENSIONS.contains(&e.as_str()))
            .unwrap_or(false)
    }

    /// Check that the uploaded bytes actually look like mp3 audio, whatever
    /// the filename claims.
    pub fn is_mp3_content(data: &[u8]) -> bool {
        infer::get(data)
            .map(|kind| kind.mime_type() == "audio/mpeg")
            .unwrap_or(false)
    }
}

/// Sanitize a filename to prevent path traversal attacks.
pub fn sanitize_filename(filename: &str) -> Result<String, FileHandlerError> {
    // Get just the filename part (no path)
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FileHandlerError::InvalidFilename(filename.to_string()))?;

    // Check for suspicious patterns:
    // - Null bytes are never allowed
    // - Hidden files (starting with .) are not allowed
    // - Exact ".." is path traversal (but "..." as ellipsis in a name is fine)
    if name.contains('\0') || name.starts_with('.') || name == ".." {
        return Err(FileHandlerError::InvalidFilename(filename.to_string()));
    }

    // Replace problematic characters (keep Unicode letters/symbols)
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    if sanitized.is_empty() {
        return Err(FileHandlerError::InvalidFilename(filename.to_string()));
    }

    Ok(sanitized)
}
