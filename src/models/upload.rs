//! A single multipart file part persisted to the upload staging area.

use std::path::{Path, PathBuf};

/// A received file part.
///
/// Transient: exists only for the duration of one request. The payload lives
/// at `path` under a generated name until the sequencer moves it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    /// Filename as sent by the client.
    pub original_name: String,

    /// Declared MIME type of the part, if any.
    pub content_type: Option<String>,

    /// Temporary location on disk.
    pub path: PathBuf,

    /// Size in bytes.
    pub size_bytes: u64,
}

impl UploadedFile {
    /// Lowercased extension of the original filename, including the leading dot.
    ///
    /// Returns an empty string when the name has no extension.
    pub fn extension(&self) -> String {
        Path::new(&self.original_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_lowercase()))
            .unwrap_or_default()
    }
}
