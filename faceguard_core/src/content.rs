//! FaceGuard - Protected content records

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of protected content, derived from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    File,
    Image,
    Video,
    Text,
    App,
}

impl ContentKind {
    /// Classify a path by extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" | "bmp") => ContentKind::Image,
            Some("mp4" | "mkv" | "mov" | "avi" | "webm" | "3gp") => ContentKind::Video,
            Some("txt" | "md" | "csv" | "json" | "log" | "xml") => ContentKind::Text,
            Some("apk") => ContentKind::App,
            _ => ContentKind::File,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            ContentKind::File => "File",
            ContentKind::Image => "Image",
            ContentKind::Video => "Video",
            ContentKind::Text => "Text",
            ContentKind::App => "App",
        }
    }
}

/// A file under vault protection.
///
/// Exactly one of `original_path` / `hidden_path` exists on disk at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenFile {
    pub id: String,
    pub name: String,
    pub kind: ContentKind,
    pub original_path: PathBuf,
    pub hidden_path: Option<PathBuf>,
    pub is_encrypted: bool,
    pub encryption_key_id: Option<String>,
    /// Plaintext size in bytes
    pub size: u64,
    /// Hex SHA-256 of the plaintext, recorded at hide time
    pub hash: Option<String>,
    pub date_hidden: Option<DateTime<Utc>>,
    pub last_access: DateTime<Utc>,
}

impl HiddenFile {
    /// New, not yet hidden, record for `path`
    pub fn new(id: String, path: &Path, size: u64) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Self {
            id,
            name,
            kind: ContentKind::from_path(path),
            original_path: path.to_path_buf(),
            hidden_path: None,
            is_encrypted: false,
            encryption_key_id: None,
            size,
            hash: None,
            date_hidden: None,
            last_access: Utc::now(),
        }
    }

    /// Path where the content currently lives
    pub fn current_path(&self) -> &Path {
        match (&self.hidden_path, self.is_encrypted) {
            (Some(hidden), true) => hidden,
            _ => &self.original_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(ContentKind::from_path(Path::new("a/b/IMG_001.JPG")), ContentKind::Image);
        assert_eq!(ContentKind::from_path(Path::new("clip.mp4")), ContentKind::Video);
        assert_eq!(ContentKind::from_path(Path::new("notes.txt")), ContentKind::Text);
        assert_eq!(ContentKind::from_path(Path::new("tool.apk")), ContentKind::App);
        assert_eq!(ContentKind::from_path(Path::new("archive")), ContentKind::File);
        assert_eq!(ContentKind::Video.label(), "Video");
    }

    #[test]
    fn test_new_record() {
        let f = HiddenFile::new("id-1".into(), Path::new("/data/secret.png"), 42);
        assert_eq!(f.name, "secret.png");
        assert_eq!(f.kind, ContentKind::Image);
        assert!(!f.is_encrypted);
        assert_eq!(f.current_path(), Path::new("/data/secret.png"));
    }
}
