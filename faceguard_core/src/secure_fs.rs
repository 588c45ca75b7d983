//! FaceGuard - Secure Filesystem Operations
//!
//! Atomic writes, overwrite-before-unlink deletes and the hidden directory.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{GuardError, GuardResult};

/// Marker that keeps media scanners out of the hidden directory
pub const NOMEDIA: &str = ".nomedia";

/// Extension of encrypted hidden files
pub const HIDDEN_EXT: &str = "enc";

/// Extension of in-progress stream output
pub const PART_EXT: &str = "part";

/// Hidden-directory handler
pub struct SecureFs {
    /// Root directory
    root: PathBuf,
}

impl SecureFs {
    /// Open (creating if needed) a hidden directory with its `.nomedia` marker
    pub fn new(root: &Path) -> GuardResult<Self> {
        fs::create_dir_all(root)?;

        let marker = root.join(NOMEDIA);
        if !marker.exists() {
            File::create(&marker)?;
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh, unguessable path for a hidden file
    pub fn allocate(&self) -> PathBuf {
        self.root
            .join(format!("{}.{}", Uuid::new_v4().simple(), HIDDEN_EXT))
    }

    /// Hidden file names currently on disk (marker excluded)
    pub fn list(&self) -> GuardResult<Vec<String>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if name != NOMEDIA {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Unique hidden staging path beside `target`: `.{name}.{uuid}.part`
pub fn staging_path(target: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    if let Some(file_name) = target.file_name() {
        name.push(file_name);
    }
    name.push(format!(".{}.{}", Uuid::new_v4().simple(), PART_EXT));
    target.with_file_name(name)
}

/// Create a staging file. Never opens an existing file.
pub fn create_staging(path: &Path) -> GuardResult<File> {
    Ok(OpenOptions::new().write(true).create_new(true).open(path)?)
}

/// Write `data` to `path` atomically (temp file + rename)
pub fn atomic_write(path: &Path, data: &[u8]) -> GuardResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;

    file.write_all(data)?;
    file.sync_all()?;

    // Rename to final path (atomic on most filesystems)
    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Overwrite with zeros, then unlink
pub fn secure_delete(path: &Path) -> GuardResult<()> {
    if !path.exists() {
        return Ok(());
    }

    let size = fs::metadata(path)?.len() as usize;
    if size > 0 {
        match OpenOptions::new().write(true).open(path) {
            Ok(mut file) => {
                let zeros = vec![0u8; size.min(1024 * 1024)]; // Max 1MB chunks
                let mut remaining = size;
                while remaining > 0 {
                    let to_write = remaining.min(zeros.len());
                    file.write_all(&zeros[..to_write])?;
                    remaining -= to_write;
                }
                file.sync_all()?;
            }
            Err(e) => log::warn!("Could not overwrite {} before delete: {}", path.display(), e),
        }
    }

    fs::remove_file(path)?;
    Ok(())
}

/// Remove a leftover staging file, ignoring absence
pub fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

/// Fail with `NotFound` unless `path` is an existing regular file
pub fn require_file(path: &Path) -> GuardResult<u64> {
    let metadata = fs::metadata(path)
        .map_err(|_| GuardError::NotFound(path.display().to_string()))?;
    if !metadata.is_file() {
        return Err(GuardError::Validation(format!("not a regular file: {}", path.display())));
    }
    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_hidden_dir_marker() {
        let dir = tempdir().unwrap();
        let hidden = SecureFs::new(&dir.path().join("hidden")).unwrap();

        assert!(hidden.root().join(NOMEDIA).exists());
        let path = hidden.allocate();
        assert_eq!(path.extension().unwrap(), HIDDEN_EXT);
        assert_ne!(path, hidden.allocate());

        fs::write(&path, b"x").unwrap();
        assert_eq!(hidden.list().unwrap().len(), 1);
    }

    #[test]
    fn test_atomic_write_and_secure_delete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/data.bin");

        atomic_write(&path, b"payload").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"payload");
        assert!(!path.with_extension("tmp").exists());

        secure_delete(&path).unwrap();
        assert!(!path.exists());
        secure_delete(&path).unwrap();
    }

    #[test]
    fn test_staging_path_and_require_file() {
        let target = Path::new("/x/photo.jpg");
        let p = staging_path(target);
        let name = p.file_name().unwrap().to_str().unwrap();
        assert_eq!(p.parent(), target.parent());
        assert!(name.starts_with(".photo.jpg."));
        assert!(name.ends_with(".part"));
        assert_ne!(p, staging_path(target));

        let dir = tempdir().unwrap();
        assert!(matches!(require_file(&dir.path().join("missing")), Err(GuardError::NotFound(_))));
        assert!(matches!(require_file(dir.path()), Err(GuardError::Validation(_))));
    }

    #[test]
    fn test_create_staging_refuses_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taken.part");
        fs::write(&path, b"keep me").unwrap();

        assert!(matches!(create_staging(&path), Err(GuardError::Io(_))));
        assert_eq!(fs::read(&path).unwrap(), b"keep me");
    }
}
