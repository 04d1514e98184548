//! File storage backends.
//!
//! The engine only needs four operations on durable storage, keyed by
//! storage-relative paths using `/` separators.

use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Durable object storage for media files and archives
pub trait FileStorage: Send + Sync {
    fn exists(&self, path: &str) -> Result<bool>;

    /// Open an object for streaming reads
    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Write an object from a stream, replacing any existing object; returns bytes written
    fn write(&self, path: &str, content: &mut dyn Read) -> Result<u64>;

    fn delete(&self, path: &str) -> Result<()>;
}

/// Reject absolute paths and parent-directory components
pub fn validate_relative_path(path: &str) -> Result<&Path> {
    let candidate = Path::new(path);
    let valid = !path.is_empty()
        && candidate
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));

    if valid {
        Ok(candidate)
    } else {
        Err(Error::InvalidPath {
            path: path.to_string(),
        })
    }
}

/// Write `content` to `target` through a uniquely named sibling temp file.
///
/// Concurrent writers each stage their own file, so the last rename wins
/// and the target always holds one complete payload.
fn write_atomically(target: &Path, content: &mut dyn Read) -> Result<u64> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut staged = NamedTempFile::new_in(parent)?;
    let written = io::copy(content, &mut staged)?;
    staged.flush()?;
    staged.persist(target).map_err(|e| e.error)?;
    Ok(written)
}

/// Storage rooted in a local directory
#[derive(Debug, Clone)]
pub struct LocalFsStorage {
    root: PathBuf,
}

impl LocalFsStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a storage path
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_relative_path(path)?))
    }
}

impl FileStorage for LocalFsStorage {
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.is_file())
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let full_path = self.resolve(path)?;
        match File::open(&full_path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::Storage {
                reason: format!("{} does not exist", path),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &str, content: &mut dyn Read) -> Result<u64> {
        let full_path = self.resolve(path)?;
        let written = write_atomically(&full_path, content)?;
        debug!("Stored {} ({} bytes)", path, written);
        Ok(written)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve(path)?;
        match fs::remove_file(&full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::Storage {
                reason: format!("{} does not exist", path),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
