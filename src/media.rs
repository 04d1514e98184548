//! Media copier: pulls referenced files out of storage into the staging area

use crate::storage::{validate_relative_path, FileStorage};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, error, warn};

/// Read buffer size for media streaming
pub const COPY_CHUNK_SIZE: usize = 8192;

/// Name of the media subtree in the staging area and in archives
pub const MEDIA_DIR_NAME: &str = "media";

/// What happened to each referenced media path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaCopyResult {
    pub copied: Vec<String>,
    pub missing: Vec<String>,
}

impl MediaCopyResult {
    pub fn total(&self) -> usize {
        self.copied.len() + self.missing.len()
    }
}

/// Copy every path into `<staging_root>/media/<path>`.
///
/// A path that is absent from storage, or fails to copy, is recorded as missing;
/// this never fails the backup.
pub fn copy_media_files(
    storage: &dyn FileStorage,
    media_files: &BTreeSet<String>,
    staging_root: &Path,
) -> Result<MediaCopyResult> {
    let media_root = staging_root.join(MEDIA_DIR_NAME);
    fs::create_dir_all(&media_root)?;

    let mut result = MediaCopyResult::default();

    for file_path in media_files {
        match copy_one(storage, file_path, &media_root) {
            Ok(true) => {
                debug!("Copied media file from storage: {}", file_path);
                result.copied.push(file_path.clone());
            }
            Ok(false) => {
                warn!("Media file not found in storage: {}", file_path);
                result.missing.push(file_path.clone());
            }
            Err(e) => {
                error!("Error copying media file {}: {}", file_path, e);
                result.missing.push(file_path.clone());
            }
        }
    }

    Ok(result)
}

fn copy_one(storage: &dyn FileStorage, file_path: &str, media_root: &Path) -> Result<bool> {
    let relative = validate_relative_path(file_path)?;
    if !storage.exists(file_path)? {
        return Ok(false);
    }

    let dest_path = media_root.join(relative);
    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut source = storage.open_read(file_path)?;
    let outcome = stream_to(&mut source, &dest_path);
    if outcome.is_err() {
        let _ = fs::remove_file(&dest_path);
    }
    outcome.map(|_| true)
}

fn stream_to(source: &mut dyn Read, dest_path: &Path) -> Result<u64> {
    let mut dest = File::create(dest_path)?;
    let mut buffer = [0u8; COPY_CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let bytes_read = source.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        dest.write_all(&buffer[..bytes_read])?;
        total += bytes_read as u64;
    }

    dest.flush()?;
    Ok(total)
}
