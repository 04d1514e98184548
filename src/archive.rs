//! Backup archive packaging and reading.
//!
//! Every archive is a deflate-compressed zip with a fixed layout:
//!
//! ```text
//! backup.json            serialized records
//! media/<path>           media files, path-preserving
//! backup_manifest.json   format description
//! ```
//!
//! Readers locate entries by these names, never by scanning.

use crate::media::MEDIA_DIR_NAME;
use crate::record::SerializedRecord;
use crate::storage::validate_relative_path;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const BACKUP_JSON: &str = "backup.json";
pub const MANIFEST_JSON: &str = "backup_manifest.json";
pub const MEDIA_PREFIX: &str = "media/";
pub const FORMAT_VERSION: &str = "1.0";

/// Format versions this build can restore
pub const SUPPORTED_FORMAT_VERSIONS: &[&str] = &[FORMAT_VERSION];

/// Contents of `backup_manifest.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub backup_type: String,
    pub created_at: DateTime<Utc>,
    pub json_file: String,
    pub media_directory: String,
    pub format_version: String,
}

impl ArchiveManifest {
    pub fn new(backup_type: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            backup_type: backup_type.to_string(),
            created_at,
            json_file: BACKUP_JSON.to_string(),
            media_directory: MEDIA_PREFIX.to_string(),
            format_version: FORMAT_VERSION.to_string(),
        }
    }
}

/// Package `json_path` and `<staging_root>/media` into `<staging_root>/<archive_name>.zip`.
///
/// On any failure the partial archive is removed before the error is returned.
pub fn build_archive(
    json_path: &Path,
    staging_root: &Path,
    archive_name: &str,
    backup_type: &str,
) -> Result<PathBuf> {
    let archive_path = staging_root.join(format!("{}.zip", archive_name));
    let manifest = ArchiveManifest::new(backup_type, Utc::now());

    match write_archive(json_path, &staging_root.join(MEDIA_DIR_NAME), &archive_path, &manifest) {
        Ok(entries) => {
            info!("Created archive {} with {} media files", archive_path.display(), entries);
            Ok(archive_path)
        }
        Err(e) => {
            let _ = fs::remove_file(&archive_path);
            Err(e)
        }
    }
}

fn write_archive(
    json_path: &Path,
    media_dir: &Path,
    archive_path: &Path,
    manifest: &ArchiveManifest,
) -> Result<usize> {
    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(BACKUP_JSON, options)?;
    io::copy(&mut BufReader::new(File::open(json_path)?), &mut zip)?;

    zip.add_directory(MEDIA_PREFIX, FileOptions::default())?;
    let mut media_entries = 0;
    if media_dir.is_dir() {
        for entry in WalkDir::new(media_dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(media_dir)
                .map_err(|_| Error::InvalidArchive {
                    reason: format!("{} is outside the media directory", entry.path().display()),
                })?;
            let name = format!("{}{}", MEDIA_PREFIX, zip_entry_name(relative));

            zip.start_file(name.as_str(), options)?;
            io::copy(&mut BufReader::new(File::open(entry.path())?), &mut zip)?;
            debug!("Added to archive: {}", name);
            media_entries += 1;
        }
    }

    zip.start_file(MANIFEST_JSON, options)?;
    zip.write_all(serde_json::to_string_pretty(manifest)?.as_bytes())?;

    let mut file = zip.finish()?;
    file.flush()?;
    Ok(media_entries)
}

/// Relative filesystem path to a `/`-separated entry name
fn zip_entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<String>>()
        .join("/")
}

/// SHA-256 of a file, hex encoded
pub fn sha256_file(path: &Path) -> Result<String> {
    sha256_reader(&mut File::open(path)?)
}

pub fn sha256_reader(reader: &mut dyn Read) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Validated view of an archive for restore
pub struct ArchiveReader<R: Read + Seek> {
    zip: ZipArchive<R>,
    manifest: ArchiveManifest,
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Open and validate layout and format version
    pub fn open(reader: R) -> Result<Self> {
        let mut zip = ZipArchive::new(reader).map_err(|e| Error::InvalidArchive {
            reason: format!("not a zip archive: {}", e),
        })?;

        let manifest: ArchiveManifest = match zip.by_name(MANIFEST_JSON) {
            Ok(entry) => serde_json::from_reader(entry).map_err(|e| Error::InvalidArchive {
                reason: format!("unreadable {}: {}", MANIFEST_JSON, e),
            })?,
            Err(ZipError::FileNotFound) => {
                return Err(Error::InvalidArchive {
                    reason: format!("{} is missing", MANIFEST_JSON),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if !SUPPORTED_FORMAT_VERSIONS.contains(&manifest.format_version.as_str()) {
            return Err(Error::UnsupportedFormat {
                version: manifest.format_version,
            });
        }

        let has_json = zip.file_names().any(|name| name == BACKUP_JSON);
        if !has_json {
            return Err(Error::InvalidArchive {
                reason: format!("{} is missing", BACKUP_JSON),
            });
        }

        let has_media = zip.file_names().any(|name| name.starts_with(MEDIA_PREFIX));
        if !has_media {
            return Err(Error::InvalidArchive {
                reason: format!("{} directory is missing", MEDIA_PREFIX),
            });
        }

        Ok(Self { zip, manifest })
    }

    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    /// Parse `backup.json`
    pub fn records(&mut self) -> Result<Vec<SerializedRecord>> {
        let entry = self.zip.by_name(BACKUP_JSON)?;
        serde_json::from_reader(entry).map_err(|e| Error::InvalidArchive {
            reason: format!("unreadable {}: {}", BACKUP_JSON, e),
        })
    }

    /// Storage-relative paths of every media file, in archive order
    pub fn media_paths(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for name in self.zip.file_names() {
            let Some(relative) = name.strip_prefix(MEDIA_PREFIX) else {
                continue;
            };
            if relative.is_empty() || relative.ends_with('/') {
                continue;
            }
            validate_relative_path(relative).map_err(|_| Error::InvalidArchive {
                reason: format!("media entry escapes the media directory: {}", name),
            })?;
            paths.push(relative.to_string());
        }
        Ok(paths)
    }

    /// Stream one media file by its storage-relative path
    pub fn media_entry(&mut self, relative: &str) -> Result<zip::read::ZipFile<'_>> {
        Ok(self.zip.by_name(&format!("{}{}", MEDIA_PREFIX, relative))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::write_fixture;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn staged(temp_dir: &TempDir) -> Result<PathBuf> {
        let json_path = temp_dir.path().join(BACKUP_JSON);
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!("a"));
        write_fixture(&json_path, &[SerializedRecord::new("app.widget", Some(json!(1)), fields)])?;
        Ok(json_path)
    }

    fn zip_with(entries: &[(&str, &str)]) -> Result<Cursor<Vec<u8>>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, FileOptions::default())?;
            } else {
                zip.start_file(*name, FileOptions::default())?;
                zip.write_all(content.as_bytes())?;
            }
        }
        let mut cursor = zip.finish()?;
        cursor.set_position(0);
        Ok(cursor)
    }

    fn manifest_json(version: &str) -> String {
        let mut manifest = ArchiveManifest::new("essential_data", Utc::now());
        manifest.format_version = version.to_string();
        serde_json::to_string(&manifest).unwrap()
    }

    #[test]
    fn test_fixed_layout() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let json_path = staged(&temp_dir)?;
        let media = temp_dir.path().join(MEDIA_DIR_NAME).join("uploads/2024");
        fs::create_dir_all(&media)?;
        fs::write(media.join("a.png"), b"png")?;

        let archive_path = build_archive(&json_path, temp_dir.path(), "backup_essential_data_20240101_000000", "essential_data")?;
        assert_eq!(
            archive_path.file_name().and_then(|n| n.to_str()),
            Some("backup_essential_data_20240101_000000.zip")
        );

        let mut reader = ArchiveReader::open(File::open(&archive_path)?)?;
        assert_eq!(reader.manifest().backup_type, "essential_data");
        assert_eq!(reader.manifest().json_file, "backup.json");
        assert_eq!(reader.manifest().media_directory, "media/");
        assert_eq!(reader.manifest().format_version, "1.0");

        assert_eq!(reader.records()?.len(), 1);
        assert_eq!(reader.media_paths()?, vec!["uploads/2024/a.png".to_string()]);

        let mut content = Vec::new();
        reader.media_entry("uploads/2024/a.png")?.read_to_end(&mut content)?;
        assert_eq!(content, b"png");
        Ok(())
    }

    #[test]
    fn test_media_dir_present_without_media() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let json_path = staged(&temp_dir)?;

        let archive_path = build_archive(&json_path, temp_dir.path(), "empty", "all_models")?;
        let reader = ArchiveReader::open(File::open(&archive_path)?)?;
        assert!(reader.media_paths()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_failed_build_leaves_no_archive() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let missing_json = temp_dir.path().join("nope.json");

        assert!(build_archive(&missing_json, temp_dir.path(), "broken", "all_models").is_err());
        assert!(!temp_dir.path().join("broken.zip").exists());
        Ok(())
    }

    #[test]
    fn test_reader_rejects_bad_layouts() -> Result<()> {
        let good_manifest = manifest_json(FORMAT_VERSION);

        let no_json = zip_with(&[("media/", ""), (MANIFEST_JSON, &good_manifest)])?;
        assert!(matches!(ArchiveReader::open(no_json), Err(Error::InvalidArchive { .. })));

        let no_media = zip_with(&[(BACKUP_JSON, "[]"), (MANIFEST_JSON, &good_manifest)])?;
        assert!(matches!(ArchiveReader::open(no_media), Err(Error::InvalidArchive { .. })));

        let no_manifest = zip_with(&[(BACKUP_JSON, "[]"), ("media/", "")])?;
        assert!(matches!(ArchiveReader::open(no_manifest), Err(Error::InvalidArchive { .. })));

        let future = manifest_json("2.0");
        let newer = zip_with(&[(BACKUP_JSON, "[]"), ("media/", ""), (MANIFEST_JSON, &future)])?;
        assert!(matches!(ArchiveReader::open(newer), Err(Error::UnsupportedFormat { version }) if version == "2.0"));

        let escaping = zip_with(&[
            (BACKUP_JSON, "[]"),
            ("media/", ""),
            ("media/../../etc/passwd", "x"),
            (MANIFEST_JSON, &good_manifest),
        ])?;
        let reader = ArchiveReader::open(escaping)?;
        assert!(matches!(reader.media_paths(), Err(Error::InvalidArchive { .. })));
        Ok(())
    }

    #[test]
    fn test_sha256_reader() -> Result<()> {
        let digest = sha256_reader(&mut &b"abc"[..])?;
        assert_eq!(digest, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        Ok(())
    }
}
